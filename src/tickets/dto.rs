use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use super::error::TicketError;
use super::model::{
    DEFAULT_LABEL_COLOR, DEFAULT_PAGE_SIZE, Label, LabelPatch, MAX_PAGE_SIZE, NewLabel, NewTicket,
    SortOrder, TicketListQuery, TicketPatch, TicketSortField, TicketStatus,
};

const TITLE_MAX: usize = 200;
const DESCRIPTION_MAX: usize = 5000;
const LABEL_NAME_MAX: usize = 50;

lazy_static! {
    static ref COLOR_PATTERN: Regex = Regex::new(r"^#[0-9A-Fa-f]{6}$").unwrap();
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub label_ids: Option<Vec<i64>>,
}

impl CreateTicketRequest {
    pub fn into_domain(self) -> Result<NewTicket, TicketError> {
        validate_title(&self.title)?;
        if let Some(description) = &self.description {
            validate_description(description)?;
        }

        let mut label_ids = Vec::new();
        for id in self.label_ids.unwrap_or_default() {
            if !label_ids.contains(&id) {
                label_ids.push(id);
            }
        }

        Ok(NewTicket {
            title: self.title,
            description: self.description,
            label_ids,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTicketRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub description: Option<Option<String>>,
}

impl UpdateTicketRequest {
    pub fn into_domain(self) -> Result<TicketPatch, TicketError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(Some(description)) = &self.description {
            validate_description(description)?;
        }
        Ok(TicketPatch {
            title: self.title,
            description: self.description,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLabelRequest {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl CreateLabelRequest {
    pub fn into_domain(self) -> Result<NewLabel, TicketError> {
        validate_label_name(&self.name)?;
        let color = self.color.unwrap_or_else(|| DEFAULT_LABEL_COLOR.to_string());
        validate_color(&color)?;
        Ok(NewLabel {
            name: self.name,
            color,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateLabelRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl UpdateLabelRequest {
    pub fn into_domain(self) -> Result<LabelPatch, TicketError> {
        if let Some(name) = &self.name {
            validate_label_name(name)?;
        }
        if let Some(color) = &self.color {
            validate_color(color)?;
        }
        Ok(LabelPatch {
            name: self.name,
            color: self.color,
        })
    }
}

/// Raw query string of `GET /tickets`. Everything arrives as text so that
/// malformed numbers still produce the JSON error envelope.
#[derive(Debug, Default, Deserialize)]
pub struct ListTicketsParams {
    pub status: Option<String>,
    pub label_ids: Option<String>,
    pub search: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl ListTicketsParams {
    pub fn into_query(self) -> Result<TicketListQuery, TicketError> {
        let status = non_blank(self.status)
            .map(|raw| raw.parse::<TicketStatus>())
            .transpose()?;

        let label_ids = match non_blank(self.label_ids) {
            Some(raw) => parse_id_list(&raw)?,
            None => Vec::new(),
        };

        let page = parse_int("page", self.page)?.unwrap_or(1).max(1);
        let page_size = parse_int("page_size", self.page_size)?
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        Ok(TicketListQuery {
            status,
            label_ids,
            search: non_blank(self.search),
            page,
            page_size,
            sort_by: self
                .sort_by
                .as_deref()
                .map(TicketSortField::parse_lenient)
                .unwrap_or_default(),
            sort_order: self
                .sort_order
                .as_deref()
                .map(SortOrder::parse_lenient)
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct LabelList {
    pub data: Vec<Label>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct WelcomeResponse {
    pub message: &'static str,
    pub health: &'static str,
}

pub fn validate_title(title: &str) -> Result<(), TicketError> {
    check_length("title", title, TITLE_MAX)
}

pub fn validate_description(description: &str) -> Result<(), TicketError> {
    if description.chars().count() > DESCRIPTION_MAX {
        return Err(TicketError::validation(format!(
            "description must be at most {DESCRIPTION_MAX} characters"
        )));
    }
    Ok(())
}

pub fn validate_label_name(name: &str) -> Result<(), TicketError> {
    check_length("name", name, LABEL_NAME_MAX)
}

pub fn validate_color(color: &str) -> Result<(), TicketError> {
    if !COLOR_PATTERN.is_match(color) {
        return Err(TicketError::validation(format!(
            "color '{color}' must be a hex colour such as {DEFAULT_LABEL_COLOR}"
        )));
    }
    Ok(())
}

pub fn parse_id(field: &str, raw: &str) -> Result<i64, TicketError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| TicketError::validation(format!("{field} must be an integer, got '{raw}'")))
}

fn check_length(field: &str, value: &str, max: usize) -> Result<(), TicketError> {
    let len = value.trim().chars().count();
    if len == 0 || value.chars().count() > max {
        return Err(TicketError::validation(format!(
            "{field} must be between 1 and {max} characters"
        )));
    }
    Ok(())
}

fn parse_id_list(raw: &str) -> Result<Vec<i64>, TicketError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_id("label_ids", part))
        .collect()
}

fn parse_int(field: &str, raw: Option<String>) -> Result<Option<i64>, TicketError> {
    non_blank(raw).map(|value| parse_id(field, &value)).transpose()
}

fn non_blank(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_clamp_paging_and_parse_labels() {
        let query = ListTicketsParams {
            label_ids: Some("3, 5,".to_string()),
            page: Some("0".to_string()),
            page_size: Some("500".to_string()),
            sort_by: Some("title".to_string()),
            sort_order: Some("asc".to_string()),
            ..Default::default()
        }
        .into_query()
        .unwrap();

        assert_eq!(query.label_ids, vec![3, 5]);
        assert_eq!(query.page, 1);
        assert_eq!(query.page_size, 100);
        assert_eq!(query.sort_by, TicketSortField::Title);
        assert_eq!(query.sort_order, SortOrder::Asc);
    }

    #[test]
    fn list_params_reject_bad_status_and_ids() {
        let status = ListTicketsParams {
            status: Some("archived".to_string()),
            ..Default::default()
        }
        .into_query()
        .unwrap_err();
        assert!(matches!(status, TicketError::InvalidStatus(_)));

        let ids = ListTicketsParams {
            label_ids: Some("1,x".to_string()),
            ..Default::default()
        }
        .into_query()
        .unwrap_err();
        assert!(matches!(ids, TicketError::Validation(_)));
    }

    #[test]
    fn update_request_distinguishes_null_from_missing() {
        let cleared: UpdateTicketRequest = serde_json::from_str(r#"{"description": null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));

        let untouched: UpdateTicketRequest = serde_json::from_str(r#"{"title": "x"}"#).unwrap();
        assert_eq!(untouched.description, None);
    }

    #[test]
    fn label_requests_validate_name_and_color() {
        let label = CreateLabelRequest {
            name: "bug".to_string(),
            color: None,
        }
        .into_domain()
        .unwrap();
        assert_eq!(label.color, DEFAULT_LABEL_COLOR);

        assert!(validate_color("#12abEF").is_ok());
        assert!(validate_color("12abEF").is_err());
        assert!(validate_color("#12abEG").is_err());
        assert!(validate_label_name("").is_err());
        assert!(validate_label_name(&"x".repeat(51)).is_err());
    }

    #[test]
    fn ticket_titles_are_bounded() {
        assert!(validate_title("Fix login").is_ok());
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"t".repeat(201)).is_err());
        assert!(validate_description(&"d".repeat(5001)).is_err());
    }
}
