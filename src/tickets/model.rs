use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::TicketError;

pub const DEFAULT_LABEL_COLOR: &str = "#6B7280";
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    #[default]
    Open,
    Completed,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = TicketError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "open" => Ok(Self::Open),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TicketError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Label {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TicketStatus,
    pub labels: Vec<Label>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub title: String,
    pub description: Option<String>,
    pub label_ids: Vec<i64>,
}

/// `description: Some(None)` clears the stored description.
#[derive(Debug, Clone, Default)]
pub struct TicketPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
}

impl TicketPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewLabel {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Default)]
pub struct LabelPatch {
    pub name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TicketSortField {
    Id,
    Title,
    Status,
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl TicketSortField {
    /// Unknown names fall back to `created_at`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim() {
            "id" => Self::Id,
            "title" => Self::Title,
            "status" => Self::Status,
            "updated_at" => Self::UpdatedAt,
            _ => Self::CreatedAt,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::Status => "status",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse_lenient(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TicketListQuery {
    pub status: Option<TicketStatus>,
    pub label_ids: Vec<i64>,
    pub search: Option<String>,
    pub page: i64,
    pub page_size: i64,
    pub sort_by: TicketSortField,
    pub sort_order: SortOrder,
}

impl Default for TicketListQuery {
    fn default() -> Self {
        Self {
            status: None,
            label_ids: Vec::new(),
            search: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: TicketSortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl TicketListQuery {
    /// Rows to skip; saturates for pages past the end of `i64`.
    pub fn offset(&self) -> i64 {
        self.page
            .saturating_sub(1)
            .max(0)
            .saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, page_size: i64, total: i64) -> Self {
        let total_pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };
        Self {
            page,
            page_size,
            total,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketPage {
    pub data: Vec<Ticket>,
    pub pagination: Pagination,
}
