//! Catalog records and the camelCase shapes served over HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::adapter::RelationKind;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredConnection {
    pub name: String,
    pub connection_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub default_value: Option<String>,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    pub schema_name: String,
    pub table_name: String,
    pub table_type: RelationKind,
    pub columns: Vec<ColumnMetadata>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub name: String,
    pub connection_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub table_count: i64,
    pub view_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetail {
    #[serde(flatten)]
    pub summary: ConnectionSummary,
    pub tables: Vec<TableMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionList {
    pub data: Vec<ConnectionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    pub columns: Vec<QueryColumn>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSql {
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddConnectionRequest {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NaturalQueryRequest {
    pub question: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detail_flattens_summary_in_camel_case() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let detail = ConnectionDetail {
            summary: ConnectionSummary {
                name: "shop".into(),
                connection_url: "sqlite:///shop.db".into(),
                created_at: at,
                updated_at: at,
                table_count: 1,
                view_count: 0,
            },
            tables: vec![TableMetadata {
                schema_name: "main".into(),
                table_name: "items".into(),
                table_type: RelationKind::Table,
                columns: vec![ColumnMetadata {
                    column_name: "id".into(),
                    data_type: "INTEGER".into(),
                    is_nullable: false,
                    is_primary_key: true,
                    default_value: None,
                    position: 1,
                }],
            }],
        };

        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["connectionUrl"], json!("sqlite:///shop.db"));
        assert_eq!(value["tableCount"], json!(1));
        assert_eq!(value["tables"][0]["tableType"], json!("table"));
        assert_eq!(value["tables"][0]["columns"][0]["isPrimaryKey"], json!(true));
        assert_eq!(value["tables"][0]["columns"][0]["defaultValue"], Value::Null);
    }

    #[test]
    fn query_outcome_uses_type_and_row_count() {
        let outcome = QueryOutcome {
            columns: vec![QueryColumn {
                name: "id".into(),
                type_name: "INT4".into(),
            }],
            rows: Vec::new(),
            row_count: 0,
            truncated: false,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["columns"][0], json!({"name": "id", "type": "INT4"}));
        assert_eq!(value["rowCount"], json!(0));
    }
}
