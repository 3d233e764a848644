//! Natural-language to SQL through an OpenAI-compatible chat endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlparser::dialect::Dialect;
use thiserror::Error;
use tracing::{debug, warn};

use super::error::QueryToolError;
use super::model::GeneratedSql;
use super::sql::{SqlGuardError, validate_sql};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NlError {
    #[error("Deepseek API key is not configured. Please set DEEPSEEK_API_KEY in .env file.")]
    MissingApiKey,

    #[error("request to the language model failed: {0}")]
    Transport(String),

    #[error("language model returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Empty response from Deepseek")]
    EmptyResponse,

    #[error("language model returned invalid JSON: {0}")]
    InvalidResponse(String),

    #[error("Generated SQL was rejected: {0}")]
    Rejected(String),
}

impl From<NlError> for QueryToolError {
    fn from(error: NlError) -> Self {
        QueryToolError::NlGeneration(error.to_string())
    }
}

/// Everything the model needs to answer one question.
#[derive(Debug, Clone)]
pub struct NlRequest {
    pub question: String,
    pub schema_context: String,
    pub db_type: String,
    pub dialect_rules: String,
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(&self, request: &NlRequest) -> Result<GeneratedSql, NlError>;
}

pub fn system_prompt(db_type: &str, dialect_rules: &str) -> String {
    format!(
        r#"You are an expert SQL assistant. Given a database schema and a natural language question, generate a valid SQL SELECT query.

Rules:
1. Only generate SELECT queries. Never generate INSERT, UPDATE, DELETE, or DDL statements.
2. Use proper table and column names from the provided schema.
3. Include appropriate JOINs when the question requires data from multiple tables.
4. Add WHERE clauses to filter data based on the question.
5. Use LIMIT when appropriate to avoid returning too many rows.
6. Return the SQL query and a brief explanation of what the query does.

Database type: {}
{}

Respond in the following JSON format:
{{
  "sql": "your SQL query here",
  "explanation": "brief explanation of the query"
}}"#,
        db_type.to_uppercase(),
        dialect_rules
    )
}

pub fn user_prompt(schema_context: &str, question: &str) -> String {
    format!(
        "Database Schema:\n{schema_context}\n\nQuestion: {question}\n\nGenerate a SQL query to answer this question."
    )
}

/// Rejects generated SQL that would not pass the query guard.
pub fn check_generated(generated: &GeneratedSql, dialect: &dyn Dialect) -> Result<(), NlError> {
    validate_sql(&generated.sql, dialect).map(|_| ()).map_err(|err| {
        warn!(sql = %generated.sql, error = %err, "discarding generated SQL");
        match err {
            SqlGuardError::NonSelect(keyword) => {
                NlError::Rejected(format!("only SELECT statements are allowed, got {keyword}"))
            }
            other => NlError::Rejected(other.to_string()),
        }
    })
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Chat-completions client for Deepseek and other OpenAI-compatible APIs.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleGenerator {
    http: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiCompatibleGenerator {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, NlError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("opsdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| NlError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl SqlGenerator for OpenAiCompatibleGenerator {
    async fn generate(&self, request: &NlRequest) -> Result<GeneratedSql, NlError> {
        let api_key = self.api_key.as_deref().ok_or(NlError::MissingApiKey)?;

        let system = system_prompt(&request.db_type, &request.dialect_rules);
        let user = user_prompt(&request.schema_context, &request.question);
        let messages = [
            ChatMessage {
                role: "system",
                content: &system,
            },
            ChatMessage {
                role: "user",
                content: &user,
            },
        ];
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| NlError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NlError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let reply = response
            .json::<ChatResponse>()
            .await
            .map_err(|err| NlError::InvalidResponse(err.to_string()))?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(NlError::EmptyResponse)?;

        debug!(model = %self.model, "received SQL suggestion");
        parse_generated(&content)
    }
}

fn parse_generated(content: &str) -> Result<GeneratedSql, NlError> {
    serde_json::from_str(content).map_err(|err| NlError::InvalidResponse(err.to_string()))
}
