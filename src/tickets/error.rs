use serde_json::json;
use thiserror::Error;

use crate::web::WebError;

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("Ticket with id {0} not found")]
    TicketNotFound(i64),

    #[error("Label with id {0} not found")]
    LabelNotFound(i64),

    #[error("Label with name '{0}' already exists")]
    DuplicateLabel(String),

    #[error("Invalid status value: '{0}'. Valid values are: open, completed, cancelled")]
    InvalidStatus(String),

    #[error("{0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl TicketError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Maps the error onto the HTTP envelope.
    ///
    /// Storage failures hide their cause unless `expose_internal` is set.
    pub fn into_web_error(self, expose_internal: bool) -> WebError {
        let message = self.to_string();
        match self {
            Self::TicketNotFound(_) | Self::LabelNotFound(_) => {
                WebError::not_found("NOT_FOUND", message)
            }
            Self::DuplicateLabel(_) => WebError::conflict("CONFLICT", message),
            Self::InvalidStatus(_) => WebError::bad_request("INVALID_STATUS", message),
            Self::Validation(_) => WebError::bad_request("VALIDATION_ERROR", message),
            Self::Storage(cause) => {
                tracing::error!(error = %cause, "ticket storage failure");
                let error = WebError::internal("INTERNAL_ERROR", "An unexpected error occurred");
                if expose_internal {
                    error.with_details(json!(cause))
                } else {
                    error
                }
            }
        }
    }
}

impl From<sqlx::Error> for TicketError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
