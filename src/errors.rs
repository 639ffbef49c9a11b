use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use std::time::Duration;

use crate::models::LookupOutcome;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                source.status_and_message()
            }
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and a JSON body.
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(format!("Serialization failed: {}", err))
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}

/// Failure of a single adapter call.
///
/// Every variant is recovered inside the orchestrator: it degrades the
/// findings bundle and lands in the lookup audit, never aborts a pass.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    /// The call did not finish inside its budget.
    #[error("adapter timed out after {0:?}")]
    Timeout(Duration),

    /// Network failure, unexpected status, unparsable body, or a panic
    /// caught at the call boundary.
    #[error("transport error: {0}")]
    Transport(String),

    /// The query value itself cannot be looked up (e.g. an unparsable phone number).
    #[error("malformed input: {reason}")]
    MalformedInput {
        reason: String,
        suggestion: Option<String>,
    },

    /// The adapter's circuit breaker is open.
    #[error("adapter temporarily unavailable (circuit open)")]
    Unavailable,
}

impl AdapterError {
    pub fn transport(msg: impl Into<String>) -> Self {
        AdapterError::Transport(msg.into())
    }

    /// Whether this failure should count against the adapter's circuit breaker.
    /// Bad input says nothing about the health of the source.
    pub fn trips_breaker(&self) -> bool {
        matches!(self, AdapterError::Timeout(_) | AdapterError::Transport(_))
    }

    pub fn outcome(&self) -> LookupOutcome {
        match self {
            AdapterError::Timeout(_) => LookupOutcome::Timeout,
            AdapterError::Transport(_) => LookupOutcome::TransportError,
            AdapterError::MalformedInput { .. } => LookupOutcome::MalformedInput,
            AdapterError::Unavailable => LookupOutcome::Unavailable,
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::Transport(err.to_string())
    }
}

/// The only error an enrichment pass surfaces to its caller.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Writing the pass failed; the subject is left `failed` so a later trigger can retry.
    #[error("persisting enrichment pass failed: {0}")]
    PersistenceFailed(String),
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        tracing::error!("{}", self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Enrichment could not be persisted" })),
        )
            .into_response()
    }
}
