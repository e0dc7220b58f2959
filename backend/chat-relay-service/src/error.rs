use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::websocket::ConnectionId;

/// Service-level failures (startup, HTTP surface).
#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(String),
}

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::Database(_) => 503,
            AppError::Config(_) | AppError::StartServer(_) => 500,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json(json!({
            "error": self.to_string(),
            "status": AppError::status_code(self),
        }))
    }
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::ValidationFailed(msg) => AppError::BadRequest(msg),
            RelayError::StoreUnavailable(msg) => AppError::Database(msg),
        }
    }
}

/// Failures of a chat submission. Surfaced only to the originating connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("message store unavailable: {0}")]
    StoreUnavailable(String),
}

impl RelayError {
    /// Text carried by the `error` event sent back to the originator.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::ValidationFailed(msg) => format!("Invalid message: {msg}"),
            RelayError::StoreUnavailable(_) => "Failed to save message".to_string(),
        }
    }
}

/// A per-connection operation arrived after the connection was torn down
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub ConnectionId);

/// Message store facade errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => RelayError::StoreUnavailable(msg),
            StoreError::Validation(msg) => RelayError::ValidationFailed(msg),
        }
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Outcome of a single failed push delivery
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Push service reports the endpoint no longer exists (404/410)
    #[error("push endpoint gone (HTTP {status})")]
    Gone { status: u16 },

    #[error("push endpoint rejected delivery (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("push request failed: {0}")]
    Network(String),

    #[error("push delivery timed out after {0:?}")]
    TimedOut(Duration),

    #[error("invalid push endpoint: {0}")]
    InvalidEndpoint(String),
}

impl PushError {
    /// Permanent failures invalidate the subscription; everything else is retried on the next message.
    pub fn is_permanent(&self) -> bool {
        matches!(self, PushError::Gone { .. } | PushError::InvalidEndpoint(_))
    }

    /// Classify an HTTP status returned by a push service.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            404 | 410 => PushError::Gone { status },
            _ => PushError::Rejected { status, body },
        }
    }
}
