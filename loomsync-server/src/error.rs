//! Server-side error taxonomy, mirroring `loomsync_core::error` (spec.md §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Protocol,
    Capacity,
    Invariant,
    NotFound,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("core error: {0}")]
    Core(#[from] loomsync_core::CoreError),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("unsupported protocol version: client={client}, server major={server_major}")]
    UnsupportedVersion { client: String, server_major: u32 },

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Io(_) => ErrorKind::Io,
            ServerError::Serialization(_) => ErrorKind::Protocol,
            ServerError::Core(e) => match e.kind() {
                loomsync_core::ErrorKind::Io => ErrorKind::Io,
                loomsync_core::ErrorKind::NotFound => ErrorKind::NotFound,
                loomsync_core::ErrorKind::Capacity => ErrorKind::Capacity,
                _ => ErrorKind::Invariant,
            },
            ServerError::SessionNotFound(_) => ErrorKind::NotFound,
            ServerError::SessionExpired(_) => ErrorKind::NotFound,
            ServerError::Protocol(_) => ErrorKind::Protocol,
            ServerError::UnsupportedVersion { .. } => ErrorKind::Protocol,
            ServerError::Capacity(_) => ErrorKind::Capacity,
            ServerError::Invariant(_) => ErrorKind::Invariant,
        }
    }

    fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Capacity => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Protocol => StatusCode::BAD_REQUEST,
            ErrorKind::Io | ErrorKind::Invariant => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
