//! Server error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tether_core::{ClientId, ProtocolError};
use tether_session::SessionError;
use tracing::warn;

/// Errors raised while serving requests or running the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// No session is registered under this client id.
    #[error("unknown client id: {0}")]
    UnknownClient(ClientId),
    /// The request body is not a basket.
    #[error(transparent)]
    MalformedBasket(#[from] ProtocolError),
    /// The session refused the operation.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Binding or serving the listener failed.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Stable code for logs and error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownClient(_) => "UNKNOWN_CLIENT",
            Self::MalformedBasket(_) => "MALFORMED_BASKET",
            Self::Session(err) => err.code(),
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// HTTP status reported for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownClient(_) | Self::Session(SessionError::Gone) => StatusCode::NOT_FOUND,
            Self::MalformedBasket(_) => StatusCode::BAD_REQUEST,
            Self::Session(SessionError::AlreadyActivated) => StatusCode::CONFLICT,
            Self::Session(SessionError::Channel(_)) => StatusCode::GONE,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!(code = self.code(), status = status.as_u16(), error = %self, "request failed");
        let body = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
