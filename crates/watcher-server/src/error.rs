//! HTTP-facing error type for the webhook handler (spec §4.2, §7 failure
//! taxonomy). Maps each case to its mandated HTTP status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unsupported content type")]
    UnsupportedContentType,
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = match self {
            HandlerError::UnsupportedContentType => StatusCode::BAD_REQUEST,
            HandlerError::UnknownProvider(_) => StatusCode::BAD_REQUEST,
            HandlerError::InvalidSignature => StatusCode::UNAUTHORIZED,
            HandlerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            HandlerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody { error: self.to_string() };
        (status, axum::Json(body)).into_response()
    }
}
