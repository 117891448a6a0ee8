//! `WebhookHandler`: turns an HTTP request into a `watcher_core::WebhookRequest`,
//! runs the platform handshake / signature / ack-first sequence (spec §4.2),
//! and schedules the provider's async processing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use watcher_core::{Watcher, WebhookRequest};

use crate::error::HandlerError;

#[derive(Clone)]
pub struct AppState {
    pub watcher: Arc<Watcher>,
    pub base_path: String,
    pub shutting_down: Arc<AtomicBool>,
}

pub fn router(state: AppState) -> Router {
    let webhook_path = format!("{}/webhook/{{provider}}", state.base_path);
    Router::new()
        .route("/health", get(health_handler))
        .route(&webhook_path, post(webhook_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Normalizes a request body into its JSON envelope (spec §4.2 step 2): JSON
/// directly, or form-encoded with the JSON payload carried in a `payload`
/// field. The raw bytes are always the untouched wire body, regardless of
/// which envelope was used, so signature verification still covers exactly
/// what the platform signed.
fn normalize_body(content_type: &str, raw: &[u8]) -> Result<Value, HandlerError> {
    if content_type.contains("application/json") {
        serde_json::from_slice(raw).map_err(|e| HandlerError::Internal(e.to_string()))
    } else if content_type.contains("application/x-www-form-urlencoded") {
        let form: HashMap<String, String> =
            serde_urlencoded::from_bytes(raw).map_err(|e| HandlerError::Internal(e.to_string()))?;
        let payload = form
            .get("payload")
            .ok_or_else(|| HandlerError::Internal("missing form field 'payload'".into()))?;
        serde_json::from_str(payload).map_err(|e| HandlerError::Internal(e.to_string()))
    } else {
        Err(HandlerError::UnsupportedContentType)
    }
}

#[tracing::instrument(skip(state, headers, raw_body), fields(provider = %provider))]
async fn webhook_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    raw_body: Bytes,
) -> Result<impl IntoResponse, HandlerError> {
    if state.shutting_down.load(Ordering::SeqCst) {
        return Err(HandlerError::ShuttingDown);
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let body = normalize_body(content_type, &raw_body)?;

    if body.get("type").and_then(|v| v.as_str()) == Some("url_verification") {
        let challenge = body.get("challenge").cloned().unwrap_or(Value::Null);
        return Ok(Json(serde_json::json!({ "challenge": challenge })).into_response());
    }

    let provider_handle = state
        .watcher
        .provider(&provider)
        .ok_or_else(|| HandlerError::UnknownProvider(provider.clone()))?;

    let header_pairs: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();

    let request = WebhookRequest {
        headers: header_pairs,
        raw_body: raw_body.to_vec(),
        body,
    };

    if let Err(err) = provider_handle.validate_webhook(&request).await {
        tracing::warn!(provider = %provider, error = %err, "webhook signature validation failed");
        return Err(HandlerError::InvalidSignature);
    }

    let emit = state
        .watcher
        .event_handler_for(&provider)
        .ok_or_else(|| HandlerError::UnknownProvider(provider.clone()))?;

    // Ack-first: the 202 below is returned to the caller before processing
    // starts, so no platform API call or subprocess spawn precedes it.
    tokio::spawn(async move {
        if let Err(err) = provider_handle.handle_webhook(request, emit).await {
            tracing::error!(provider = %provider, error = %err, "webhook processing failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "status": "accepted" }))).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_body_parses_json_directly() {
        let body = normalize_body("application/json", br#"{"a":1}"#).unwrap();
        assert_eq!(body, serde_json::json!({"a": 1}));
    }

    #[test]
    fn normalize_body_extracts_json_payload_from_form() {
        // Body ends with a `%7D` escape as its final three bytes, exercising
        // the trailing-escape boundary case.
        let raw = br#"payload=%7B%22a%22%3A1%7D"#;
        let body = normalize_body("application/x-www-form-urlencoded", raw).unwrap();
        assert_eq!(body, serde_json::json!({"a": 1}));
    }

    #[test]
    fn normalize_body_rejects_unsupported_content_type() {
        let err = normalize_body("text/plain", b"hi").unwrap_err();
        assert!(matches!(err, HandlerError::UnsupportedContentType));
    }
}
