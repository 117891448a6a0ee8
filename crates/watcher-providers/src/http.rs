//! A thin `reqwest`-backed client shared by every provider, applying the
//! exponential retry discipline of spec §4.4 ("Retry discipline") to every
//! outbound platform API call.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use watcher_core::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("platform API returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl HttpError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            HttpError::Status { status, .. } if *status == 409 || *status == 429
        )
    }
}

#[derive(Clone)]
pub struct PlatformHttp {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl PlatformHttp {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            policy,
        }
    }

    async fn send_once(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Value, HttpError> {
        let response = build().send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| HttpError::Status {
            status: status.as_u16(),
            body: format!("invalid JSON body: {e}"),
        })
    }

    /// Sends a request built fresh on every retry attempt (the builder must
    /// be re-buildable — `reqwest::RequestBuilder` is not `Clone`).
    pub async fn send_json(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Value, HttpError> {
        let policy = self.policy;
        watcher_core::retry_with_backoff(
            policy,
            |_attempt| self.send_once(&build),
            |err: &HttpError| err.is_transient(),
            |delay: Duration| tokio::time::sleep(delay),
        )
        .await
    }

    pub async fn send_typed<T: DeserializeOwned>(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T, HttpError> {
        let value = self.send_json(build).await?;
        serde_json::from_value(value).map_err(|e| HttpError::Status {
            status: 0,
            body: format!("failed to decode response: {e}"),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Default for PlatformHttp {
    fn default() -> Self {
        Self::new()
    }
}
