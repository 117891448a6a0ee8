//! The polymorphic platform-adapter interface (spec §4.3).

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::event::NormalizedEvent;
use crate::reactor::Reactor;

/// Identifying facts about a provider, independent of any particular
/// instance's configuration.
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    pub name: &'static str,
    pub resource_kinds: &'static [&'static str],
}

/// Raw inbound webhook request data, captured before JSON parsing so the raw
/// byte stream survives for signature verification (spec §4.1).
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub headers: Vec<(String, String)>,
    pub raw_body: Vec<u8>,
    pub body: serde_json::Value,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The dispatcher's per-provider closure, invoked with `(event, reactor)` for
/// every event a provider emits (spec §4.7). Boxed and `Send` so providers
/// can hold it across `.await` points in async webhook/poll handlers.
pub type EventHandler = Arc<
    dyn Fn(NormalizedEvent, Arc<dyn Reactor>) -> Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// `{ metadata, init(cfg), validateWebhook(...), handleWebhook(...), poll(emit), shutdown }`
/// (spec §4.3). One concrete impl per supported platform.
#[async_trait]
pub trait Provider: Send + Sync {
    fn metadata(&self) -> ProviderMetadata;

    /// Performs authentication, bot-identity discovery, and any other
    /// one-time setup. An error here aborts the lifecycle start sequence.
    async fn init(&self) -> Result<(), ProviderError>;

    /// Verifies the request's signature envelope. A missing-secret
    /// configuration is treated as "valid" with a logged warning, per the
    /// operator-responsibility note in spec §4.3.1.
    async fn validate_webhook(&self, request: &WebhookRequest) -> Result<(), ProviderError>;

    /// Normalizes, filters, builds a `Reactor`, and invokes `emit` for each
    /// actionable event found in the request. Errors here are logged by the
    /// webhook handler and never reflected back to the HTTP response, which
    /// has already been sent (ack-first, spec §4.2).
    async fn handle_webhook(
        &self,
        request: WebhookRequest,
        emit: EventHandler,
    ) -> Result<(), ProviderError>;

    /// Fetches items updated since the provider's own cursor, filters,
    /// builds reactors, and invokes `emit` for each actionable item.
    async fn poll(&self, emit: EventHandler) -> Result<(), ProviderError>;

    /// Releases any held resources (HTTP clients, cached credentials).
    async fn shutdown(&self);
}
