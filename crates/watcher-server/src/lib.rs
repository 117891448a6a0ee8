#![forbid(unsafe_code)]
//! axum-based `WebhookServer` HTTP surface (spec §4.1, §4.2): multiplexes
//! `POST {basePath}/webhook/{provider}` across every registered provider plus
//! a fixed `GET /health`, and drains in-flight requests on shutdown instead
//! of dropping them.

mod error;
mod handler;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use watcher_core::{ProviderError, ServerLifecycle, Watcher};

pub use error::HandlerError;
pub use handler::AppState;

/// How long the network surface waits for in-flight requests once `stop()`
/// is called before force-closing remaining sockets (spec §4.1 draining
/// step (b)).
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// Owns the listener task and the shutdown signal. Implements
/// [`ServerLifecycle`] so `watcher_core::Watcher` can start/stop it without
/// depending on this crate.
pub struct WebhookServer {
    watcher: Arc<Watcher>,
    base_path: String,
    config: ServerConfig,
    shutting_down: Arc<AtomicBool>,
    shutdown_signal: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebhookServer {
    pub fn new(watcher: Arc<Watcher>, base_path: String, config: ServerConfig) -> Self {
        Self {
            watcher,
            base_path,
            config,
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_signal: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ServerLifecycle for WebhookServer {
    async fn start(&self) -> Result<(), ProviderError> {
        let state = AppState {
            watcher: Arc::clone(&self.watcher),
            base_path: self.base_path.clone(),
            shutting_down: Arc::clone(&self.shutting_down),
        };
        let app = handler::router(state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| ProviderError::Transport(format!("failed to bind {}: {e}", self.config.bind_addr)))?;
        let local_addr = listener.local_addr().unwrap_or(self.config.bind_addr);
        tracing::info!(addr = %local_addr, "webhook server listening");

        let shutdown_signal = Arc::clone(&self.shutdown_signal);
        let handle = tokio::spawn(async move {
            let graceful = async move {
                shutdown_signal.notified().await;
            };
            if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(graceful).await {
                tracing::error!(error = %err, "webhook server exited with error");
            }
        });

        *self.task.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        // (a) reject new requests with 503.
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown_signal.notify_one();

        let handle = self.task.lock().await.take();
        let Some(handle) = handle else {
            return;
        };

        // (b) await in-flight requests up to the drain timeout, then
        // (c) force-close remaining sockets.
        let abort_handle = handle.abort_handle();
        match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "webhook server task panicked during shutdown"),
            Err(_) => {
                tracing::warn!("webhook server did not drain within {:?}, forcing close", DRAIN_TIMEOUT);
                abort_handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use watcher_core::{EventHandler, ProviderConfig, ProviderMetadata, WebhookRequest};

    struct NoopProvider;

    #[async_trait]
    impl watcher_core::Provider for NoopProvider {
        fn metadata(&self) -> ProviderMetadata {
            ProviderMetadata {
                name: "stub",
                resource_kinds: &["issue"],
            }
        }
        async fn init(&self) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn validate_webhook(&self, _request: &WebhookRequest) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn handle_webhook(&self, _request: WebhookRequest, _emit: EventHandler) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn poll(&self, _emit: EventHandler) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn shutdown(&self) {}
    }

    async fn spawn_test_server() -> WebhookServer {
        let watcher = Arc::new(Watcher::new());
        watcher
            .register_provider("github", Arc::new(NoopProvider), ProviderConfig::default(), vec![])
            .unwrap();

        let config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        };
        let server = WebhookServer::new(Arc::clone(&watcher), String::new(), config);
        server.start().await.unwrap();
        server
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok_without_draining() {
        let watcher = Arc::new(Watcher::new());
        let shutting_down = Arc::new(AtomicBool::new(false));
        let state = AppState {
            watcher,
            base_path: String::new(),
            shutting_down,
        };
        let app = handler::router(state);
        let response = tower::ServiceExt::oneshot(
            app,
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_rejected_while_shutting_down() {
        let watcher = Arc::new(Watcher::new());
        watcher
            .register_provider("github", Arc::new(NoopProvider), ProviderConfig::default(), vec![])
            .unwrap();
        let shutting_down = Arc::new(AtomicBool::new(true));
        let state = AppState {
            watcher,
            base_path: String::new(),
            shutting_down,
        };
        let app = handler::router(state);
        let response = tower::ServiceExt::oneshot(
            app,
            axum::http::Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("content-type", "application/json")
                .body(axum::body::Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn webhook_unknown_provider_returns_400() {
        let watcher = Arc::new(Watcher::new());
        let shutting_down = Arc::new(AtomicBool::new(false));
        let state = AppState {
            watcher,
            base_path: String::new(),
            shutting_down,
        };
        let app = handler::router(state);
        let response = tower::ServiceExt::oneshot(
            app,
            axum::http::Request::builder()
                .method("POST")
                .uri("/webhook/nope")
                .header("content-type", "application/json")
                .body(axum::body::Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_and_stop_drains_cleanly() {
        let server = spawn_test_server().await;
        server.stop().await;
    }
}
