//! One fixed-interval, single-flight poller per pollable provider (spec §4.5).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::provider::{EventHandler, Provider};

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub cap_delay: Duration,
    pub max_error_count: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(30),
            max_error_count: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, error_count: u32) -> Duration {
        if error_count == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(error_count - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.cap_delay)
            .min(self.cap_delay)
    }
}

/// `idle <-> polling`, plus the absorbing `disabled` state once the error
/// threshold is crossed (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Disabled,
}

struct PollerInner {
    provider: Arc<dyn Provider>,
    emit: EventHandler,
    interval: Duration,
    policy: BackoffPolicy,
    error_count: AtomicU32,
    running: AtomicBool,
    in_flight: AtomicBool,
    cancel: Notify,
    cancelled: AtomicBool,
}

/// Per provider. See spec §4.5 for the cancellation/single-flight contract.
pub struct Poller {
    inner: Arc<PollerInner>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new(
        provider: Arc<dyn Provider>,
        emit: EventHandler,
        interval: Duration,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                provider,
                emit,
                interval,
                policy,
                error_count: AtomicU32::new(0),
                running: AtomicBool::new(true),
                in_flight: AtomicBool::new(false),
                cancel: Notify::new(),
                cancelled: AtomicBool::new(false),
            }),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u32 {
        self.inner.error_count.load(Ordering::SeqCst)
    }

    /// `Disabled` covers both the hard-fail self-disable and an explicit
    /// `stop()` — both leave the tick loop permanently not-running.
    pub fn state(&self) -> PollerState {
        if !self.inner.running.load(Ordering::SeqCst) {
            PollerState::Disabled
        } else if self.inner.in_flight.load(Ordering::SeqCst) {
            PollerState::Polling
        } else {
            PollerState::Idle
        }
    }

    /// Spawns the tick loop. Returns immediately; ticks run on the tokio
    /// runtime until `stop()` or the hard-fail threshold self-disables.
    pub async fn start(&self) {
        let inner = Arc::clone(&self.inner);
        let join = tokio::spawn(async move { Self::run(inner).await });
        *self.handle.lock().await = Some(join);
    }

    async fn run(inner: Arc<PollerInner>) {
        let mut tick = tokio::time::interval(inner.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = inner.cancel.notified() => {
                    return;
                }
            }

            if inner.cancelled.load(Ordering::SeqCst) {
                return;
            }
            if !inner.running.load(Ordering::SeqCst) {
                return;
            }

            if inner
                .in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // Previous tick still running; skip this one (single-flight).
                continue;
            }

            let emit = Arc::clone(&inner.emit);
            let result = inner.provider.poll(emit).await;
            inner.in_flight.store(false, Ordering::SeqCst);

            if inner.cancelled.load(Ordering::SeqCst) {
                return;
            }

            match result {
                Ok(()) => {
                    inner.error_count.store(0, Ordering::SeqCst);
                }
                Err(err) => {
                    let count = inner.error_count.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(error = %err, count, "poller tick failed");
                    if count >= inner.policy.max_error_count {
                        tracing::error!(count, "poller disabling after consecutive failures");
                        inner.running.store(false, Ordering::SeqCst);
                        return;
                    }
                    tokio::time::sleep(inner.policy.delay_for(count)).await;
                }
            }
        }
    }

    /// Cancels the tick loop at the current tick boundary. A tick already in
    /// flight completes without emitting further events once cancellation is
    /// observed. Idempotent.
    pub async fn stop(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.cancel.notify_waiters();
        if let Some(join) = self.handle.lock().await.take() {
            let _ = join.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_resets_on_success_and_doubles_on_failure() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
    }

    struct FailingProvider {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl Provider for FailingProvider {
        fn metadata(&self) -> crate::provider::ProviderMetadata {
            crate::provider::ProviderMetadata {
                name: "failing",
                resource_kinds: &[],
            }
        }
        async fn init(&self) -> Result<(), crate::error::ProviderError> {
            Ok(())
        }
        async fn validate_webhook(
            &self,
            _request: &crate::provider::WebhookRequest,
        ) -> Result<(), crate::error::ProviderError> {
            Ok(())
        }
        async fn handle_webhook(
            &self,
            _request: crate::provider::WebhookRequest,
            _emit: EventHandler,
        ) -> Result<(), crate::error::ProviderError> {
            Ok(())
        }
        async fn poll(&self, _emit: EventHandler) -> Result<(), crate::error::ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(crate::error::ProviderError::Transport("500".into()))
        }
        async fn shutdown(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn disables_after_max_error_count() {
        let provider = Arc::new(FailingProvider {
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let emit: EventHandler = Arc::new(|_event, _reactor| Box::pin(async {}));
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(1),
            cap_delay: Duration::from_millis(4),
            max_error_count: 3,
        };
        let poller = Poller::new(provider.clone(), emit, Duration::from_millis(1), policy);
        poller.start().await;

        for _ in 0..50 {
            tokio::time::advance(Duration::from_millis(1)).await;
            tokio::task::yield_now().await;
            if !poller.is_running() {
                break;
            }
        }

        assert!(!poller.is_running());
        assert_eq!(poller.error_count(), 3);
        poller.stop().await;
    }
}
