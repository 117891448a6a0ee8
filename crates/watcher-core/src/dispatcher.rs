//! The supervising coordinator owning providers, pollers, and the event bus
//! (spec §4.7 event-handler closure, §4.8 lifecycle supervisor).

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::command::CommandRunner;
use crate::config::ProviderConfig;
use crate::error::{ProviderError, RegistryMutationError, StartError};
use crate::eventbus::{BusNotification, EventBus, Subscriber};
use crate::event::NormalizedEvent;
use crate::lifecycle::ServerLifecycle;
use crate::poller::{BackoffPolicy, Poller};
use crate::provider::{EventHandler, Provider};
use crate::reactor::Reactor;

struct RegisteredProvider {
    provider: Arc<dyn Provider>,
    config: ProviderConfig,
    bot_identities: Vec<String>,
    poller: Mutex<Option<Poller>>,
}

/// Owns the set of registered providers, builds each provider's event-handler
/// closure, and runs the start/stop state machine. The HTTP surface itself
/// lives in `watcher-server`; this type only knows it through the abstract
/// [`ServerLifecycle`] hook so the dependency points the other way.
pub struct Watcher {
    providers: Mutex<HashMap<String, Arc<RegisteredProvider>>>,
    bus: Arc<EventBus>,
    command_runner: Mutex<Option<Arc<dyn CommandRunner>>>,
    server: Mutex<Option<Arc<dyn ServerLifecycle>>>,
    started: AtomicBool,
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Watcher {
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            bus: Arc::new(EventBus::new()),
            command_runner: Mutex::new(None),
            server: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> crate::eventbus::Subscription {
        self.bus.subscribe(subscriber)
    }

    pub fn set_command_runner(&self, runner: Option<Arc<dyn CommandRunner>>) {
        *self.command_runner.lock().expect("command runner lock poisoned") = runner;
    }

    pub fn set_server(&self, server: Option<Arc<dyn ServerLifecycle>>) {
        *self.server.lock().expect("server lock poisoned") = server;
    }

    /// Valid only while not started (spec §4.8 "Re-entrancy").
    pub fn register_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
        config: ProviderConfig,
        bot_identities: Vec<String>,
    ) -> Result<(), RegistryMutationError> {
        if self.is_started() {
            return Err(RegistryMutationError);
        }
        self.providers
            .lock()
            .expect("provider registry lock poisoned")
            .insert(
                name.into(),
                Arc::new(RegisteredProvider {
                    provider,
                    config,
                    bot_identities,
                    poller: Mutex::new(None),
                }),
            );
        Ok(())
    }

    pub fn unregister_provider(&self, name: &str) -> Result<(), RegistryMutationError> {
        if self.is_started() {
            return Err(RegistryMutationError);
        }
        self.providers
            .lock()
            .expect("provider registry lock poisoned")
            .remove(name);
        Ok(())
    }

    /// Builds the per-provider closure of type `(event, reactor) -> unit`
    /// described in spec §4.7.
    fn build_event_handler(
        &self,
        provider_name: String,
        bot_identities: Vec<String>,
    ) -> EventHandler {
        let bus = Arc::clone(&self.bus);
        let command_runner = self.command_runner.lock().expect("command runner lock poisoned").clone();

        Arc::new(move |event: NormalizedEvent, reactor: Arc<dyn Reactor>| {
            let provider_name = provider_name.clone();
            let bot_identities = bot_identities.clone();
            let bus = Arc::clone(&bus);
            let command_runner = command_runner.clone();

            let fut: Pin<Box<dyn std::future::Future<Output = ()> + Send>> = Box::pin(async move {
                // 1. Duplicate check — the sole idempotency mechanism.
                if let Some(last) = reactor.last_comment().await {
                    if crate::reactor::matches_bot_identity(&bot_identities, &last.author) {
                        tracing::debug!(
                            provider = %provider_name,
                            author = %last.author,
                            "skipping event already acknowledged by bot"
                        );
                        return;
                    }
                }

                // 2. Emit to in-process subscribers.
                bus.publish(BusNotification::Event {
                    provider: provider_name.clone(),
                    event: event.clone(),
                });

                // 3. Dispatch.
                match command_runner {
                    Some(runner) => {
                        runner.execute(&event, Arc::clone(&reactor)).await;
                    }
                    None => {
                        let marker = format!(
                            "Agent is working on {}",
                            display_string(&event)
                        );
                        if let Err(err) = reactor.post_comment(&marker).await {
                            tracing::error!(provider = %provider_name, error = %err, "failed to post dedup marker comment");
                        }
                    }
                }
            });
            fut
        })
    }

    /// `"{repository}#{number}"`, the display form used for the dedup marker
    /// and the initial "Agent is working on ..." comment (spec §4.6 step 1).
    pub fn display_string_for(event: &NormalizedEvent) -> String {
        display_string(event)
    }

    /// Start sequence (spec §4.8): init enabled providers, start the HTTP
    /// surface if any provider is enabled, start pollers, emit `started`.
    pub async fn start(&self) -> Result<(), StartError> {
        if self.started.swap(true, Ordering::SeqCst) {
            self.started.store(true, Ordering::SeqCst);
            return Err(StartError::AlreadyStarted);
        }

        let entries: Vec<(String, Arc<RegisteredProvider>)> = self
            .providers
            .lock()
            .expect("provider registry lock poisoned")
            .iter()
            .filter(|(_, entry)| entry.config.enabled)
            .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
            .collect();

        for (name, entry) in &entries {
            entry.provider.init().await.map_err(|source| StartError::ProviderInit {
                provider: name.clone(),
                source,
            })?;
        }

        if !entries.is_empty() {
            if let Some(server) = self.server.lock().expect("server lock poisoned").clone() {
                server.start().await.map_err(StartError::ServerInit)?;
            }
        }

        for (name, entry) in &entries {
            let has_auth = entry.config.auth.is_some();
            let has_containers = !entry.config.containers.is_empty();
            if let (true, true, Some(interval)) =
                (has_auth, has_containers, entry.config.polling_interval)
            {
                let emit = self.build_event_handler(name.clone(), entry.bot_identities.clone());
                let policy = BackoffPolicy {
                    cap_delay: entry.config.max_error_window,
                    ..BackoffPolicy::default()
                };
                let poller = Poller::new(Arc::clone(&entry.provider), emit, interval, policy);
                poller.start().await;
                *entry.poller.lock().expect("poller lock poisoned") = Some(poller);
            }
        }

        self.bus.publish(BusNotification::Started);
        Ok(())
    }

    /// Stop sequence (spec §4.8): stop pollers, drain the HTTP surface,
    /// shut down providers, emit `stopped`. Idempotent — a no-op if not
    /// started.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            self.started.store(false, Ordering::SeqCst);
            return;
        }

        let entries: Vec<Arc<RegisteredProvider>> = self
            .providers
            .lock()
            .expect("provider registry lock poisoned")
            .values()
            .cloned()
            .collect();

        for entry in &entries {
            let poller = entry.poller.lock().expect("poller lock poisoned").take();
            if let Some(poller) = poller {
                poller.stop().await;
            }
        }

        if let Some(server) = self.server.lock().expect("server lock poisoned").clone() {
            server.stop().await;
        }

        for entry in &entries {
            entry.provider.shutdown().await;
        }

        self.bus.publish(BusNotification::Stopped);
    }

    /// Exposes the event-handler closure for a registered, enabled provider
    /// so `watcher-server`'s webhook handler can pass it to
    /// `Provider::handle_webhook`.
    pub fn event_handler_for(&self, provider_name: &str) -> Option<EventHandler> {
        let entry = self
            .providers
            .lock()
            .expect("provider registry lock poisoned")
            .get(provider_name)
            .cloned()?;
        Some(self.build_event_handler(provider_name.to_string(), entry.bot_identities.clone()))
    }

    pub fn provider(&self, provider_name: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .lock()
            .expect("provider registry lock poisoned")
            .get(provider_name)
            .map(|entry| Arc::clone(&entry.provider))
    }
}

fn display_string(event: &NormalizedEvent) -> String {
    if event.resource.number == 0 {
        event.resource.repository.clone()
    } else {
        format!("{}#{}", event.resource.repository, event.resource.number)
    }
}
