#![forbid(unsafe_code)]
//! Core event model, reactor/provider traits, dispatcher, and lifecycle
//! supervisor for the event-watcher dispatcher.
//!
//! This crate owns the four coupled subsystems that are hardest to get
//! right: the `NormalizedEvent` model, the `Reactor`/`Provider` interface
//! abstractions, the dispatcher's idempotency-then-emit-then-dispatch
//! closure, and the poller's back-off state machine. Concrete platform
//! adapters live in `watcher-providers`; subprocess invocation lives in
//! `watcher-exec`; the HTTP surface lives in `watcher-server`.

mod command;
mod config;
mod dispatcher;
mod error;
mod event;
mod eventbus;
mod filter;
mod http_retry;
mod lifecycle;
mod poller;
mod provider;
mod reactor;
mod secret;
mod shortid;
mod signature;

pub use command::CommandRunner;
pub use config::{AuthConfig, BotUsername, CommandConfig, ProviderConfig, WatcherConfig};
pub use dispatcher::Watcher;
pub use error::{ProviderError, ReactorError, RegistryMutationError, SecretError, StartError};
pub use event::{Actor, Comment, Metadata, NormalizedEvent, Resource, POLL_ACTION};
pub use eventbus::{BusNotification, EventBus, Subscriber, Subscription};
pub use filter::{should_drop, should_drop_messaging, FilterInput};
pub use http_retry::{retry_with_backoff, RetryPolicy};
pub use lifecycle::ServerLifecycle;
pub use poller::{BackoffPolicy, Poller, PollerState};
pub use provider::{EventHandler, Provider, ProviderMetadata, WebhookRequest};
pub use reactor::{matches_bot_identity, CommentHandle, LastComment, Reactor};
pub use secret::{SecretResolver, SecretSource};
pub use shortid::{safe_id, short_id};
pub use signature::{SignatureEnvelope, SignatureVerifier, REPLAY_WINDOW_SECS};
