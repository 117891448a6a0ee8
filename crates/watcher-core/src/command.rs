//! The dispatcher's hook into the `CommandExecutor` (spec §4.6), kept as a
//! trait in `watcher-core` so `watcher-exec`'s concrete implementation can
//! depend on this crate without a cycle.

use std::sync::Arc;

use async_trait::async_trait;

use crate::event::NormalizedEvent;
use crate::reactor::Reactor;

/// Runs the configured external command for a non-duplicate event. Best
/// effort: implementations must swallow their own failures (spec §4.6
/// "Failure isolation") rather than propagating them to the dispatcher.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, event: &NormalizedEvent, reactor: Arc<dyn Reactor>);
}
