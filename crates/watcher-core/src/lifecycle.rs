//! Abstract hook the `Watcher` uses to start/stop the HTTP surface without
//! depending on `watcher-server` (spec §4.8 start/stop sequence steps 3/3).

use async_trait::async_trait;

use crate::error::ProviderError;

#[async_trait]
pub trait ServerLifecycle: Send + Sync {
    async fn start(&self) -> Result<(), ProviderError>;
    async fn stop(&self);
}
