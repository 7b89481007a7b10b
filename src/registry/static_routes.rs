//! Static route list from the configuration file.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::registry::{snapshot_channel, Backend, RegistryError};

/// Serves fixed service and manual route text. Nothing to register with.
#[derive(Debug, Clone, Default)]
pub struct StaticBackend {
    routes: String,
    manual: String,
}

impl StaticBackend {
    pub fn new(routes: impl Into<String>, manual: impl Into<String>) -> Self {
        Self {
            routes: routes.into(),
            manual: manual.into(),
        }
    }
}

#[async_trait]
impl Backend for StaticBackend {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn register(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn deregister(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    fn watch_services(&self) -> mpsc::Receiver<String> {
        snapshot_channel(self.routes.clone())
    }

    fn watch_manual(&self) -> mpsc::Receiver<String> {
        snapshot_channel(self.manual.clone())
    }
}
