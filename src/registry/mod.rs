//! Registry backends.
//!
//! # Data Flow
//! ```text
//! [registry] backend = "static" | "file" | "consul"
//!     → connect() (construct backend)
//!     → register() (retried with a fixed delay until the deadline)
//!     → watch_services() / watch_manual() (full route text snapshots)
//!     → Reconciler
//!
//! Shutdown:
//!     Draining → deregister() (once, errors logged)
//! ```
//!
//! # Design Decisions
//! - Backends push whole snapshots, never deltas
//! - A closed watch means that source will not change again
//! - Unknown or unavailable backends fail fast instead of retrying

pub mod file;
pub mod static_routes;

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::RegistryConfig;
use crate::lifecycle::Shutdown;

pub use file::FileBackend;
pub use static_routes::StaticBackend;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown registry backend {0:?}, expected one of static, file, consul")]
    UnknownBackend(String),

    #[error("registry backend {0:?} is not available in this build")]
    Unsupported(&'static str),

    #[error("cannot read routes from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timeout registering backend after {0:?}")]
    Timeout(Duration),

    #[error("registration interrupted by shutdown")]
    Interrupted,
}

impl RegistryError {
    /// Errors that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RegistryError::UnknownBackend(_) | RegistryError::Unsupported(_)
        )
    }
}

/// Source of route text and target of this instance's registration.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Announce this instance. Idempotent, may be retried.
    async fn register(&self) -> Result<(), RegistryError>;

    /// Withdraw the announcement. Called once at shutdown.
    async fn deregister(&self) -> Result<(), RegistryError>;

    /// Snapshots of the service-derived route text.
    fn watch_services(&self) -> mpsc::Receiver<String>;

    /// Snapshots of the operator override text.
    fn watch_manual(&self) -> mpsc::Receiver<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Static,
    File,
    Consul,
}

impl FromStr for BackendKind {
    type Err = RegistryError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "static" => Ok(BackendKind::Static),
            "file" => Ok(BackendKind::File),
            "consul" => Ok(BackendKind::Consul),
            other => Err(RegistryError::UnknownBackend(other.to_string())),
        }
    }
}

/// Construct the configured backend.
pub fn connect(config: &RegistryConfig) -> Result<Arc<dyn Backend>, RegistryError> {
    match config.backend.parse::<BackendKind>()? {
        BackendKind::Static => Ok(Arc::new(StaticBackend::new(
            config.static_routes.routes.clone(),
            config.static_routes.manual.clone(),
        ))),
        BackendKind::File => Ok(Arc::new(FileBackend::new(
            &config.file.path,
            config.file.manual_path.as_deref(),
        ))),
        BackendKind::Consul => Err(RegistryError::Unsupported("consul")),
    }
}

/// Connect and register, retrying every `retry` until `timeout` has passed.
///
/// Fatal errors return immediately; a shutdown request interrupts the wait.
pub async fn register_with_retry<F>(
    mut connect: F,
    retry: Duration,
    timeout: Duration,
    shutdown: &Shutdown,
) -> Result<Arc<dyn Backend>, RegistryError>
where
    F: FnMut() -> Result<Arc<dyn Backend>, RegistryError>,
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = match connect() {
            Ok(backend) => backend.register().await.map(|()| backend),
            Err(e) => Err(e),
        };

        match result {
            Ok(backend) => {
                tracing::info!(backend = backend.name(), attempt, "Registered with registry backend");
                return Ok(backend);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => tracing::warn!(error = %e, attempt, "Error initializing backend"),
        }

        if Instant::now() >= deadline {
            return Err(RegistryError::Timeout(timeout));
        }

        tokio::select! {
            _ = tokio::time::sleep(retry) => {}
            _ = shutdown.draining() => return Err(RegistryError::Interrupted),
        }
    }
}

/// A receiver that yields `text` once and then reports the watch closed.
pub(crate) fn snapshot_channel(text: String) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    // Capacity 1 and a fresh channel: cannot be full.
    let _ = tx.try_send(text);
    rx
}
