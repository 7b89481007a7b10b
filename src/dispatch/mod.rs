//! Request and connection dispatch.
//!
//! # Data Flow
//! ```text
//! HTTP request (host, path, trace header) ──→ lookup()      ──┐
//! TLS ClientHello (server name)          ──→ lookup_host() ──┤
//!                                                            ↓
//!                               TableStore::get() (one snapshot per call)
//!                                                            ↓
//!                                         Matcher → Picker → Target
//! ```
//!
//! # Design Decisions
//! - Strategies are resolved once at startup, never per request
//! - Each lookup reads the current table exactly once and never blocks

use std::sync::Arc;

use crate::config::ProxySettings;
use crate::routing::{MatcherKind, PickerKind, StrategyError, TableStore, Target};

/// Entry point from the frontends into the routing table.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<TableStore>,
    matcher: MatcherKind,
    picker: PickerKind,
}

impl Dispatcher {
    pub fn new(store: Arc<TableStore>, matcher: MatcherKind, picker: PickerKind) -> Self {
        Self {
            store,
            matcher,
            picker,
        }
    }

    /// Resolve the configured strategy names.
    pub fn from_settings(store: Arc<TableStore>, settings: &ProxySettings) -> Result<Self, StrategyError> {
        let matcher: MatcherKind = settings.matcher.parse()?;
        let picker: PickerKind = settings.strategy.parse()?;
        tracing::info!(
            matcher = matcher.name(),
            strategy = picker.name(),
            "Using routing strategy"
        );
        Ok(Self::new(store, matcher, picker))
    }

    /// The table store lookups read from.
    pub fn store(&self) -> &Arc<TableStore> {
        &self.store
    }

    /// Target for an HTTP request, or `None` when no route applies.
    pub fn lookup(&self, host: &str, path: &str, trace: Option<&str>) -> Option<Arc<Target>> {
        let trace = trace.filter(|t| !t.is_empty());
        let target = self
            .store
            .get()
            .lookup(host, path, trace, self.matcher, self.picker);
        if target.is_none() {
            tracing::warn!(host, path, "No route");
        }
        target
    }

    /// Target for a TLS server name, or `None` when no host route applies.
    pub fn lookup_host(&self, server_name: &str) -> Option<Arc<Target>> {
        let target = self.store.get().lookup_host(server_name, self.picker);
        if target.is_none() {
            tracing::warn!(server_name, "No route");
        }
        target
    }
}
