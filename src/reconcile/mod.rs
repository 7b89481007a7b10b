//! Registry watch reconciliation.
//!
//! # Data Flow
//! ```text
//! watch_services() ──┐
//!                    ├→ PendingUpdate (two slots, last value per source)
//! watch_manual()  ───┘      → merged = service + "\n" + manual
//!                           → unchanged? drop
//!                           → parse (failure keeps the current table)
//!                           → TableStore::set
//!                           → log delta / full config
//! ```
//!
//! # Design Decisions
//! - Single writer: only the reconciler publishes tables
//! - Manual overrides come after service config so later definitions win
//! - A source update keeps the other source's last value
//! - Change detection is a byte comparison of the merged text

pub mod diff;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::lifecycle::shutdown::ShutdownState;
use crate::routing::{parse, ParseError, TableStore};

/// Which registry watch produced an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Service,
    Manual,
}

/// Last known text of each source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingUpdate {
    service: String,
    manual: String,
}

impl PendingUpdate {
    /// Replace one slot; the other keeps its value.
    pub fn record(&mut self, source: Source, text: String) {
        match source {
            Source::Service => self.service = text,
            Source::Manual => self.manual = text,
        }
    }

    /// Manual config goes last so its definitions override service ones.
    pub fn merged(&self) -> String {
        format!("{}\n{}", self.service, self.manual)
    }
}

/// How table changes are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteLogFormat {
    /// `+`/`-` prefixed changed lines.
    #[default]
    Delta,
    /// The full new merged config.
    All,
}

impl RouteLogFormat {
    /// Unknown names fall back to `Delta` with a warning.
    pub fn from_name(name: &str) -> Self {
        match name {
            "delta" => RouteLogFormat::Delta,
            "all" => RouteLogFormat::All,
            other => {
                tracing::warn!(format = other, "Invalid route log format, defaulting to \"delta\"");
                RouteLogFormat::Delta
            }
        }
    }
}

/// Result of feeding one update to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Merged text identical to the last applied one.
    Unchanged,
    /// Parse failed; the active table was left alone.
    Rejected(ParseError),
    /// A new table was published.
    Published { version: u64 },
}

/// Keeps the table store in sync with the registry watches.
#[derive(Debug)]
pub struct Reconciler {
    store: Arc<TableStore>,
    format: RouteLogFormat,
    pending: PendingUpdate,
    last: String,
    rebuilds: u64,
}

impl Reconciler {
    pub fn new(store: Arc<TableStore>, format: RouteLogFormat) -> Self {
        Self {
            store,
            format,
            pending: PendingUpdate::default(),
            last: String::new(),
            rebuilds: 0,
        }
    }

    /// Number of tables published so far.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Record an update from one source and publish a new table if the
    /// merged text changed and parses.
    pub fn apply(&mut self, source: Source, text: String) -> Outcome {
        self.pending.record(source, text);
        let next = self.pending.merged();
        if next == self.last {
            return Outcome::Unchanged;
        }

        let table = match parse(&next) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(error = %e, "Route update rejected, keeping current table");
                return Outcome::Rejected(e);
            }
        };
        let version = table.version();
        let routes = table.len();
        self.store.set(table);
        self.rebuilds += 1;

        tracing::debug!(version, routes, ?source, "Route table published");
        self.log_routes(&next);
        self.last = next;
        Outcome::Published { version }
    }

    fn log_routes(&self, next: &str) {
        match self.format {
            RouteLogFormat::Delta => {
                let delta = diff::format_delta(&self.last, next);
                if !delta.is_empty() {
                    tracing::info!("Config updates\n{}", delta);
                }
            }
            RouteLogFormat::All => tracing::info!("Updated config to\n{}", next),
        }
    }

    /// Apply watch updates until both watches close or shutdown reaches
    /// `Stopped`.
    pub async fn run(
        mut self,
        services: mpsc::Receiver<String>,
        manual: mpsc::Receiver<String>,
        mut shutdown: watch::Receiver<ShutdownState>,
    ) {
        let mut services = Some(services);
        let mut manual = Some(manual);

        loop {
            if *shutdown.borrow() == ShutdownState::Stopped {
                break;
            }
            if services.is_none() && manual.is_none() {
                tracing::info!("Registry watches closed, route table is final");
                break;
            }

            let event = tokio::select! {
                text = recv(&mut services) => Event::Update(Source::Service, text),
                text = recv(&mut manual) => Event::Update(Source::Manual, text),
                changed = shutdown.changed() => match changed {
                    Ok(()) => Event::ShutdownChanged,
                    Err(_) => Event::ShutdownGone,
                },
            };

            match event {
                Event::Update(source, Some(text)) => {
                    self.apply(source, text);
                }
                Event::Update(Source::Service, None) => services = None,
                Event::Update(Source::Manual, None) => manual = None,
                Event::ShutdownChanged => {}
                Event::ShutdownGone => break,
            }
        }
        tracing::debug!(rebuilds = self.rebuilds, "Reconciler stopped");
    }
}

enum Event {
    Update(Source, Option<String>),
    ShutdownChanged,
    ShutdownGone,
}

/// Receive from a watch that may already be closed; a closed one never resolves.
async fn recv(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::routing::{MatcherKind, PickerKind};
    use std::time::Duration;

    const SVC: &str = "route add svc1 /foo http://10.0.0.1:8080 weight=1";

    fn reconciler() -> (Reconciler, Arc<TableStore>) {
        let store = Arc::new(TableStore::default());
        (Reconciler::new(store.clone(), RouteLogFormat::Delta), store)
    }

    #[test]
    fn merge_keeps_the_other_slot() {
        let mut pending = PendingUpdate::default();
        pending.record(Source::Service, "a".into());
        pending.record(Source::Manual, "b".into());
        pending.record(Source::Service, "c".into());
        assert_eq!(pending.merged(), "c\nb");
    }

    #[test]
    fn identical_update_rebuilds_once() {
        let (mut reconciler, _) = reconciler();
        assert!(matches!(
            reconciler.apply(Source::Service, SVC.into()),
            Outcome::Published { .. }
        ));
        assert_eq!(reconciler.apply(Source::Service, SVC.into()), Outcome::Unchanged);
        assert_eq!(reconciler.rebuilds(), 1);

        // Same pair again via the manual slot.
        assert_eq!(reconciler.apply(Source::Manual, String::new()), Outcome::Unchanged);
        assert_eq!(reconciler.rebuilds(), 1);
    }

    #[test]
    fn parse_failure_keeps_current_table() {
        let (mut reconciler, store) = reconciler();
        reconciler.apply(Source::Service, SVC.into());
        let before = store.get();

        let outcome = reconciler.apply(Source::Manual, "route add".into());
        let Outcome::Rejected(err) = outcome else {
            panic!("expected rejection, got {:?}", outcome);
        };
        assert_eq!(err.line, "route add");
        assert!(Arc::ptr_eq(&before, &store.get()));
        assert_eq!(reconciler.rebuilds(), 1);

        // Fixing the manual slot publishes again.
        reconciler.apply(Source::Manual, "# nothing".into());
        assert_eq!(reconciler.rebuilds(), 2);
    }

    #[test]
    fn manual_override_wins() {
        let (mut reconciler, store) = reconciler();
        reconciler.apply(Source::Service, format!("{}\nroute add svc1 /foo http://10.0.0.2:8080 weight=1", SVC));
        reconciler.apply(Source::Manual, "route add svc1 /foo http://10.0.0.1:8080 weight=5".into());

        let table = store.get();
        let route = &table.routes("")[0];
        assert_eq!(route.targets[0].weight, 5.0);
        assert!((route.weights()[0] - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_log_format_falls_back() {
        assert_eq!(RouteLogFormat::from_name("all"), RouteLogFormat::All);
        assert_eq!(RouteLogFormat::from_name("fancy"), RouteLogFormat::Delta);
    }

    #[tokio::test]
    async fn run_applies_watch_updates() {
        let store = Arc::new(TableStore::default());
        let shutdown = Shutdown::new();
        let (svc_tx, svc_rx) = mpsc::channel(4);
        let (man_tx, man_rx) = mpsc::channel(4);

        let task = tokio::spawn(
            Reconciler::new(store.clone(), RouteLogFormat::All).run(svc_rx, man_rx, shutdown.subscribe()),
        );

        svc_tx.send(SVC.to_string()).await.unwrap();
        let mut found = None;
        for _ in 0..50 {
            found = store
                .get()
                .lookup("", "/foo", None, MatcherKind::Prefix, PickerKind::WeightedRandom);
            if found.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(found.unwrap().url.as_str(), "http://10.0.0.1:8080/");

        drop(man_tx);
        shutdown.request_shutdown();
        shutdown.await_stopped(Duration::from_millis(10)).await;
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reconciler should stop")
            .unwrap();
        drop(svc_tx);
    }
}
