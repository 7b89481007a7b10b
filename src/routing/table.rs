//! Immutable route table.
//!
//! # Responsibilities
//! - Hold the compiled routes of one update, grouped by host
//! - Order routes by specificity (longest path first, stable)
//! - Normalize target weights once at build time
//! - Resolve a request or a TLS server name to a Target
//!
//! # Design Decisions
//! - Built once, never mutated: a change produces a new Table
//! - Each table carries a process-unique version for logging
//! - The round-robin cursor is the only interior state and it is atomic

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

use crate::routing::matcher::MatcherKind;
use crate::routing::picker::PickerKind;

/// Relaxed is enough, versions only need to be unique.
static TABLE_VERSION: AtomicU64 = AtomicU64::new(1);

/// One backend destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Service that announced this target.
    pub service: String,
    /// Destination. `http://host:port` for HTTP, `tcp://host:port` for TCP+SNI.
    pub url: Url,
    pub tags: Vec<String>,
    /// Raw weight as written. Only meaningful when `fixed_weight` is set.
    pub weight: f64,
    /// True when the weight was set explicitly instead of auto-normalized.
    pub fixed_weight: bool,
    /// Extra `key=value` options from the route line.
    pub opts: BTreeMap<String, String>,
}

impl Target {
    /// Path prefix the HTTP frontend removes before forwarding.
    pub fn strip_prefix(&self) -> Option<&str> {
        self.opts.get("strip").map(String::as_str)
    }

    /// True if the target carries every tag in `tags`.
    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }

    /// `host:port` to dial, if the URL names both.
    pub fn authority(&self) -> Option<String> {
        let host = self.url.host_str()?;
        let port = self.url.port_or_known_default()?;
        Some(format!("{}:{}", host, port))
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// A host/path rule and its weighted targets.
#[derive(Debug)]
pub struct Route {
    /// Lower-cased host, empty for any host.
    pub host: String,
    pub path: String,
    pub targets: Vec<Arc<Target>>,
    /// Normalized weights, parallel to `targets`, summing to 1.
    weights: Vec<f64>,
    cursor: AtomicUsize,
}

impl Route {
    pub fn new(host: impl Into<String>, path: impl Into<String>, targets: Vec<Target>) -> Self {
        let weights = normalize_weights(&targets);
        Self {
            host: host.into(),
            path: path.into(),
            targets: targets.into_iter().map(Arc::new).collect(),
            weights,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Normalized selection probabilities, in target order.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Advance the round-robin cursor and return its previous value.
    pub(crate) fn next_cursor(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed)
    }
}

/// Fixed weights are fractions of traffic; the remainder is shared evenly by
/// the targets without one. All-unset or all-zero weights give a uniform split.
fn normalize_weights(targets: &[Target]) -> Vec<f64> {
    let n = targets.len();
    if n == 0 {
        return Vec::new();
    }
    let uniform = vec![1.0 / n as f64; n];

    let dynamic = targets.iter().filter(|t| !t.fixed_weight).count();
    if dynamic == n {
        return uniform;
    }

    let fixed_sum: f64 = targets
        .iter()
        .filter(|t| t.fixed_weight)
        .map(|t| t.weight)
        .sum();
    let share = if dynamic > 0 && fixed_sum < 1.0 {
        (1.0 - fixed_sum) / dynamic as f64
    } else {
        0.0
    };

    let raw: Vec<f64> = targets
        .iter()
        .map(|t| if t.fixed_weight { t.weight } else { share })
        .collect();
    let total: f64 = raw.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return uniform;
    }
    raw.into_iter().map(|w| w / total).collect()
}

/// Compiled snapshot of every route, keyed by host.
#[derive(Debug)]
pub struct Table {
    version: u64,
    hosts: HashMap<String, Vec<Arc<Route>>>,
}

impl Table {
    /// A table with no routes. Every lookup returns none.
    pub fn empty() -> Self {
        Self::from_routes(Vec::new())
    }

    /// Group routes by host and order each group by specificity.
    ///
    /// Routes are expected in definition order; the sort is stable so equal
    /// path lengths keep that order.
    pub fn from_routes(routes: Vec<Route>) -> Self {
        let mut hosts: HashMap<String, Vec<Arc<Route>>> = HashMap::new();
        for route in routes {
            hosts.entry(route.host.clone()).or_default().push(Arc::new(route));
        }
        for routes in hosts.values_mut() {
            routes.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        }
        Self {
            version: TABLE_VERSION.fetch_add(1, Ordering::Relaxed),
            hosts,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Routes registered for exactly this host, most specific first.
    pub fn routes(&self, host: &str) -> &[Arc<Route>] {
        self.hosts.get(host).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of routes across all hosts.
    pub fn len(&self) -> usize {
        self.hosts.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve an HTTP request to a target.
    ///
    /// Hosts are tried in order: the full lower-cased host, the host without
    /// its port, then the any-host routes. A non-empty `trace` hint logs each
    /// step at info level.
    pub fn lookup(
        &self,
        host: &str,
        path: &str,
        trace: Option<&str>,
        matcher: MatcherKind,
        picker: PickerKind,
    ) -> Option<Arc<Target>> {
        for candidate in host_candidates(host) {
            let routes = self.routes(&candidate);
            if let Some(trace) = trace {
                tracing::info!(trace, host = %candidate, path, routes = routes.len(), "Tracing route lookup");
            }
            let Some(route) = matcher.select(routes, path) else {
                continue;
            };
            let target = picker.pick(route).cloned();
            if let Some(trace) = trace {
                tracing::info!(
                    trace,
                    route = %format!("{}{}", route.host, route.path),
                    target = ?target.as_ref().map(|t| t.url.as_str()),
                    "Route matched"
                );
            }
            return target;
        }
        if let Some(trace) = trace {
            tracing::info!(trace, host, path, "No route matched");
        }
        None
    }

    /// Resolve a TLS server name to a target. Only exact host routes apply;
    /// the first route that yields a target wins.
    pub fn lookup_host(&self, server_name: &str, picker: PickerKind) -> Option<Arc<Target>> {
        let host = server_name.to_ascii_lowercase();
        self.routes(&host)
            .iter()
            .find_map(|route| picker.pick(route).cloned())
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::empty()
    }
}

fn host_candidates(host: &str) -> Vec<String> {
    let host = host.to_ascii_lowercase();
    let mut candidates = vec![host.clone()];
    // "[::1]" splits into ("[:", "1]") and is left alone by the digit check.
    if let Some((name, port)) = host.rsplit_once(':') {
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            candidates.push(name.to_string());
        }
    }
    if !host.is_empty() {
        candidates.push(String::new());
    }
    candidates
}
