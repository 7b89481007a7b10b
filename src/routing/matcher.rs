//! Route matching logic.
//!
//! # Responsibilities
//! - Select the best route among the candidates of one host
//! - Resolve matcher names from configuration
//!
//! # Design Decisions
//! - Host filtering happens in the table, matchers only see paths
//! - Path matching is case-sensitive
//! - `prefix` picks the longest matching prefix, earliest definition on ties
//! - `glob` supports `*` (any run of characters) and `?` (one character)
//! - No regex to guarantee linear matching

use std::str::FromStr;
use std::sync::Arc;

use crate::routing::error::StrategyError;
use crate::routing::table::Route;

/// Path matching algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    /// Request path equals the route path.
    Exact,
    /// Route path is a prefix of the request path; longest wins.
    Prefix,
    /// Route path is a glob pattern over the whole request path.
    Glob,
}

const MATCHERS: &[(&str, MatcherKind)] = &[
    ("exact", MatcherKind::Exact),
    ("prefix", MatcherKind::Prefix),
    ("glob", MatcherKind::Glob),
];

impl MatcherKind {
    pub fn name(self) -> &'static str {
        MATCHERS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("prefix")
    }

    /// True if a route with path `pattern` accepts `path`.
    pub fn matches(self, pattern: &str, path: &str) -> bool {
        match self {
            MatcherKind::Exact => pattern == path,
            MatcherKind::Prefix => path.starts_with(pattern),
            MatcherKind::Glob => glob_match(pattern, path),
        }
    }

    /// Pick the best route for `path` from routes ordered by specificity.
    pub fn select<'a>(self, routes: &'a [Arc<Route>], path: &str) -> Option<&'a Arc<Route>> {
        match self {
            MatcherKind::Prefix => routes
                .iter()
                .filter(|r| self.matches(&r.path, path))
                .fold(None, |best: Option<&Arc<Route>>, r| match best {
                    Some(b) if b.path.len() >= r.path.len() => Some(b),
                    _ => Some(r),
                }),
            MatcherKind::Exact | MatcherKind::Glob => {
                routes.iter().find(|r| self.matches(&r.path, path))
            }
        }
    }
}

impl Default for MatcherKind {
    fn default() -> Self {
        MatcherKind::Prefix
    }
}

impl FromStr for MatcherKind {
    type Err = StrategyError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        MATCHERS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| StrategyError::UnknownMatcher {
                name: name.to_string(),
                expected: MATCHERS.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", "),
            })
    }
}

/// Glob match over the whole text with single-star backtracking.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
