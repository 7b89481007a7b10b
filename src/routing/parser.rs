//! Route definition language.
//!
//! One command per line, `#` comments and blank lines ignored:
//!
//! ```text
//! route add <service> <host><path> <target-url> [weight=<w>] [tags=<t1>,<t2>] [key=value ...]
//! route del <service> [<host><path> [<target-url>]]
//! route weight <service|*> <host><path> weight=<w> [tags=<t1>,<t2>]
//! ```
//!
//! Commands apply in order. `add` lines sharing a host and path accumulate
//! into one route; re-adding the same target URL replaces the earlier
//! definition in place. `weight` and `tags` also accept the `weight 0.5` /
//! `tags "a,b"` form.

use std::collections::{BTreeMap, HashMap};
use url::Url;

use crate::routing::error::{ParseError, ParseErrorKind};
use crate::routing::table::{Route, Table, Target};

const ADD_USAGE: &str = "route add <service> <source> <target-url> [weight=<w>] [tags=<t1>,<t2>]";
const DEL_USAGE: &str = "route del <service> [<source> [<target-url>]]";
const WEIGHT_USAGE: &str = "route weight <service|*> <source> weight=<w> [tags=<t1>,<t2>]";

/// Parse route definition text into a table.
///
/// Fails on the first malformed line; nothing of a failed parse is kept.
pub fn parse(text: &str) -> Result<Table, ParseError> {
    let mut builder = Builder::default();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let command = parse_line(trimmed).map_err(|kind| ParseError {
            line_no: idx + 1,
            line: line.to_string(),
            kind,
        })?;
        builder.apply(command);
    }
    Ok(builder.build())
}

#[derive(Debug)]
enum Command {
    Add {
        host: String,
        path: String,
        target: Target,
    },
    Del {
        service: String,
        source: Option<(String, String)>,
        url: Option<Url>,
    },
    Weight {
        /// `None` for `*`.
        service: Option<String>,
        host: String,
        path: String,
        weight: f64,
        tags: Vec<String>,
    },
}

fn parse_line(line: &str) -> Result<Command, ParseErrorKind> {
    let tokens = tokenize(line)?;
    match (tokens.first().map(String::as_str), tokens.get(1).map(String::as_str)) {
        (Some("route"), Some("add")) => parse_add(&tokens[2..]),
        (Some("route"), Some("del")) => parse_del(&tokens[2..]),
        (Some("route"), Some("weight")) => parse_weight_command(&tokens[2..]),
        (Some("route"), Some(other)) => Err(ParseErrorKind::UnknownCommand(format!("route {}", other))),
        (Some("route"), None) => Err(ParseErrorKind::MissingArguments(ADD_USAGE)),
        (Some(other), _) => Err(ParseErrorKind::UnknownCommand(other.to_string())),
        (None, _) => Err(ParseErrorKind::UnknownCommand(String::new())),
    }
}

fn parse_add(args: &[String]) -> Result<Command, ParseErrorKind> {
    let [service, source, dst, rest @ ..] = args else {
        return Err(ParseErrorKind::MissingArguments(ADD_USAGE));
    };
    let (host, path) = split_source(source);
    let url = parse_target(dst)?;
    let options = parse_options(rest)?;

    Ok(Command::Add {
        host,
        path,
        target: Target {
            service: service.clone(),
            url,
            tags: options.tags,
            weight: options.weight.unwrap_or(0.0),
            fixed_weight: options.weight.is_some(),
            opts: options.opts,
        },
    })
}

fn parse_del(args: &[String]) -> Result<Command, ParseErrorKind> {
    match args {
        [] => Err(ParseErrorKind::MissingArguments(DEL_USAGE)),
        [service] => Ok(Command::Del {
            service: service.clone(),
            source: None,
            url: None,
        }),
        [service, source] => Ok(Command::Del {
            service: service.clone(),
            source: Some(split_source(source)),
            url: None,
        }),
        [service, source, dst] => Ok(Command::Del {
            service: service.clone(),
            source: Some(split_source(source)),
            url: Some(parse_target(dst)?),
        }),
        [_, _, _, extra, ..] => Err(ParseErrorKind::InvalidOption(extra.clone())),
    }
}

fn parse_weight_command(args: &[String]) -> Result<Command, ParseErrorKind> {
    let [service, source, rest @ ..] = args else {
        return Err(ParseErrorKind::MissingArguments(WEIGHT_USAGE));
    };
    let options = parse_options(rest)?;
    if let Some(key) = options.opts.keys().next() {
        return Err(ParseErrorKind::InvalidOption(key.clone()));
    }
    let weight = options
        .weight
        .ok_or(ParseErrorKind::MissingArguments(WEIGHT_USAGE))?;
    let (host, path) = split_source(source);

    Ok(Command::Weight {
        service: (service != "*").then(|| service.clone()),
        host,
        path,
        weight,
        tags: options.tags,
    })
}

#[derive(Debug, Default)]
struct Options {
    weight: Option<f64>,
    tags: Vec<String>,
    opts: BTreeMap<String, String>,
}

fn parse_options(tokens: &[String]) -> Result<Options, ParseErrorKind> {
    let mut options = Options::default();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].as_str();
        let (key, value) = match token.split_once('=') {
            Some((key, value)) => {
                i += 1;
                (key, value.to_string())
            }
            None if matches!(token, "weight" | "tags" | "opts") => {
                let value = tokens
                    .get(i + 1)
                    .ok_or(ParseErrorKind::MissingArguments(option_usage(token)))?;
                i += 2;
                (token, value.clone())
            }
            None => return Err(ParseErrorKind::InvalidOption(token.to_string())),
        };

        match key {
            "weight" => options.weight = Some(parse_weight(&value)?),
            "tags" => options.tags = split_list(&value),
            "opts" => {
                for pair in value.split_whitespace() {
                    let (k, v) = pair
                        .split_once('=')
                        .filter(|(k, _)| !k.is_empty())
                        .ok_or_else(|| ParseErrorKind::InvalidOption(pair.to_string()))?;
                    options.opts.insert(k.to_string(), v.to_string());
                }
            }
            "" => return Err(ParseErrorKind::InvalidOption(token.to_string())),
            key => {
                options.opts.insert(key.to_string(), value);
            }
        }
    }
    Ok(options)
}

fn option_usage(key: &str) -> &'static str {
    match key {
        "weight" => "weight=<w>",
        "tags" => "tags=<t1>,<t2>",
        _ => "opts \"<key>=<value> ...\"",
    }
}

fn parse_weight(value: &str) -> Result<f64, ParseErrorKind> {
    value
        .parse::<f64>()
        .ok()
        .filter(|w| w.is_finite() && *w >= 0.0)
        .ok_or_else(|| ParseErrorKind::InvalidWeight(value.to_string()))
}

fn parse_target(raw: &str) -> Result<Url, ParseErrorKind> {
    let url = Url::parse(raw).map_err(|e| ParseErrorKind::InvalidTarget {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ParseErrorKind::InvalidTarget {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

/// `example.com/api` → (`example.com`, `/api`), `/api` → (``, `/api`),
/// `example.com` → (`example.com`, `/`).
fn split_source(source: &str) -> (String, String) {
    match source.find('/') {
        Some(i) => (source[..i].to_ascii_lowercase(), source[i..].to_string()),
        None => (source.to_ascii_lowercase(), "/".to_string()),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whitespace-separated tokens; double quotes group and are dropped.
fn tokenize(line: &str) -> Result<Vec<String>, ParseErrorKind> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quote = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quote = !in_quote;
                in_token = true;
            }
            c if c.is_whitespace() && !in_quote => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_quote {
        return Err(ParseErrorKind::UnterminatedQuote);
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[derive(Debug)]
struct PendingRoute {
    host: String,
    path: String,
    targets: Vec<Target>,
}

/// Accumulates commands in definition order.
#[derive(Debug, Default)]
struct Builder {
    routes: Vec<PendingRoute>,
    index: HashMap<(String, String), usize>,
}

impl Builder {
    fn apply(&mut self, command: Command) {
        match command {
            Command::Add { host, path, target } => {
                let idx = self.route_index(host, path);
                let targets = &mut self.routes[idx].targets;
                match targets.iter_mut().find(|t| t.url == target.url) {
                    Some(existing) => *existing = target,
                    None => targets.push(target),
                }
            }
            Command::Del { service, source, url } => {
                for route in &mut self.routes {
                    if let Some((host, path)) = &source {
                        if route.host != *host || route.path != *path {
                            continue;
                        }
                    }
                    route
                        .targets
                        .retain(|t| t.service != service || url.as_ref().is_some_and(|u| t.url != *u));
                }
            }
            Command::Weight { service, host, path, weight, tags } => {
                let Some(&idx) = self.index.get(&(host.clone(), path.clone())) else {
                    tracing::debug!(host = %host, path = %path, "Weight for unknown route ignored");
                    return;
                };
                for target in &mut self.routes[idx].targets {
                    let service_matches = service.as_ref().map_or(true, |s| target.service == *s);
                    if service_matches && target.has_tags(&tags) {
                        target.weight = weight;
                        target.fixed_weight = true;
                    }
                }
            }
        }
    }

    fn route_index(&mut self, host: String, path: String) -> usize {
        let key = (host, path);
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        self.routes.push(PendingRoute {
            host: key.0.clone(),
            path: key.1.clone(),
            targets: Vec::new(),
        });
        let idx = self.routes.len() - 1;
        self.index.insert(key, idx);
        idx
    }

    fn build(self) -> Table {
        Table::from_routes(
            self.routes
                .into_iter()
                .filter(|r| !r.targets.is_empty())
                .map(|r| Route::new(r.host, r.path, r.targets))
                .collect(),
        )
    }
}
