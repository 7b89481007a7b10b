//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind addresses, backpressure).
    pub listener: ListenerConfig,

    /// Dispatch strategies and timeouts.
    pub proxy: ProxySettings,

    /// Where routes come from.
    pub registry: RegistryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// HTTP bind address (e.g., "0.0.0.0:9999").
    pub bind_address: String,

    /// Optional TCP+SNI bind address.
    pub tcp_sni_address: Option<String>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9999".to_string(),
            tcp_sni_address: None,
            max_connections: 10_000,
        }
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Picker name: rnd, rr or wrnd.
    pub strategy: String,

    /// Matcher name: exact, prefix or glob.
    pub matcher: String,

    /// Route change logging: delta or all.
    pub log_routes: String,

    /// Upper bound on the drain after a shutdown request.
    pub shutdown_wait_secs: u64,

    pub dial_timeout_secs: u64,

    pub response_header_timeout_secs: u64,

    /// Whole-request deadline on the HTTP frontend.
    pub request_timeout_secs: u64,

    /// How long a TCP+SNI client may take to send its ClientHello.
    pub client_hello_timeout_secs: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            strategy: "wrnd".to_string(),
            matcher: "prefix".to_string(),
            log_routes: "delta".to_string(),
            shutdown_wait_secs: 0,
            dial_timeout_secs: 30,
            response_header_timeout_secs: 0,
            request_timeout_secs: 60,
            client_hello_timeout_secs: 5,
        }
    }
}

impl ProxySettings {
    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.shutdown_wait_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    /// `None` when zero, meaning no limit.
    pub fn response_header_timeout(&self) -> Option<Duration> {
        (self.response_header_timeout_secs > 0)
            .then(|| Duration::from_secs(self.response_header_timeout_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn client_hello_timeout(&self) -> Duration {
        Duration::from_secs(self.client_hello_timeout_secs)
    }
}

/// Registry backend selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Backend name: static, file or consul.
    pub backend: String,

    /// Give up registering after this long.
    pub timeout_secs: u64,

    /// Delay between registration attempts.
    pub retry_secs: u64,

    pub file: FileRegistryConfig,

    #[serde(rename = "static")]
    pub static_routes: StaticRegistryConfig,

    pub consul: ConsulRegistryConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: "static".to_string(),
            timeout_secs: 10,
            retry_secs: 1,
            file: FileRegistryConfig::default(),
            static_routes: StaticRegistryConfig::default(),
            consul: ConsulRegistryConfig::default(),
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }
}

/// Route files for the `file` backend.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FileRegistryConfig {
    /// Service routes.
    pub path: String,

    /// Operator overrides, applied after the service routes.
    pub manual_path: Option<String>,
}

/// Inline route text for the `static` backend.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StaticRegistryConfig {
    pub routes: String,
    pub manual: String,
}

/// Service directory settings. Accepted for config compatibility.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsulRegistryConfig {
    pub addr: String,
    pub service_name: String,
}

impl Default for ConsulRegistryConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:8500".to_string(),
            service_name: "edge-router".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides.
    pub log_level: String,

    /// Output format: pretty or json.
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [registry]
            backend = "file"

            [registry.file]
            path = "/etc/edge-router/routes"
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.backend, "file");
        assert_eq!(config.registry.file.path, "/etc/edge-router/routes");
        assert_eq!(config.registry.file.manual_path, None);
        assert_eq!(config.proxy.strategy, "wrnd");
        assert_eq!(config.proxy.matcher, "prefix");
        assert_eq!(config.listener.bind_address, "0.0.0.0:9999");
        assert_eq!(config.proxy.response_header_timeout(), None);
    }

    #[test]
    fn static_section_is_renamed() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [registry.static]
            routes = "route add a /a http://10.0.0.1:80"
            "#,
        )
        .unwrap();
        assert_eq!(config.registry.static_routes.routes, "route add a /a http://10.0.0.1:80");
        assert!(config.registry.static_routes.manual.is_empty());
    }
}
