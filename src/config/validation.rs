//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Strategy, matcher and backend names resolve
//! - Bind addresses parse and limits are non-zero
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before anything binds or registers

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::registry::BackendKind;
use crate::routing::{MatcherKind, PickerKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = config.proxy.strategy.parse::<PickerKind>() {
        errors.push(ValidationError::new("proxy.strategy", e.to_string()));
    }
    if let Err(e) = config.proxy.matcher.parse::<MatcherKind>() {
        errors.push(ValidationError::new("proxy.matcher", e.to_string()));
    }

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if let Some(addr) = &config.listener.tcp_sni_address {
        check_addr(&mut errors, "listener.tcp_sni_address", addr);
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.proxy.request_timeout_secs == 0 {
        errors.push(ValidationError::new("proxy.request_timeout_secs", "must be greater than 0"));
    }
    if config.proxy.client_hello_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "proxy.client_hello_timeout_secs",
            "must be greater than 0",
        ));
    }

    match config.registry.backend.parse::<BackendKind>() {
        Ok(BackendKind::File) if config.registry.file.path.is_empty() => {
            errors.push(ValidationError::new("registry.file.path", "required by the file backend"));
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new("registry.backend", e.to_string())),
    }
    if config.registry.retry_secs == 0 {
        errors.push(ValidationError::new("registry.retry_secs", "must be greater than 0"));
    }

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format {:?}, expected pretty or json", other),
        )),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, addr: &str) {
    if let Err(e) = addr.parse::<SocketAddr>() {
        errors.push(ValidationError::new(field, format!("{:?}: {}", addr, e)));
    }
}
