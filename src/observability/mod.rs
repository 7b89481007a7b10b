//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (host, path, target, error)
//!     → logging.rs subscriber (pretty or JSON, filtered by level)
//!
//! Consumers:
//!     → stdout, collected by the process supervisor
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through the HTTP trace span

pub mod logging;
