//! Edge router driven by a service registry.
//!
//! Route definitions arrive as text from a registry backend, are compiled
//! into an immutable table and swapped in atomically. HTTP requests and
//! TLS connections (by SNI) are dispatched against whatever table is current.
//!
//! # Architecture Overview
//!
//! ```text
//!   registry backend ──watch──▶ reconcile ──parse──▶ routing::TableStore
//!   (static / file)                                        │
//!                                                          ▼
//!   Client ──▶ net listener ──▶ http server ──▶ dispatch (matcher + picker) ──▶ target
//!          ──▶ net listener ──▶ tcp_proxy (SNI) ──┘
//!
//!   lifecycle: signals → Shutdown (Running → Draining → Stopped)
//! ```

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod http;
pub mod net;
pub mod routing;

// Route sources
pub mod reconcile;
pub mod registry;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use dispatch::Dispatcher;
pub use http::HttpServer;
pub use lifecycle::{Shutdown, ShutdownState};
