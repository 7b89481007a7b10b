//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (in-flight tracking for drain)
//!     → sni.rs (ClientHello server name, TCP+SNI only)
//!     → tcp_proxy.rs (dial target, copy bytes)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is passed through, never terminated

pub mod connection;
pub mod listener;
pub mod sni;
pub mod tcp_proxy;

pub use listener::{Listener, ListenerError};
pub use tcp_proxy::TcpSniProxy;
