//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Bind listeners → Register backend → Watch routes → Serve
//!
//! Shutdown (shutdown.rs):
//!     Running → Draining (stop accepting, deregister) → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → request_shutdown()
//! ```
//!
//! # Design Decisions
//! - Ordered startup: listeners bound first, accepting last
//! - Ordered shutdown: stop accept, deregister, drain
//! - Drain has a deadline: remaining work is cut off after it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownState};
pub use startup::{run, serve, Listeners, StartupError};
