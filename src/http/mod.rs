//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, limits)
//!     → Dispatcher::lookup(host, path, trace header)
//!     → hyper client forwards to the picked target
//!     → Send response to client (404 no route, 502 upstream failure, 503 draining)
//! ```

pub mod server;

pub use server::{HttpServer, TRACE_HEADER, X_REQUEST_ID};
