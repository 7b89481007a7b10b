//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route definition text (service config + manual overrides)
//!     → parser.rs (route add / del / weight commands)
//!     → table.rs (group by host, order by specificity, normalize weights)
//!     → store.rs (atomic publish of the immutable Table)
//!
//! Incoming request (host, path) or TLS server name
//!     → store.rs (load current Table, lock-free)
//!     → matcher.rs (host filter, then exact / prefix / glob path rule)
//!     → picker.rs (random / round-robin / weighted random)
//!     → Return: Target or no route
//! ```
//!
//! # Design Decisions
//! - Tables are built once per update and never mutated afterwards
//! - Matchers and pickers are closed enums resolved by name at startup
//! - No route is a normal outcome, not an error
//! - Round-robin cursors live in the Route and reset on every rebuild

pub mod error;
pub mod matcher;
pub mod parser;
pub mod picker;
pub mod store;
pub mod table;

pub use error::{ParseError, ParseErrorKind, StrategyError};
pub use matcher::MatcherKind;
pub use parser::parse;
pub use picker::PickerKind;
pub use store::TableStore;
pub use table::{Route, Table, Target};
