//! Routing error types.

use thiserror::Error;

/// A route definition that could not be parsed.
///
/// Parsing is all-or-nothing: one bad line rejects the whole update.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("route line {line_no}: {kind}: {line:?}")]
pub struct ParseError {
    /// 1-based line number within the merged text.
    pub line_no: usize,
    /// The offending line, untrimmed.
    pub line: String,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("missing arguments, expected `{0}`")]
    MissingArguments(&'static str),

    #[error("invalid target url {url:?} ({reason})")]
    InvalidTarget { url: String, reason: String },

    #[error("invalid weight {0:?}")]
    InvalidWeight(String),

    #[error("invalid option {0:?}, expected key=value")]
    InvalidOption(String),

    #[error("unterminated quote")]
    UnterminatedQuote,
}

/// Unknown matcher or picker name. Always fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    #[error("unknown route matcher {name:?}, expected one of {expected}")]
    UnknownMatcher { name: String, expected: String },

    #[error("unknown routing strategy {name:?}, expected one of {expected}")]
    UnknownPicker { name: String, expected: String },
}
