//! Common error types for Lyre
//!
//! `ErrorKind` is the user-visible classification carried in every API error
//! body. The engine crate maps its own errors onto these kinds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common result type for Lyre operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classification shared by the engine and the HTTP surface
///
/// The first five kinds form the pipeline taxonomy. Malformed containers abort
/// the pipeline while corrupt frames are skipped by the decode stage; the two are
/// kept apart on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Container bytes cannot be parsed (bad magic, impossible sizes)
    MalformedContainer,
    /// A single elementary frame failed to decode
    CorruptFrame,
    /// A bounded resource (buffer pool) is exhausted
    ResourceExhausted,
    /// The byte source failed (network, file)
    Upstream,
    /// The declared content type maps to no supported format
    UnsupportedFormat,
    /// Malformed request input
    BadRequest,
    /// The requested feature is switched off
    Disabled,
    /// Decoder construction or fatal decode failure
    Decode,
    /// Encoder construction or encode failure
    Encode,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Whether a pipeline may continue after an error of this kind
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::CorruptFrame | ErrorKind::ResourceExhausted)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::MalformedContainer => "MALFORMED_CONTAINER",
            ErrorKind::CorruptFrame => "CORRUPT_FRAME",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::Upstream => "UPSTREAM",
            ErrorKind::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Disabled => "DISABLED",
            ErrorKind::Decode => "DECODE",
            ErrorKind::Encode => "ENCODE",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Common error types across Lyre crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Content type does not map to a supported format
    #[error("Unsupported format '{content_type}' (supported: {supported})")]
    UnsupportedFormat {
        content_type: String,
        supported: String,
    },

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classification used in API responses
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Error::InvalidInput(_) => ErrorKind::BadRequest,
            Error::Io(_) | Error::Config(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::MalformedContainer).unwrap();
        assert_eq!(json, "\"MALFORMED_CONTAINER\"");
        assert_eq!(ErrorKind::CorruptFrame.to_string(), "CORRUPT_FRAME");
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(ErrorKind::CorruptFrame.is_recoverable());
        assert!(ErrorKind::ResourceExhausted.is_recoverable());
        assert!(!ErrorKind::MalformedContainer.is_recoverable());
        assert!(!ErrorKind::Upstream.is_recoverable());
    }
}
