//! Error types for lyre-stream
//!
//! Every variant maps onto one [`ErrorKind`]; the pipeline decides whether to
//! continue from the kind alone.

use lyre_common::ErrorKind;
use thiserror::Error;

/// Main error type for the streaming engine
#[derive(Error, Debug)]
pub enum Error {
    /// Container bytes cannot be parsed
    #[error("Malformed {container} container: {message}")]
    MalformedContainer {
        container: &'static str,
        message: String,
    },

    /// One elementary frame failed to decode
    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),

    /// Buffer pool or queue exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Byte source failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Content type maps to no supported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Decoder construction or fatal decode failure
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Encoder construction or encode failure
    #[error("Audio encode error: {0}")]
    Encode(String),

    /// Resampler failure
    #[error("Resample error: {0}")]
    Resample(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Streaming switched off in config
    #[error("Streaming is disabled")]
    Disabled,

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors surfaced from lyre-common
    #[error(transparent)]
    Common(#[from] lyre_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the lyre-stream Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(container: &'static str, message: impl Into<String>) -> Self {
        Error::MalformedContainer {
            container,
            message: message.into(),
        }
    }

    /// Classification used for recovery decisions and API responses
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedContainer { .. } => ErrorKind::MalformedContainer,
            Error::CorruptFrame(_) => ErrorKind::CorruptFrame,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::Upstream(_) | Error::Io(_) => ErrorKind::Upstream,
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::Decode(_) | Error::Resample(_) => ErrorKind::Decode,
            Error::Encode(_) => ErrorKind::Encode,
            Error::BadRequest(_) | Error::NotFound(_) => ErrorKind::BadRequest,
            Error::Disabled => ErrorKind::Disabled,
            Error::Common(e) => e.kind(),
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_and_corrupt_are_distinct() {
        let malformed = Error::malformed("flv", "bad magic");
        let corrupt = Error::CorruptFrame("bad aac frame".into());
        assert_eq!(malformed.kind(), ErrorKind::MalformedContainer);
        assert_eq!(corrupt.kind(), ErrorKind::CorruptFrame);
        assert!(!malformed.is_recoverable());
        assert!(corrupt.is_recoverable());
        assert!(malformed.to_string().contains("flv"));
    }

    #[test]
    fn test_common_errors_keep_their_kind() {
        let err: Error = lyre_common::AudioFormat::classify("text/plain").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }
}
