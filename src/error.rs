//! Error types for onesignal-cleaner
//!
//! The taxonomy follows the run's failure model:
//! - Acquisition errors ([`RegistryError`], [`Error::ReadinessTimeoutExceeded`]) abort the run
//! - Download errors ([`DownloadError`]) abort the run
//! - Decode errors ([`DecodeError`]) abort the run, the stream offset is not recoverable
//! - Per-record parse errors and per-subscriber deletion errors are absorbed by the
//!   cleanup pipeline and only surface through logs, events and the run summary

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for onesignal-cleaner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for onesignal-cleaner
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "cleanup.concurrency")
        key: Option<String>,
    },

    /// The request could not be sent or the response could not be read
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The registry rejected or garbled one of its two calls
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Artifact download failed
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Artifact could not be opened or decoded
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The export never became ready within the configured deadline
    #[error("readiness timeout of {timeout_secs} seconds has been exceeded while requesting {target}")]
    ReadinessTimeoutExceeded {
        /// Configured readiness timeout in seconds
        timeout_secs: u64,
        /// What was being polled ("export url" or the artifact url)
        target: String,
    },

    /// Run stopped by an external cancellation signal
    #[error("run cancelled")]
    Cancelled,

    /// Deletions failed and the run is configured to fail on that
    #[error("{failed} of {attempted} deletions failed")]
    DeletionsFailed {
        /// Number of failed deletions
        failed: u64,
        /// Number of attempted deletions
        attempted: u64,
    },

    /// A deletion worker panicked or its queue closed unexpectedly
    #[error("deletion worker failed: {0}")]
    WorkerFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error wrapped with a description of what the run was doing
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted
        context: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Innermost error, skipping any [`Error::Context`] wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Adds a description of the failing step to an error on its way up
pub trait ResultExt<T> {
    /// Wrap the error (if any) in [`Error::Context`]
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }
}

/// Failures of the [`Transport`](crate::transport::Transport) capability
#[derive(Debug, Error)]
pub enum TransportError {
    /// reqwest failed to send the request or receive the response head
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    /// The response body stream broke off after the status line arrived
    #[error("body stream failed: {0}")]
    Body(String),

    /// Failure injected by a test transport
    #[error("simulated transport failure: {0}")]
    Simulated(String),
}

impl TransportError {
    /// Whether the failure looks transient (connection refused, timeout)
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_timeout() || e.is_connect(),
            TransportError::Body(_) => false,
            TransportError::Simulated(_) => true,
        }
    }
}

/// Registry API errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Export trigger answered with something other than 200
    #[error("export request failed with status {status}: {body}")]
    ExportRequestFailed {
        /// HTTP status code
        status: u16,
        /// Response body, kept for diagnostics
        body: String,
    },

    /// Delete call answered with a non-200 status or `success: false`
    #[error("deletion of {id} failed with status {status}: {body}")]
    DeletionFailed {
        /// Subscriber id
        id: String,
        /// HTTP status code
        status: u16,
        /// Response body, kept for diagnostics
        body: String,
    },

    /// 200 response whose JSON envelope is unusable
    #[error("malformed {operation} response: {reason}")]
    MalformedResponse {
        /// Which call produced it ("export", "delete")
        operation: &'static str,
        /// What was wrong with it
        reason: String,
    },
}

/// Artifact download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Response had no usable Content-Length header
    #[error("response has no valid Content-Length header")]
    MissingContentLength,

    /// Fewer (or more) bytes were written than declared
    #[error("wrote {written} bytes, expected {expected}")]
    ShortWrite {
        /// Declared Content-Length
        expected: u64,
        /// Bytes actually written to the sink
        written: u64,
    },

    /// Download was handed a response that is not a 200
    #[error("unexpected status {status}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
    },
}

/// Record stream decode errors
#[derive(Debug, Error)]
pub enum DecodeError {
    /// File, gzip header or CSV header row unreadable
    #[error("failed to open {path}: {reason}")]
    OpenFailed {
        /// Artifact path
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A data row could not be decoded
    #[error("failed to decode row #{row}: {reason}")]
    DecodeFailed {
        /// 1-based data row number (header excluded)
        row: u64,
        /// What went wrong
        reason: String,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_and_root_unwraps() {
        let res: std::result::Result<(), DownloadError> = Err(DownloadError::MissingContentLength);
        let err = res.context("downloading export").unwrap_err();

        assert_eq!(
            err.to_string(),
            "downloading export: download error: response has no valid Content-Length header"
        );
        assert!(matches!(
            err.root(),
            Error::Download(DownloadError::MissingContentLength)
        ));
    }

    #[test]
    fn nested_context_reaches_innermost() {
        let inner: Result<()> = Err(Error::Cancelled);
        let err = inner.context("cleaning").context("run").unwrap_err();
        assert!(matches!(err.root(), Error::Cancelled));
        assert!(err.to_string().starts_with("run: cleaning: "));
    }

    #[test]
    fn timeout_message_carries_value() {
        let err = Error::ReadinessTimeoutExceeded {
            timeout_secs: 600,
            target: "export url".into(),
        };
        assert_eq!(
            err.to_string(),
            "readiness timeout of 600 seconds has been exceeded while requesting export url"
        );
    }

    #[test]
    fn simulated_transport_failure_is_transient() {
        assert!(TransportError::Simulated("reset".into()).is_transient());
        assert!(!TransportError::Body("eof".into()).is_transient());
    }
}
