//! Heimdall error types

use std::fmt;
use std::time::Duration;

/// Broad classification of a failed remote call.
///
/// Retry decisions are a pure function of this kind (plus the optional
/// `retry_after` hint), never of where the error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The remote service itself signalled its rate limit (429).
    Throttled,
    /// Conflict, server fault, timeout or broken connection. Worth retrying.
    Transient,
    /// Malformed request, auth failure, not found, forbidden. Never retried.
    Client,
}

impl ErrorKind {
    /// Stable lowercase label, used for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Throttled => "throttled",
            ErrorKind::Transient => "transient",
            ErrorKind::Client => "client",
        }
    }

    /// Whether errors of this kind may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Client)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The service answered with a non-success status code.
    Status(u16),
    /// The request did not complete in time.
    Timeout,
    /// The connection could not be established or was reset.
    Connection,
    /// The service answered but the payload could not be decoded.
    Decode,
}

/// Error returned by a [`Transport`](crate::transport::Transport) or a
/// caller-supplied fetcher.
///
/// Carries everything the retry executor needs to classify the failure:
/// the status code (if any), a machine-readable code, a human message
/// and the service's retry-after hint.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportError {
    pub fault: Fault,
    /// Machine-readable error code reported by the service (e.g. `"rate_limited"`).
    pub code: Option<String>,
    pub message: String,
    /// Wait hint from the service (`Retry-After`), if present.
    pub retry_after: Option<Duration>,
}

impl TransportError {
    /// Error for a non-success HTTP-equivalent status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            fault: Fault::Status(status),
            code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Shorthand for a 429 carrying an optional retry-after hint.
    pub fn throttled(retry_after: Option<Duration>) -> Self {
        Self {
            fault: Fault::Status(429),
            code: Some("rate_limited".to_string()),
            message: "rate limited by remote service".to_string(),
            retry_after,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            fault: Fault::Timeout,
            code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            fault: Fault::Connection,
            code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            fault: Fault::Decode,
            code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attach a machine-readable error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach a retry-after hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// HTTP-equivalent status code, if the service answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self.fault {
            Fault::Status(status) => Some(status),
            _ => None,
        }
    }

    /// Classify this error.
    ///
    /// - 429 → [`ErrorKind::Throttled`]
    /// - 409, 5xx, timeouts, connection failures → [`ErrorKind::Transient`]
    /// - every other status and undecodable payloads → [`ErrorKind::Client`]
    pub fn kind(&self) -> ErrorKind {
        match self.fault {
            Fault::Status(429) => ErrorKind::Throttled,
            Fault::Status(409) => ErrorKind::Transient,
            Fault::Status(status) if status >= 500 => ErrorKind::Transient,
            Fault::Status(_) => ErrorKind::Client,
            Fault::Timeout | Fault::Connection => ErrorKind::Transient,
            Fault::Decode => ErrorKind::Client,
        }
    }

    /// Whether a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        self.kind().is_retryable()
    }

    /// The service-provided wait hint, only meaningful for throttling.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind() {
            ErrorKind::Throttled => self.retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fault {
            Fault::Status(status) => write!(f, "status {status}")?,
            Fault::Timeout => f.write_str("timeout")?,
            Fault::Connection => f.write_str("connection failed")?,
            Fault::Decode => f.write_str("undecodable response")?,
        }
        if let Some(code) = &self.code {
            write!(f, " [{code}]")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// Heimdall error types
#[derive(Debug, thiserror::Error)]
pub enum HeimdallError {
    /// Invalid limiter, cache or retry parameters. Detected at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The remote call failed with an error that retrying cannot fix.
    #[error("{kind} error after {attempts} attempt(s): {source}")]
    Rejected {
        kind: ErrorKind,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Every allowed attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempt(s), last {kind} error: {source}")]
    RetriesExhausted {
        kind: ErrorKind,
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

impl HeimdallError {
    /// Classification of the final failed attempt, if the error came from a remote call.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            HeimdallError::Rejected { kind, .. } | HeimdallError::RetriesExhausted { kind, .. } => {
                Some(*kind)
            }
            _ => None,
        }
    }

    /// Number of remote attempts made before giving up (0 for local errors).
    pub fn attempts(&self) -> u32 {
        match self {
            HeimdallError::Rejected { attempts, .. }
            | HeimdallError::RetriesExhausted { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Whether the failure is "worked but never succeeded in time" rather than
    /// "can never work".
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, HeimdallError::RetriesExhausted { .. })
    }

    /// The transport error from the final attempt.
    pub fn cause(&self) -> Option<&TransportError> {
        match self {
            HeimdallError::Rejected { source, .. }
            | HeimdallError::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for Heimdall operations
pub type Result<T> = std::result::Result<T, HeimdallError>;
