//! Upstream client error types.

use http::Method;
use thiserror::Error;

/// Result type for upstream client operations.
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Boxed error returned by response handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Upstream client errors.
///
/// The variants fall into four groups that the retry executor treats
/// differently:
///
/// - [`UpstreamError::Cancelled`] is returned immediately and never counted
///   against a host.
/// - Transport, status, handler and task errors are attempt failures: they
///   are recorded against the host and retried.
/// - [`UpstreamError::Unavailable`] is produced by the executor itself when
///   no eligible host is left.
/// - Configuration errors are surfaced immediately without touching any
///   host's health.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The caller's cancellation token fired.
    #[error("Request cancelled")]
    Cancelled,

    /// No eligible upstream host remained.
    ///
    /// The retry executor returns this only when no attempt ran; after failed
    /// attempts it returns the last failure itself.
    #[error("All upstream candidates unavailable{}", last_suffix(.last))]
    Unavailable {
        /// Underlying failure, for callers that wrap one themselves. Always
        /// `None` when produced by the retry executor.
        #[source]
        last: Option<Box<UpstreamError>>,
    },

    /// Underlying HTTP client error (connect, timeout, body read, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error status reported by a response handler.
    #[error("Response error: {status} - {message}")]
    Response {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Error returned by a response handler.
    #[error("Handler error: {0}")]
    Handler(#[source] BoxError),

    /// The round-trip task panicked or was torn down.
    #[error("Request task failed: {0}")]
    TaskFailed(String),

    /// HTTP method outside the supported set.
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(Method),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request could not be assembled (bad header value, unencodable body).
    #[error("Failed to build request: {0}")]
    RequestBuild(String),

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn last_suffix(last: &Option<Box<UpstreamError>>) -> String {
    match last {
        Some(e) => format!(": {}", e),
        None => String::new(),
    }
}

impl UpstreamError {
    /// Wrap an arbitrary handler error.
    pub fn handler<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Handler(error.into())
    }

    /// Check if this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error reports that no host was available.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Check if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedMethod(_)
                | Self::InvalidUrl(_)
                | Self::RequestBuild(_)
                | Self::InvalidConfig(_)
        )
    }

    /// Check if this error counts as a failed attempt against a host.
    pub fn is_attempt_failure(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Response { .. } | Self::Handler(_) | Self::TaskFailed(_)
        )
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_timeout())
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_connect())
    }

    /// Get the HTTP status code if this is a response error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// The most recent underlying failure carried by an `Unavailable` error.
    pub fn last_error(&self) -> Option<&UpstreamError> {
        match self {
            Self::Unavailable { last } => last.as_deref(),
            _ => None,
        }
    }
}
