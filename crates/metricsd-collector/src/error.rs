use std::time::Duration;

/// Errors a [`Source`](crate::Source) can report for one collection attempt.
///
/// # Examples
///
/// ```rust
/// use metricsd_collector::CollectError;
///
/// let err = CollectError::Status { url: "http://app/metrics".into(), status: 503 };
/// assert!(err.to_string().contains("503"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// The operation's own timeout or the cycle deadline elapsed first.
    #[error("Collect: timed out after {0:?}")]
    Timeout(Duration),

    /// The shared shutdown token fired.
    #[error("Collect: cancelled")]
    Cancelled,

    #[error("Collect: I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Collect: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote answered with a non-2xx status.
    #[error("Collect: unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    /// A response or command output could not be interpreted.
    #[error("Collect: parse error: {0}")]
    Parse(String),

    #[error("Collect: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CollectError>;
