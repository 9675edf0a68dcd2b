use thiserror::Error;

/// Error taxonomy for the kumo engine.
///
/// Only [`SourceError::Config`] is ever surfaced by the top-level fetch
/// path, and only at construction time. Transport errors are retried and
/// then degraded to empty per-subject / per-episode contributions.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// Invalid or missing configuration (selector, pattern, URL template).
    /// Detected when a source is built, never during a fetch.
    #[error("config error: {0}")]
    Config(String),

    /// Transport-level failure (connect, DNS, reset).
    #[error("network error: {0}")]
    Network(String),

    /// HTTP-level failure (non-success status, unreadable body).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Request exceeded its deadline.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),
}

impl SourceError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Network(_) | SourceError::Timeout(_) => true,
            SourceError::Http(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            SourceError::Config(_) => false,
        }
    }
}
