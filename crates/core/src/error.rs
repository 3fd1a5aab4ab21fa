//! Error taxonomy shared across the indexing pipeline.
//!
//! Every fallible operation in the core returns [`Result`]. The variants map
//! onto the failure classes the pipeline cares about: transient provider
//! failures are retried by the rate limiter, schema violations are retried by
//! the calling loop, precondition failures abort before any mutation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Provider rejected the call due to rate limiting (HTTP 429 and friends).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// External call exceeded its configured deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Any other failure reported by the LLM or embedding provider.
    #[error("provider error: {0}")]
    Provider(String),

    /// LLM response did not parse or did not conform to the requested schema.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A required upstream index is missing or incomplete.
    #[error("precondition not met: {0}")]
    Precondition(String),

    #[error("checkpoint store: {0}")]
    Checkpoint(#[from] rusqlite::Error),

    #[error("vector store: {0}")]
    VectorStore(String),

    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the retry path in the rate limiter should re-attempt this error.
    ///
    /// Mirrors the classification used for provider SDK errors: explicit
    /// rate-limit and timeout variants are always transient; opaque provider
    /// errors are sniffed for the usual markers.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::RateLimited(_) | Error::Timeout(_) => true,
            Error::Provider(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("rate")
                    || lower.contains("429")
                    || lower.contains("too many requests")
                    || lower.contains("timeout")
                    || lower.contains("timed out")
                    || lower.contains("connection reset")
            }
            _ => false,
        }
    }

    /// Whether this error means a prerequisite index is missing (CLI exit 2).
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Precondition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::RateLimited("429".into()).is_transient());
        assert!(Error::Timeout("deadline".into()).is_transient());
        assert!(Error::Provider("HTTP 429 Too Many Requests".into()).is_transient());
        assert!(Error::Provider("connection reset by peer".into()).is_transient());
        assert!(!Error::Provider("invalid api key".into()).is_transient());
        assert!(!Error::InvalidResponse("bad json".into()).is_transient());
        assert!(!Error::Precondition("no analysis".into()).is_transient());
    }
}
