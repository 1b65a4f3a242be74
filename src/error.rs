//! Error types for LexRAG

use thiserror::Error;

use crate::core::SourceKind;

/// Result type alias using LexRAG's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for LexRAG
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error
    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    /// A retrieval backend failed or is unreachable
    #[error("{adapter} adapter unavailable: {reason}")]
    AdapterUnavailable {
        /// Which adapter failed
        adapter: SourceKind,
        /// Backend-specific reason
        reason: String,
    },

    /// Every adapter in the fallback chain failed
    #[error("All retrieval sources exhausted")]
    AllSourcesExhausted,

    /// Anaphora resolution produced several candidates
    #[error("Ambiguous context: {0:?}")]
    AmbiguousContext(Vec<String>),

    /// Semantic cache backend fault
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Query classifier fault
    #[error("Classification unavailable: {0}")]
    ClassificationUnavailable(String),

    /// Memory store fault; fatal for a request
    #[error("Memory store unavailable: {0}")]
    MemoryUnavailable(String),

    /// Embedding model error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Answer generator error
    #[error("Generator error: {0}")]
    Generator(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unauthorized access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::RateLimit(_) | Error::Timeout(_) | Error::Database(_)
        )
    }

    /// Check if error is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::NotFound(_) | Error::Unauthorized(_)
        )
    }

    /// Whether the pipeline absorbs this error into a degraded response
    /// instead of failing the request.
    pub fn is_degradable(&self) -> bool {
        !matches!(
            self,
            Error::MemoryUnavailable(_) | Error::Config(_) | Error::InvalidInput(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(Error::Timeout("adapter".into()).is_retryable());
        assert!(Error::RateLimit("429".into()).is_retryable());
        assert!(!Error::InvalidInput("empty".into()).is_retryable());
    }

    #[test]
    fn test_memory_faults_are_fatal() {
        assert!(!Error::MemoryUnavailable("down".into()).is_degradable());
        assert!(Error::CacheUnavailable("down".into()).is_degradable());
        assert!(Error::AdapterUnavailable {
            adapter: SourceKind::Web,
            reason: "503".into()
        }
        .is_degradable());
    }

    #[test]
    fn test_adapter_error_message() {
        let err = Error::AdapterUnavailable {
            adapter: SourceKind::Graph,
            reason: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "graph adapter unavailable: connection refused");
    }
}
