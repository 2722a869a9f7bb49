//! Error types for Agora retrieval operations.
//!
//! This module provides the common `Error` type and `Result<T>` alias used
//! across all Agora crates. Uses `thiserror` for derive macros.
//!
//! # Taxonomy
//!
//! | Variant | Meaning | Caller reaction |
//! |---------|---------|-----------------|
//! | `StoreUnavailable` | Vector store unreachable or not ready | Fall back to a non-vector path |
//! | `EmbeddingUnavailable` | Every embedding provider failed or is backing off | Fall back |
//! | `Timeout` | A deadline elapsed before the external call finished | Fall back |
//! | `BadRequest` | Dimension mismatch, malformed filter, bad options | Caller bug, never retried |
//! | `IndexingFailure` | Best-effort indexing did not complete | Log and discard |
//! | `ProfileUnavailable` | No interaction signal and no fallback configured | Show non-personalised content |
//! | `RateLimited` / `Provider` | A single provider failed | Absorbed by provider failover |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in Agora retrieval operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The vector store is unreachable or reported itself as not ready.
    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    /// All embedding providers were tried and failed (or are in backoff).
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The request is malformed (dimension mismatch, bad filter, bad options).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Indexing an entity failed. Never propagated to the triggering write.
    #[error("Indexing failed for {entity}: {source}")]
    IndexingFailure {
        /// The entity that could not be indexed, e.g. `post:42`.
        entity: String,
        /// The underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// No interaction signal exists for the user and no fallback is configured.
    #[error("Profile unavailable: {0}")]
    ProfileUnavailable(String),

    /// A single embedding provider answered with a rate-limit response.
    #[error("Provider '{provider}' is rate limited")]
    RateLimited {
        /// Provider name.
        provider: String,
        /// Server-suggested wait, if one was sent.
        retry_after: Option<Duration>,
    },

    /// A single embedding provider failed for a reason other than rate limiting.
    #[error("Provider '{provider}' failed: {message}")]
    Provider {
        /// Provider name.
        provider: String,
        /// Failure description.
        message: String,
    },

    /// An external call exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Requested item not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a store-unavailable error.
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create an embedding-unavailable error.
    pub fn embedding_unavailable(msg: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable(msg.into())
    }

    /// Create a bad request error.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Wrap a cause as an indexing failure for the given entity.
    pub fn indexing(entity: impl Into<String>, source: Error) -> Self {
        Self::IndexingFailure {
            entity: entity.into(),
            source: Box::new(source),
        }
    }

    /// Create a profile-unavailable error.
    pub fn profile_unavailable(msg: impl Into<String>) -> Self {
        Self::ProfileUnavailable(msg.into())
    }

    /// Create a rate-limited error for a provider.
    pub fn rate_limited(provider: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            retry_after,
        }
    }

    /// Create a provider failure.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether the caller should switch to a non-vector fallback path.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::EmbeddingUnavailable(_) | Self::Timeout(_)
        )
    }

    /// Whether repeating the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_)
            | Self::Timeout(_)
            | Self::RateLimited { .. }
            | Self::Provider { .. } => true,
            Self::IndexingFailure { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether this is a provider rate-limit response.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias using Agora's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_classification() {
        assert!(Error::store_unavailable("down").is_degraded());
        assert!(Error::embedding_unavailable("all failed").is_degraded());
        assert!(Error::timeout("search").is_degraded());
        assert!(!Error::bad_request("dimension mismatch").is_degraded());
        assert!(!Error::profile_unavailable("user 7").is_degraded());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::store_unavailable("down").is_retryable());
        assert!(Error::rate_limited("openai", None).is_retryable());
        assert!(Error::provider("hf", "500").is_retryable());
        assert!(!Error::bad_request("bad filter").is_retryable());
    }

    #[test]
    fn test_indexing_failure_inherits_retryability() {
        let err = Error::indexing("post:1", Error::store_unavailable("down"));
        assert!(err.is_retryable());
        assert!(!err.is_degraded());

        let err = Error::indexing("post:1", Error::bad_request("dim"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = Error::indexing("post:42", Error::store_unavailable("connection refused"));
        assert_eq!(
            err.to_string(),
            "Indexing failed for post:42: Vector store unavailable: connection refused"
        );
        let err = Error::rate_limited("openai", Some(Duration::from_secs(2)));
        assert_eq!(err.to_string(), "Provider 'openai' is rate limited");
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_from_serde_json() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
