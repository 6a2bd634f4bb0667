//! Error types for the retrieval engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    /// The document corpus could not be read.
    #[error("Knowledge source unavailable: {0}")]
    SourceUnavailable(String),

    /// The embedding cache could not be read or written.
    #[error("Embedding store unavailable: {0}")]
    StoreUnavailable(String),

    /// Network, rate-limit, timeout or malformed-response failure from the provider.
    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    /// No vector for the query, or no usable document vectors at all.
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Knowledge source is empty, nothing to embed")]
    EmptyCorpus,

    #[error("Provider returned {actual} embeddings for {expected} documents")]
    CountMismatch { expected: usize, actual: usize },

    /// A telemetry sink failed to record an event.
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RagError {
    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::EmbeddingProvider(msg.into())
    }

    pub fn retrieval_unavailable(msg: impl Into<String>) -> Self {
        Self::RetrievalUnavailable(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Whether a caller may reasonably retry the same operation later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingProvider(_) | Self::StoreUnavailable(_) | Self::SourceUnavailable(_)
        )
    }
}
