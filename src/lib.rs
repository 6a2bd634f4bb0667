//! Semantic retrieval over a document corpus with a persisted, self-healing
//! embedding cache.

pub mod breaker;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod knowledge;
pub mod precompute;
pub mod retriever;
pub mod similarity;
pub mod telemetry;
pub mod utils;
pub mod vector_db;

pub use config::RagConfig;
pub use document::{Document, QueryResult, Vector};
pub use error::{RagError, Result};
pub use knowledge::KnowledgeSource;
pub use precompute::BulkPrecompute;
pub use retriever::SimilarityRetriever;
pub use telemetry::TelemetrySink;
pub use vector_db::{EmbeddingRecord, EmbeddingStore};

use breaker::{CircuitBreaker, GuardedProvider};
use embeddings::OpenAiEmbeddingProvider;
use vector_db::JsonFileEmbeddingStore;

/// HTTP provider behind a circuit breaker, as configured.
pub fn provider_from_config(config: &RagConfig) -> Result<GuardedProvider<OpenAiEmbeddingProvider>> {
    let provider = OpenAiEmbeddingProvider::new(
        config.api_key.clone(),
        config.model.clone(),
        config.endpoint.clone(),
        config.provider_timeout,
    )?;
    Ok(GuardedProvider::new(provider, CircuitBreaker::new(config.breaker.clone())))
}

/// File store tagged with the configured model.
pub fn store_from_config(config: &RagConfig) -> JsonFileEmbeddingStore {
    JsonFileEmbeddingStore::new(&config.embeddings_file).with_model(config.model.clone())
}

/// Installs a stderr `tracing` subscriber honouring `RUST_LOG`.
pub fn init_tracing(default_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
