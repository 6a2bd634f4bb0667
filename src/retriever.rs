//! Top-K semantic retrieval with self-healing cache fill.
//!
//! A query runs in two phases. First the corpus and cached vectors are
//! loaded and every document without a fresh vector is embedded in a single
//! provider batch and written back. Then the query is embedded and scored
//! against the resolved vector set by the pure [`rank`] function.

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::document::{Document, QueryResult};
use crate::embeddings::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::knowledge::KnowledgeSource;
use crate::similarity::{check_dimensions, rank};
use crate::telemetry::{NoopTelemetry, RetrievalEvent, TelemetrySink};
use crate::vector_db::{EmbeddingMap, EmbeddingRecord, EmbeddingStore};

pub const RETRIEVE_EVENT: &str = "retrieve";

pub struct SimilarityRetriever {
    source: Arc<dyn KnowledgeSource>,
    store: Arc<dyn EmbeddingStore>,
    provider: Arc<dyn EmbeddingProvider>,
    telemetry: Arc<dyn TelemetrySink>,
    name: String,
}

/// A document whose cached vector is missing or was computed from other text.
struct PendingEmbedding<'a> {
    document: &'a Document,
    content_hash: String,
}

impl SimilarityRetriever {
    pub fn new(
        source: Arc<dyn KnowledgeSource>,
        store: Arc<dyn EmbeddingStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        SimilarityRetriever {
            source,
            store,
            provider,
            telemetry: Arc::new(NoopTelemetry),
            name: "vector".to_string(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Name reported in telemetry events.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns at most `top_k` documents ranked by cosine similarity to `query`.
    ///
    /// `top_k == 0` and blank queries are rejected with `InvalidArgument`.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<QueryResult>> {
        if top_k == 0 {
            return Err(RagError::invalid_argument("top_k must be at least 1"));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::invalid_argument("query must not be blank"));
        }

        let start = Instant::now();

        let documents = self.source.all()?;
        if documents.is_empty() {
            self.emit(start, top_k);
            return Ok(Vec::new());
        }

        let mut cached = match self.store.get_all() {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "embedding store unreadable, continuing with an empty cache");
                EmbeddingMap::default()
            }
        };

        let pending = pending_embeddings(&documents, &cached);
        if !pending.is_empty() {
            self.fill(&pending, &mut cached, None).await;
        }

        if !documents.iter().any(|doc| cached.contains_key(&doc.id)) {
            return Err(RagError::retrieval_unavailable(
                "no document embeddings available",
            ));
        }

        let query_vector = self
            .provider
            .embed_query(query)
            .await
            .map_err(|e| RagError::retrieval_unavailable(format!("cannot embed query: {}", e)))?;

        let mismatched = mismatched_embeddings(&documents, &cached, query_vector.len());
        if !mismatched.is_empty() {
            warn!(
                count = mismatched.len(),
                dimensions = query_vector.len(),
                "cached embeddings have a different dimension than the query, re-embedding"
            );
            self.fill(&mismatched, &mut cached, Some(query_vector.len())).await;
        }

        let vectors: FxHashMap<&str, &[f32]> = documents
            .iter()
            .filter_map(|doc| {
                cached
                    .get(&doc.id)
                    .map(|record| (doc.id.as_str(), record.vector.as_slice()))
            })
            .collect();

        let mut results = rank(&documents, &vectors, &query_vector);
        if results.is_empty() {
            return Err(RagError::retrieval_unavailable(
                "no document embedding matches the query dimension",
            ));
        }
        results.truncate(top_k);

        self.emit(start, top_k);
        Ok(results)
    }

    /// Embeds all pending documents in one batch, persists them and merges
    /// them into `cached`. Provider failures, and batches whose vectors
    /// disagree in dimension with each other or with `dimensions`, leave
    /// `cached` untouched.
    async fn fill(
        &self,
        pending: &[PendingEmbedding<'_>],
        cached: &mut EmbeddingMap,
        dimensions: Option<usize>,
    ) {
        let texts: Vec<String> = pending.iter().map(|p| p.document.embedding_text()).collect();
        info!(count = texts.len(), "embedding documents missing from cache");

        let vectors = match self.provider.embed_documents(&texts).await {
            Ok(vectors) if vectors.len() == pending.len() => vectors,
            Ok(vectors) => {
                warn!(
                    expected = pending.len(),
                    received = vectors.len(),
                    "provider returned wrong number of embeddings, using cached vectors only"
                );
                return;
            }
            Err(e) => {
                warn!(error = %e, "cache fill failed, using cached vectors only");
                return;
            }
        };

        let mut expected = dimensions;
        for (p, vector) in pending.iter().zip(&vectors) {
            if let Err(e) = check_dimensions(&mut expected, &p.document.id, vector.len()) {
                warn!(error = %e, "discarding cache fill batch");
                return;
            }
        }

        let generated: EmbeddingMap = pending
            .iter()
            .zip(vectors)
            .map(|(p, vector)| {
                (
                    p.document.id.clone(),
                    EmbeddingRecord::new(vector, p.content_hash.clone()),
                )
            })
            .collect();

        if let Err(e) = self.store.save_all(generated.clone()) {
            warn!(error = %e, "cannot persist generated embeddings");
        }
        cached.extend(generated);
    }

    fn emit(&self, start: Instant, top_k: usize) {
        let event = RetrievalEvent {
            event: RETRIEVE_EVENT.to_string(),
            retriever: self.name.clone(),
            latency_ms: start.elapsed().as_millis() as u64,
            top_k,
        };
        if let Err(e) = self.telemetry.record(&event) {
            debug!(error = %e, "telemetry sink failed");
        }
    }
}

/// Documents lacking a vector, or whose vector was computed from other text,
/// in corpus order.
fn pending_embeddings<'a>(documents: &'a [Document], cached: &EmbeddingMap) -> Vec<PendingEmbedding<'a>> {
    documents
        .iter()
        .filter_map(|document| {
            let content_hash = document.content_hash();
            match cached.get(&document.id) {
                Some(record) if !record.is_stale(&content_hash) => None,
                _ => Some(PendingEmbedding {
                    document,
                    content_hash,
                }),
            }
        })
        .collect()
}

/// Cached documents whose vector length differs from `dimensions`.
fn mismatched_embeddings<'a>(
    documents: &'a [Document],
    cached: &EmbeddingMap,
    dimensions: usize,
) -> Vec<PendingEmbedding<'a>> {
    documents
        .iter()
        .filter(|document| {
            cached
                .get(&document.id)
                .is_some_and(|record| record.vector.len() != dimensions)
        })
        .map(|document| PendingEmbedding {
            document,
            content_hash: document.content_hash(),
        })
        .collect()
}
