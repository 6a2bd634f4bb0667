//! Offline cache warm-up: embeds the whole corpus and writes it in one
//! atomic `save_all`.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::info;

use crate::document::Document;
use crate::embeddings::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::knowledge::KnowledgeSource;
use crate::similarity::check_dimensions;
use crate::vector_db::{EmbeddingMap, EmbeddingRecord, EmbeddingStore};

pub const DEFAULT_BATCH_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub embedded: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecomputeReport {
    pub documents: usize,
    pub batches: usize,
    pub dimensions: usize,
}

pub struct BulkPrecompute {
    source: Arc<dyn KnowledgeSource>,
    store: Arc<dyn EmbeddingStore>,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl BulkPrecompute {
    pub fn new(
        source: Arc<dyn KnowledgeSource>,
        store: Arc<dyn EmbeddingStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        BulkPrecompute {
            source,
            store,
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Embeds every document and persists all vectors at once. Nothing is
    /// written unless every document received a vector.
    pub async fn run(&self, mut on_progress: impl FnMut(Progress)) -> Result<PrecomputeReport> {
        let documents = self.source.all()?;
        if documents.is_empty() {
            return Err(RagError::EmptyCorpus);
        }

        let total = documents.len();
        let mut records = EmbeddingMap::default();
        let mut batches = 0;
        let mut dimensions = None;

        for chunk in documents.chunks(self.batch_size) {
            let vectors = self.embed_batch(chunk).await?;
            for (doc, vector) in chunk.iter().zip(vectors) {
                check_dimensions(&mut dimensions, &doc.id, vector.len())?;
                records.insert(doc.id.clone(), EmbeddingRecord::new(vector, doc.content_hash()));
            }
            batches += 1;
            on_progress(Progress {
                embedded: records.len(),
                total,
            });
        }

        if records.len() != total {
            return Err(RagError::CountMismatch {
                expected: total,
                actual: records.len(),
            });
        }

        self.store.save_all(records)?;
        info!(documents = total, batches, "embedding store warmed");

        Ok(PrecomputeReport {
            documents: total,
            batches,
            dimensions: dimensions.unwrap_or(0),
        })
    }

    /// Re-embeds the named documents and upserts them one by one.
    pub async fn refresh(&self, ids: &[String]) -> Result<usize> {
        let wanted: FxHashSet<&str> = ids.iter().map(String::as_str).collect();
        let documents: Vec<Document> = self
            .source
            .all()?
            .into_iter()
            .filter(|doc| wanted.contains(doc.id.as_str()))
            .collect();

        let found: FxHashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        let unknown: Vec<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| !found.contains(id))
            .collect();
        if !unknown.is_empty() {
            return Err(RagError::invalid_argument(format!(
                "unknown document ids: {}",
                unknown.join(", ")
            )));
        }

        let vectors = self.embed_batch(&documents).await?;
        let mut dimensions = None;
        for (doc, vector) in documents.iter().zip(&vectors) {
            check_dimensions(&mut dimensions, &doc.id, vector.len())?;
        }
        for (doc, vector) in documents.iter().zip(vectors) {
            self.store
                .put(&doc.id, EmbeddingRecord::new(vector, doc.content_hash()))?;
        }
        Ok(documents.len())
    }

    async fn embed_batch(&self, documents: &[Document]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = documents.iter().map(Document::embedding_text).collect();
        let vectors = self.provider.embed_documents(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(RagError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Vector;
    use crate::knowledge::InMemoryKnowledgeSource;
    use crate::vector_db::{InMemoryEmbeddingStore, JsonFileEmbeddingStore};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Returns `[len(text), 1.0]` per text, optionally dropping the last one.
    #[derive(Default)]
    struct LengthProvider {
        batches: Mutex<Vec<usize>>,
        drop_last: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for LengthProvider {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vector>> {
            self.batches.lock().unwrap().push(texts.len());
            let mut out: Vec<Vector> = texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect();
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }

        fn model(&self) -> &str {
            "length"
        }
    }

    fn corpus(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| Document::new(format!("doc-{i}"), format!("Title {i}"), "body"))
            .collect()
    }

    #[tokio::test]
    async fn test_run_embeds_everything_in_batches() {
        let store = Arc::new(InMemoryEmbeddingStore::new());
        let provider = Arc::new(LengthProvider::default());
        let tool = BulkPrecompute::new(
            Arc::new(InMemoryKnowledgeSource::new(corpus(5))),
            store.clone(),
            provider.clone(),
        )
        .with_batch_size(2);

        let mut progress = Vec::new();
        let report = tool.run(|p| progress.push(p)).await.unwrap();

        assert_eq!(
            report,
            PrecomputeReport {
                documents: 5,
                batches: 3,
                dimensions: 2
            }
        );
        assert_eq!(*provider.batches.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(progress.last(), Some(&Progress { embedded: 5, total: 5 }));
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_corpus_fails() {
        let tool = BulkPrecompute::new(
            Arc::new(InMemoryKnowledgeSource::default()),
            Arc::new(InMemoryEmbeddingStore::new()),
            Arc::new(LengthProvider::default()),
        );
        assert!(matches!(tool.run(|_| {}).await, Err(RagError::EmptyCorpus)));
    }

    #[tokio::test]
    async fn test_count_mismatch_writes_nothing() {
        let store = Arc::new(InMemoryEmbeddingStore::new());
        let tool = BulkPrecompute::new(
            Arc::new(InMemoryKnowledgeSource::new(corpus(3))),
            store.clone(),
            Arc::new(LengthProvider {
                drop_last: true,
                ..Default::default()
            }),
        );

        let err = tool.run(|_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::CountMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_run_persists_to_file_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("embeddings.json");
        let tool = BulkPrecompute::new(
            Arc::new(InMemoryKnowledgeSource::new(corpus(2))),
            Arc::new(JsonFileEmbeddingStore::new(&path).with_model("length")),
            Arc::new(LengthProvider::default()),
        );
        tool.run(|_| {}).await.unwrap();

        let reopened = JsonFileEmbeddingStore::new(&path).with_model("length");
        let all = reopened.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["doc-0"].vector, vec!["Title 0\n\nbody".len() as f32, 1.0]);
    }

    #[tokio::test]
    async fn test_refresh_single_document() {
        let store = Arc::new(InMemoryEmbeddingStore::new());
        let tool = BulkPrecompute::new(
            Arc::new(InMemoryKnowledgeSource::new(corpus(3))),
            store.clone(),
            Arc::new(LengthProvider::default()),
        );

        assert_eq!(tool.refresh(&["doc-1".to_string()]).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("doc-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_unknown_id() {
        let tool = BulkPrecompute::new(
            Arc::new(InMemoryKnowledgeSource::new(corpus(1))),
            Arc::new(InMemoryEmbeddingStore::new()),
            Arc::new(LengthProvider::default()),
        );
        let err = tool.refresh(&["nope".to_string()]).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument(_)));
    }
}
