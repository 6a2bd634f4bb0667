use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use semantic_retrieval::knowledge::JsonKnowledgeSource;
use semantic_retrieval::telemetry::JsonlTelemetry;
use semantic_retrieval::vector_db::JsonFileEmbeddingStore;
use semantic_retrieval::embeddings::EmbeddingProvider;
use semantic_retrieval::{BulkPrecompute, EmbeddingStore, Result, SimilarityRetriever, Vector};
use tempfile::tempdir;

/// Bag-of-keywords embedding over a tiny fixed vocabulary.
#[derive(Default)]
struct KeywordProvider {
    document_calls: Mutex<usize>,
}

const VOCABULARY: [&[&str]; 2] = [&["apple", "fruit", "red"], &["car", "blue", "engine"]];

fn keyword_vector(text: &str) -> Vector {
    let text = text.to_lowercase();
    VOCABULARY
        .iter()
        .map(|words| words.iter().filter(|w| text.contains(**w)).count() as f32)
        .collect()
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vector>> {
        *self.document_calls.lock().unwrap() += 1;
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }

    fn model(&self) -> &str {
        "keywords"
    }
}

fn write_corpus(path: &std::path::Path) {
    fs::write(
        path,
        r#"[
            {"id": "a", "title": "red", "body": "apple"},
            {"id": "b", "title": "blue", "body": "car"}
        ]"#,
    )
    .unwrap();
}

#[tokio::test]
async fn cold_store_is_filled_and_survives_reopen() {
    let dir = tempdir().unwrap();
    let kb = dir.path().join("kb.json");
    let store_path = dir.path().join("embeddings").join("store.json");
    let log = dir.path().join("rag.log");
    write_corpus(&kb);

    let provider = Arc::new(KeywordProvider::default());
    let retriever = SimilarityRetriever::new(
        Arc::new(JsonKnowledgeSource::new(&kb)),
        Arc::new(JsonFileEmbeddingStore::new(&store_path).with_model("keywords")),
        provider.clone(),
    )
    .with_telemetry(Arc::new(JsonlTelemetry::new(&log)));

    let results = retriever.retrieve("fruit", 2).await.unwrap();
    assert_eq!(results[0].document_id, "a");
    assert_eq!(results[1].document_id, "b");
    assert!(results[0].score > results[1].score);

    let reopened = JsonFileEmbeddingStore::new(&store_path).with_model("keywords");
    assert_eq!(reopened.get_all().unwrap().len(), 2);

    // second query hits a warm cache
    retriever.retrieve("blue engine", 1).await.unwrap();
    assert_eq!(*provider.document_calls.lock().unwrap(), 1);

    let lines = fs::read_to_string(&log).unwrap();
    assert_eq!(lines.lines().count(), 2);
}

#[tokio::test]
async fn precompute_then_retrieve_needs_no_fill() {
    let dir = tempdir().unwrap();
    let kb = dir.path().join("kb.json");
    let store_path = dir.path().join("store.json");
    write_corpus(&kb);

    let source = Arc::new(JsonKnowledgeSource::new(&kb));
    let store = Arc::new(JsonFileEmbeddingStore::new(&store_path).with_model("keywords"));

    let report = BulkPrecompute::new(source.clone(), store.clone(), Arc::new(KeywordProvider::default()))
        .run(|_| {})
        .await
        .unwrap();
    assert_eq!(report.documents, 2);

    let provider = Arc::new(KeywordProvider::default());
    let retriever = SimilarityRetriever::new(source, store, provider.clone());
    let results = retriever.retrieve("car", 5).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document_id, "b");
    assert_eq!(*provider.document_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn edited_document_is_reembedded() {
    let dir = tempdir().unwrap();
    let kb = dir.path().join("kb.json");
    let store_path = dir.path().join("store.json");
    write_corpus(&kb);

    let provider = Arc::new(KeywordProvider::default());
    let retriever = SimilarityRetriever::new(
        Arc::new(JsonKnowledgeSource::new(&kb)),
        Arc::new(JsonFileEmbeddingStore::new(&store_path)),
        provider.clone(),
    );
    retriever.retrieve("fruit", 1).await.unwrap();

    fs::write(
        &kb,
        r#"[
            {"id": "a", "title": "blue", "body": "car engine"},
            {"id": "b", "title": "blue", "body": "car"}
        ]"#,
    )
    .unwrap();

    retriever.retrieve("fruit", 1).await.unwrap();
    assert_eq!(*provider.document_calls.lock().unwrap(), 2);

    let a = JsonFileEmbeddingStore::new(&store_path).get("a").unwrap().unwrap();
    assert_eq!(a.vector, vec![0.0, 3.0]);
}
