use serde::{Deserialize, Serialize};

use crate::utils::{canonical_text, content_hash};

/// Fixed-length embedding produced by a provider.
pub type Vector = Vec<f32>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    #[serde(alias = "text", alias = "contenido")]
    pub body: String,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Document {
            id: id.into(),
            title: title.into(),
            body: body.into(),
        }
    }

    /// Text sent to the embedding provider.
    pub fn embedding_text(&self) -> String {
        canonical_text(&self.title, &self.body)
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.embedding_text())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub document_id: String,
    pub score: f32,
}
