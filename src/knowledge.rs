//! Read-only providers of the document corpus.
//!
//! Every call to [`KnowledgeSource::all`] re-reads the backing medium, and
//! the returned order is stable for unchanged input so ranking tie-breaks
//! stay deterministic.

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use serde::Deserialize;
use tracing::warn;

use crate::document::Document;
use crate::error::{RagError, Result};
use crate::utils::load_text_files;

pub trait KnowledgeSource: Send + Sync {
    fn all(&self) -> Result<Vec<Document>>;
}

/// Lenient on-disk entry; rows without an id are skipped.
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default, alias = "heroId")]
    id: Option<serde_json::Value>,
    #[serde(default, alias = "nombre")]
    title: Option<String>,
    #[serde(default, alias = "text", alias = "contenido")]
    body: Option<String>,
}

/// A JSON array of `{id, title, body}` objects.
pub struct JsonKnowledgeSource {
    path: PathBuf,
}

impl JsonKnowledgeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonKnowledgeSource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KnowledgeSource for JsonKnowledgeSource {
    fn all(&self) -> Result<Vec<Document>> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            RagError::source_unavailable(format!("cannot read {}: {}", self.path.display(), e))
        })?;

        let entries: Vec<serde_json::Value> = serde_json::from_str(&contents).map_err(|e| {
            RagError::source_unavailable(format!("invalid corpus {}: {}", self.path.display(), e))
        })?;

        let mut seen = FxHashSet::default();
        let mut documents = Vec::with_capacity(entries.len());
        for value in entries {
            let Ok(entry) = serde_json::from_value::<RawEntry>(value) else {
                continue;
            };
            let id = match entry.id {
                Some(serde_json::Value::String(s)) => s.trim().to_string(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            if id.is_empty() {
                continue;
            }
            if !seen.insert(id.clone()) {
                warn!(document_id = %id, "duplicate document id in corpus, keeping first");
                continue;
            }
            documents.push(Document::new(
                id,
                entry.title.unwrap_or_default(),
                entry.body.unwrap_or_default(),
            ));
        }

        Ok(documents)
    }
}

/// Every `.txt` file below a directory; the id is the path relative to the
/// root and the title is the file stem.
pub struct TextDirKnowledgeSource {
    root: PathBuf,
}

impl TextDirKnowledgeSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TextDirKnowledgeSource { root: root.into() }
    }
}

impl KnowledgeSource for TextDirKnowledgeSource {
    fn all(&self) -> Result<Vec<Document>> {
        let files = load_text_files(&self.root).map_err(|e| {
            RagError::source_unavailable(format!("cannot read {}: {}", self.root.display(), e))
        })?;

        Ok(files
            .into_iter()
            .map(|(path, content)| {
                let relative = path.strip_prefix(&self.root).unwrap_or(&path);
                let id = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let title = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Document::new(id, title, content)
            })
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryKnowledgeSource {
    documents: Vec<Document>,
}

impl InMemoryKnowledgeSource {
    pub fn new(documents: Vec<Document>) -> Self {
        InMemoryKnowledgeSource { documents }
    }
}

impl KnowledgeSource for InMemoryKnowledgeSource {
    fn all(&self) -> Result<Vec<Document>> {
        Ok(self.documents.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_json_source_reads_and_skips_invalid() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("kb.json");
        fs::write(
            &path,
            r#"[
                {"id": "a", "title": "Apple", "body": "red fruit"},
                {"title": "no id"},
                "garbage",
                {"id": "b", "title": "Car", "text": "blue car"},
                {"id": "a", "title": "Duplicate", "body": "ignored"},
                {"heroId": "h1", "nombre": "Thor", "contenido": "god of thunder"},
                {"id": 42, "title": "Numeric", "body": "id"}
            ]"#,
        )?;

        let docs = JsonKnowledgeSource::new(&path).all()?;
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "h1", "42"]);
        assert_eq!(docs[0].title, "Apple");
        assert_eq!(docs[1].body, "blue car");
        assert_eq!(docs[2].body, "god of thunder");
        Ok(())
    }

    #[test]
    fn test_json_source_missing_file_is_unavailable() {
        let source = JsonKnowledgeSource::new("/nonexistent/kb.json");
        assert!(matches!(source.all(), Err(RagError::SourceUnavailable(_))));
    }

    #[test]
    fn test_json_source_malformed_is_unavailable() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("kb.json");
        fs::write(&path, "{not json")?;
        assert!(matches!(
            JsonKnowledgeSource::new(&path).all(),
            Err(RagError::SourceUnavailable(_))
        ));
        Ok(())
    }

    #[test]
    fn test_text_dir_source() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("marvel"))?;
        let mut file = File::create(dir.path().join("marvel").join("hulk.txt"))?;
        writeln!(file, "Bruce Banner")?;

        let docs = TextDirKnowledgeSource::new(dir.path()).all()?;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "marvel/hulk.txt");
        assert_eq!(docs[0].title, "hulk");
        assert_eq!(docs[0].body.trim(), "Bruce Banner");
        Ok(())
    }

    #[test]
    fn test_all_is_restartable() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("kb.json");
        fs::write(&path, r#"[{"id": "a", "title": "A", "body": "x"}]"#)?;
        let source = JsonKnowledgeSource::new(&path);
        assert_eq!(source.all()?.len(), 1);

        fs::write(
            &path,
            r#"[{"id": "a", "title": "A", "body": "x"}, {"id": "b", "title": "B", "body": "y"}]"#,
        )?;
        assert_eq!(source.all()?.len(), 2);
        Ok(())
    }
}
