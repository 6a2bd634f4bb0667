//! Persisted cache of document embeddings, keyed by document id.
//!
//! The on-disk layout is a single JSON document:
//!
//! ```json
//! {
//!   "model": "text-embedding-3-small",
//!   "embeddings": {
//!     "doc-1": { "vector": [0.1, 0.2], "content_hash": "9f86d0..." }
//!   }
//! }
//! ```
//!
//! A bare `{ "doc-1": [0.1, 0.2] }` map is also accepted on read. Every write
//! goes to a temporary file in the same directory which is then renamed over
//! the store, so readers see either the old or the new file and never a mix.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::document::Vector;
use crate::error::{RagError, Result};
use crate::utils::ensure_parent_dir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub vector: Vector,
    /// Hash of the text the vector was computed from. `None` for records
    /// written without one; those are never considered stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl EmbeddingRecord {
    pub fn new(vector: Vector, content_hash: impl Into<String>) -> Self {
        EmbeddingRecord {
            vector,
            content_hash: Some(content_hash.into()),
        }
    }

    pub fn unhashed(vector: Vector) -> Self {
        EmbeddingRecord {
            vector,
            content_hash: None,
        }
    }

    /// True when the record was computed from different text than `hash`.
    pub fn is_stale(&self, hash: &str) -> bool {
        self.content_hash.as_deref().is_some_and(|h| h != hash)
    }
}

pub type EmbeddingMap = FxHashMap<String, EmbeddingRecord>;

pub trait EmbeddingStore: Send + Sync {
    fn get(&self, document_id: &str) -> Result<Option<EmbeddingRecord>>;

    fn get_all(&self) -> Result<EmbeddingMap>;

    /// Upsert a single record.
    fn put(&self, document_id: &str, record: EmbeddingRecord) -> Result<()>;

    /// Upsert many records in one atomic write.
    fn save_all(&self, records: EmbeddingMap) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Record(EmbeddingRecord),
    Bare(Vector),
}

impl From<StoredValue> for EmbeddingRecord {
    fn from(value: StoredValue) -> Self {
        match value {
            StoredValue::Record(record) => record,
            StoredValue::Bare(vector) => EmbeddingRecord::unhashed(vector),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoreFile {
    Envelope {
        #[serde(default)]
        model: Option<String>,
        embeddings: BTreeMap<String, StoredValue>,
    },
    Legacy(BTreeMap<String, StoredValue>),
}

#[derive(Serialize)]
struct StoreFileOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    embeddings: BTreeMap<&'a str, &'a EmbeddingRecord>,
}

/// JSON-file backed store shared between the query process and the bulk
/// precompute tool.
pub struct JsonFileEmbeddingStore {
    path: PathBuf,
    model: Option<String>,
    write_lock: Mutex<()>,
    snapshot: Mutex<Option<(FileStamp, Arc<EmbeddingMap>)>>,
}

/// Identifies one version of the store file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

impl FileStamp {
    fn of(meta: &fs::Metadata) -> Option<Self> {
        Some(FileStamp {
            modified: meta.modified().ok()?,
            len: meta.len(),
        })
    }
}

impl JsonFileEmbeddingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileEmbeddingStore {
            path: path.into(),
            model: None,
            write_lock: Mutex::new(()),
            snapshot: Mutex::new(None),
        }
    }

    /// Vectors recorded under a different model, or in a file with no model
    /// tag, are ignored on read and dropped on the next write.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed store contents, reused while the file's mtime and length are
    /// unchanged.
    fn load(&self) -> Result<Arc<EmbeddingMap>> {
        let stamp = match fs::metadata(&self.path) {
            Ok(meta) => FileStamp::of(&meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.remember(None, Arc::default());
                return Ok(Arc::default());
            }
            Err(e) => {
                return Err(RagError::store_unavailable(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if let (Some(stamp), Ok(snapshot)) = (&stamp, self.snapshot.lock()) {
            if let Some((cached_stamp, records)) = snapshot.as_ref() {
                if cached_stamp == stamp {
                    return Ok(records.clone());
                }
            }
        }

        let records = Arc::new(self.parse()?);
        self.remember(stamp, records.clone());
        Ok(records)
    }

    fn remember(&self, stamp: Option<FileStamp>, records: Arc<EmbeddingMap>) {
        if let Ok(mut snapshot) = self.snapshot.lock() {
            *snapshot = stamp.map(|stamp| (stamp, records));
        }
    }

    fn parse(&self) -> Result<EmbeddingMap> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(EmbeddingMap::default()),
            Err(e) => {
                return Err(RagError::store_unavailable(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let file = match serde_json::from_str::<StoreFile>(&contents) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "embedding store is corrupt, treating as empty");
                return Ok(EmbeddingMap::default());
            }
        };

        let (file_model, entries) = match file {
            StoreFile::Envelope { model, embeddings } => (model, embeddings),
            StoreFile::Legacy(embeddings) => (None, embeddings),
        };

        if let Some(expected) = self.model.as_deref() {
            match file_model.as_deref() {
                Some(found) if found != expected => {
                    warn!(
                        path = %self.path.display(),
                        expected, found,
                        "embedding store was built with a different model, ignoring cached vectors"
                    );
                    return Ok(EmbeddingMap::default());
                }
                None if !entries.is_empty() => {
                    warn!(
                        path = %self.path.display(),
                        expected,
                        "embedding store has no model tag, ignoring cached vectors"
                    );
                    return Ok(EmbeddingMap::default());
                }
                _ => {}
            }
        }

        Ok(entries
            .into_iter()
            .map(|(id, value)| (id, EmbeddingRecord::from(value)))
            .collect())
    }

    fn write(&self, records: &EmbeddingMap) -> Result<()> {
        let unavailable = |e: &dyn std::fmt::Display| {
            RagError::store_unavailable(format!("cannot write {}: {}", self.path.display(), e))
        };

        ensure_parent_dir(&self.path).map_err(|e| unavailable(&e))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let out = StoreFileOut {
            model: self.model.as_deref(),
            embeddings: records.iter().map(|(id, r)| (id.as_str(), r)).collect(),
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| unavailable(&e))?;
        serde_json::to_writer_pretty(&mut tmp, &out).map_err(|e| unavailable(&e))?;
        tmp.flush().map_err(|e| unavailable(&e))?;
        tmp.as_file().sync_all().map_err(|e| unavailable(&e))?;
        tmp.persist(&self.path).map_err(|e| unavailable(&e.error))?;
        Ok(())
    }

    fn upsert(&self, records: EmbeddingMap) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| RagError::store_unavailable("store write lock poisoned"))?;
        let mut all = (*self.load()?).clone();
        all.extend(records);
        self.write(&all)?;

        let stamp = fs::metadata(&self.path).ok().and_then(|meta| FileStamp::of(&meta));
        self.remember(stamp, Arc::new(all));
        Ok(())
    }
}

impl EmbeddingStore for JsonFileEmbeddingStore {
    fn get(&self, document_id: &str) -> Result<Option<EmbeddingRecord>> {
        Ok(self.load()?.get(document_id).cloned())
    }

    fn get_all(&self) -> Result<EmbeddingMap> {
        Ok((*self.load()?).clone())
    }

    fn put(&self, document_id: &str, record: EmbeddingRecord) -> Result<()> {
        let mut one = EmbeddingMap::default();
        one.insert(document_id.to_string(), record);
        self.upsert(one)
    }

    fn save_all(&self, records: EmbeddingMap) -> Result<()> {
        self.upsert(records)
    }
}

#[derive(Default)]
pub struct InMemoryEmbeddingStore {
    records: RwLock<EmbeddingMap>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EmbeddingStore for InMemoryEmbeddingStore {
    fn get(&self, document_id: &str) -> Result<Option<EmbeddingRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| RagError::store_unavailable("store lock poisoned"))?;
        Ok(records.get(document_id).cloned())
    }

    fn get_all(&self) -> Result<EmbeddingMap> {
        let records = self
            .records
            .read()
            .map_err(|_| RagError::store_unavailable("store lock poisoned"))?;
        Ok(records.clone())
    }

    fn put(&self, document_id: &str, record: EmbeddingRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| RagError::store_unavailable("store lock poisoned"))?;
        records.insert(document_id.to_string(), record);
        Ok(())
    }

    fn save_all(&self, new_records: EmbeddingMap) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| RagError::store_unavailable("store lock poisoned"))?;
        records.extend(new_records);
        Ok(())
    }
}
