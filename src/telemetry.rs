//! Per-query retrieval telemetry.
//!
//! Sinks may fail; the retriever logs and discards those errors so telemetry
//! never changes a retrieval result.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::utils::ensure_parent_dir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalEvent {
    pub event: String,
    pub retriever: String,
    pub latency_ms: u64,
    pub top_k: usize,
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &RetrievalEvent) -> Result<()>;
}

/// Valid production configuration when telemetry is not wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: &RetrievalEvent) -> Result<()> {
        Ok(())
    }
}

/// Emits each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: &RetrievalEvent) -> Result<()> {
        info!(
            target: "rag.telemetry",
            event = %event.event,
            retriever = %event.retriever,
            latency_ms = event.latency_ms,
            top_k = event.top_k,
            "retrieval"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonlEntry<'a> {
    timestamp: String,
    trace_id: &'a str,
    #[serde(flatten)]
    event: &'a RetrievalEvent,
}

/// Appends one JSON object per line to a log file.
pub struct JsonlTelemetry {
    path: PathBuf,
    trace_id: String,
    lock: Mutex<()>,
}

impl JsonlTelemetry {
    /// Events written by this sink share a freshly generated trace id.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_trace_id(path, Uuid::new_v4().to_string())
    }

    pub fn with_trace_id(path: impl Into<PathBuf>, trace_id: impl Into<String>) -> Self {
        JsonlTelemetry {
            path: path.into(),
            trace_id: trace_id.into(),
            lock: Mutex::new(()),
        }
    }
}

impl TelemetrySink for JsonlTelemetry {
    fn record(&self, event: &RetrievalEvent) -> Result<()> {
        let entry = JsonlEntry {
            timestamp: Utc::now().to_rfc3339(),
            trace_id: &self.trace_id,
            event,
        };
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| RagError::Telemetry(format!("cannot encode telemetry: {}", e)))?;
        line.push('\n');

        let _guard = self.lock.lock().map_err(|_| RagError::Telemetry("telemetry lock poisoned".into()))?;
        let write = || -> std::io::Result<()> {
            ensure_parent_dir(&self.path)?;
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            file.write_all(line.as_bytes())
        };
        write().map_err(|e| RagError::Telemetry(format!("cannot write {}: {}", self.path.display(), e)))
    }
}
