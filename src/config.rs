//! Runtime configuration, read from the environment with defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::error::{RagError, Result};
use crate::precompute::DEFAULT_BATCH_SIZE;

pub const DEFAULT_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub knowledge_file: PathBuf,
    pub embeddings_file: PathBuf,
    /// JSON-lines telemetry log; `None` disables file telemetry.
    pub telemetry_file: Option<PathBuf>,
    pub provider_timeout: Duration,
    pub batch_size: usize,
    pub breaker: BreakerConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        let root = default_storage_dir();
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            knowledge_file: root.join("knowledge.json"),
            embeddings_file: root.join("embeddings.json"),
            telemetry_file: None,
            provider_timeout: Duration::from_secs(30),
            batch_size: DEFAULT_BATCH_SIZE,
            breaker: BreakerConfig::default(),
        }
    }
}

impl RagConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(key) = get("OPENAI_API_KEY") {
            config.api_key = key;
        }
        if let Some(model) = get("RAG_EMBEDDING_MODEL") {
            config.model = model;
        }
        if let Some(endpoint) = get("RAG_EMBEDDINGS_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(path) = get("RAG_KB_FILE") {
            config.knowledge_file = PathBuf::from(path);
        }
        if let Some(path) = get("RAG_EMBEDDINGS_FILE") {
            config.embeddings_file = PathBuf::from(path);
        }
        config.telemetry_file = get("RAG_LOG_FILE").map(PathBuf::from);

        if let Some(secs) = parse::<u64>(get("RAG_PROVIDER_TIMEOUT_SECS"), "RAG_PROVIDER_TIMEOUT_SECS")? {
            config.provider_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(size) = parse::<usize>(get("RAG_BATCH_SIZE"), "RAG_BATCH_SIZE")? {
            config.batch_size = size.max(1);
        }
        if let Some(n) = parse::<u32>(get("CB_FAILURE_THRESHOLD"), "CB_FAILURE_THRESHOLD")? {
            config.breaker.failure_threshold = n.max(1);
        }
        if let Some(secs) = parse::<u64>(get("CB_OPEN_TTL_SECONDS"), "CB_OPEN_TTL_SECONDS")? {
            config.breaker.open_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = parse::<u32>(get("CB_HALF_OPEN_MAX_CALLS"), "CB_HALF_OPEN_MAX_CALLS")? {
            config.breaker.half_open_max_calls = n.max(1);
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(value: Option<String>, key: &str) -> Result<Option<T>> {
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| RagError::Config(format!("{} is not a valid number: {:?}", key, v)))
        })
        .transpose()
}

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("semantic-retrieval"))
        .unwrap_or_else(|| PathBuf::from("storage"))
}
