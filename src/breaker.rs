//! Circuit breaker in front of the embedding provider.
//!
//! After `failure_threshold` consecutive failures the circuit opens and calls
//! fail fast for `open_ttl`. Then up to `half_open_max_calls` probe calls are
//! let through; a success closes the circuit, a failure reopens it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::document::Vector;
use crate::embeddings::EmbeddingProvider;
use crate::error::{RagError, Result};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_ttl: Duration,
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_ttl: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    half_open_calls: u32,
}

type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
    clock: Clock,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(Instant::now))
    }

    pub fn with_clock(config: BreakerConfig, clock: Clock) -> Self {
        CircuitBreaker {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                half_open_calls: 0,
            }),
            clock,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(BreakerState::Open)
    }

    /// Admits or rejects a call.
    pub fn before_call(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let now = (self.clock)();

        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default();
            if elapsed < self.config.open_ttl {
                return Err(RagError::provider("circuit open, embedding provider short-circuited"));
            }
            info!("embedding circuit half-open");
            inner.state = BreakerState::HalfOpen;
            inner.half_open_calls = 0;
        }

        if inner.state == BreakerState::HalfOpen {
            if inner.half_open_calls >= self.config.half_open_max_calls {
                return Err(RagError::provider("circuit half-open, probe budget exhausted"));
            }
            inner.half_open_calls += 1;
        }

        Ok(())
    }

    pub fn on_success(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state != BreakerState::Closed {
                info!("embedding circuit closed");
            }
            inner.state = BreakerState::Closed;
            inner.failures = 0;
            inner.opened_at = None;
            inner.half_open_calls = 0;
        }
    }

    pub fn on_failure(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.failures += 1;
        let should_open = inner.state != BreakerState::Closed
            || inner.failures >= self.config.failure_threshold;
        if should_open {
            warn!(failures = inner.failures, "embedding circuit opened");
            inner.state = BreakerState::Open;
            inner.opened_at = Some((self.clock)());
            inner.half_open_calls = 0;
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| RagError::provider("circuit breaker lock poisoned"))
    }
}

/// Wraps a provider so every call passes through a [`CircuitBreaker`].
pub struct GuardedProvider<P> {
    inner: P,
    breaker: CircuitBreaker,
}

impl<P: EmbeddingProvider> GuardedProvider<P> {
    pub fn new(inner: P, breaker: CircuitBreaker) -> Self {
        GuardedProvider { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for GuardedProvider<P> {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.breaker.before_call()?;
        match self.inner.embed_documents(texts).await {
            Ok(vectors) => {
                self.breaker.on_success();
                Ok(vectors)
            }
            Err(e) => {
                self.breaker.on_failure();
                Err(e)
            }
        }
    }

    async fn embed_query(&self, text: &str) -> Result<Vector> {
        self.breaker.before_call()?;
        match self.inner.embed_query(text).await {
            Ok(vector) => {
                self.breaker.on_success();
                Ok(vector)
            }
            Err(e) => {
                self.breaker.on_failure();
                Err(e)
            }
        }
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}
