//! Priority-ordered embedding failover.
//!
//! [`FailoverEmbedder`] tries its providers in order. Before each attempt
//! it asks the shared [`RateLimiter`] for admission; providers in backoff
//! or with an exhausted window are skipped without being called. Each call
//! runs under a timeout, and a timeout counts as an ordinary failure. A
//! rate-limit response puts the provider into backoff and the chain moves
//! on without retrying it in the same call.
//!
//! Only when every provider has been skipped or has failed does the caller
//! see [`Error::EmbeddingUnavailable`]. Putting a
//! [`LocalEmbeddingProvider`](crate::embedding::LocalEmbeddingProvider)
//! last makes that practically impossible.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use agora_core::{Error, Result};
use async_trait::async_trait;
use log::{debug, warn};

use crate::embedding::{EmbedPurpose, EmbeddingProvider};
use crate::rate_limit::{Denial, ProviderStatus, RateLimiter};

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Embedding provider that fails over across a priority list.
pub struct FailoverEmbedder {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    limiter: Arc<RateLimiter>,
    call_timeout: Duration,
    dimension: usize,
}

impl FailoverEmbedder {
    /// Build a chain over `providers`, highest priority first.
    ///
    /// Every provider must produce vectors of the same dimension, since
    /// they all write to the same collections.
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>, limiter: Arc<RateLimiter>) -> Result<Self> {
        let dimension = providers
            .first()
            .map(|p| p.dimension())
            .ok_or_else(|| Error::config("at least one embedding provider is required"))?;
        if let Some(odd) = providers.iter().find(|p| p.dimension() != dimension) {
            return Err(Error::config(format!(
                "embedding provider '{}' has dimension {}, expected {dimension}",
                odd.name(),
                odd.dimension()
            )));
        }
        Ok(Self {
            providers,
            limiter,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            dimension,
        })
    }

    /// Set the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Provider names in priority order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Rate-limit and backoff status of every provider, in priority order.
    pub fn status(&self) -> Vec<ProviderStatus> {
        self.limiter.status(self.providers.iter().map(|p| p.name()))
    }

    async fn run<T, F, Fut>(&self, call: F, valid: impl Fn(&T) -> bool) -> Result<T>
    where
        F: Fn(Arc<dyn EmbeddingProvider>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts: Vec<String> = Vec::new();

        for provider in &self.providers {
            let name = provider.name().to_string();

            match self.limiter.try_acquire(&name) {
                Ok(()) => {}
                Err(Denial::Backoff(left)) => {
                    debug!("Skipping embedding provider '{name}': backing off for {left:?}");
                    attempts.push(format!("{name}: backoff"));
                    continue;
                }
                Err(Denial::WindowExhausted(left)) => {
                    debug!("Skipping embedding provider '{name}': window resets in {left:?}");
                    attempts.push(format!("{name}: window exhausted"));
                    continue;
                }
            }

            let outcome = tokio::time::timeout(self.call_timeout, call(provider.clone()))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::timeout(format!(
                        "embedding provider '{name}' after {:?}",
                        self.call_timeout
                    )))
                });

            match outcome {
                Ok(value) if valid(&value) => {
                    self.limiter.record_success(&name);
                    return Ok(value);
                }
                Ok(_) => {
                    warn!(
                        "Embedding provider '{name}' returned vectors of the wrong dimension (expected {})",
                        self.dimension
                    );
                    self.limiter.record_failure(&name);
                    attempts.push(format!("{name}: wrong dimension"));
                }
                Err(Error::RateLimited { retry_after, .. }) => {
                    let backoff = self.limiter.record_rate_limited(&name, retry_after);
                    warn!("Embedding provider '{name}' rate limited; backing off {backoff:?}");
                    attempts.push(format!("{name}: rate limited"));
                }
                Err(e) => {
                    if let Some(backoff) = self.limiter.record_failure(&name) {
                        warn!("Embedding provider '{name}' failed: {e}; backing off {backoff:?}");
                    } else {
                        warn!("Embedding provider '{name}' failed: {e}");
                    }
                    attempts.push(format!("{name}: {e}"));
                }
            }
        }

        Err(Error::embedding_unavailable(format!(
            "all providers exhausted ({})",
            attempts.join("; ")
        )))
    }
}

#[async_trait]
impl EmbeddingProvider for FailoverEmbedder {
    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>> {
        let dimension = self.dimension;
        self.run(
            |provider| async move { provider.embed(text, purpose).await },
            |v: &Vec<f32>| v.len() == dimension,
        )
        .await
    }

    async fn embed_batch(&self, texts: &[&str], purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let dimension = self.dimension;
        let expected = texts.len();
        self.run(
            |provider| async move { provider.embed_batch(texts, purpose).await },
            |vs: &Vec<Vec<f32>>| vs.len() == expected && vs.iter().all(|v| v.len() == dimension),
        )
        .await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "failover"
    }
}

impl std::fmt::Debug for FailoverEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverEmbedder")
            .field("providers", &self.provider_names())
            .field("call_timeout", &self.call_timeout)
            .field("dimension", &self.dimension)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
