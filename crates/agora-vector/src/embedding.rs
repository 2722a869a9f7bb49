//! Embedding provider trait and the deterministic local provider.
//!
//! This module defines the `EmbeddingProvider` trait that abstracts over
//! different embedding generation backends (hosted APIs, fastembed, local).
//!
//! # Providers
//!
//! - `LocalEmbeddingProvider`: Deterministic feature-hashing vectors; never fails
//! - `OpenAiEmbeddingProvider` / `HuggingFaceEmbeddingProvider`: Hosted APIs (see [`crate::remote`])
//! - `FastEmbedProvider`: Local transformer models (requires `vector-fastembed` feature)
//! - `FailoverEmbedder`: Priority chain over the above (see [`crate::failover`])

use agora_core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sparse::{tokenize, words};

/// What an embedding will be used for.
///
/// Some models embed queries and documents asymmetrically; providers that
/// don't care ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedPurpose {
    /// Content being written to the index.
    Document,
    /// A search query.
    Query,
}

/// Trait for generating text embeddings.
///
/// Implementations wrap specific embedding backends and provide a uniform
/// async interface. The trait requires `Send + Sync` to allow safe sharing
/// across async tasks.
///
/// # Errors
///
/// Providers report a rate-limit response as [`agora_core::Error::RateLimited`]
/// and any other failure as [`agora_core::Error::Provider`], so the failover
/// chain can tell the two apart.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>>;

    /// Generate embeddings for a batch of texts.
    ///
    /// Default implementation calls `embed` for each text sequentially.
    /// Backends that support native batching should override this.
    async fn embed_batch(&self, texts: &[&str], purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text, purpose).await?);
        }
        Ok(results)
    }

    /// The embedding dimension.
    fn dimension(&self) -> usize;

    /// The provider name for diagnostics and rate-limit bookkeeping.
    fn name(&self) -> &str;
}

/// Deterministic local embedding provider.
///
/// Hashes word unigrams and character trigrams into a fixed number of
/// signed buckets and L2-normalizes the result. Texts sharing vocabulary
/// land close together, which is enough for a degraded-but-working
/// semantic search when no hosted provider is configured or reachable.
#[derive(Debug, Clone)]
pub struct LocalEmbeddingProvider {
    dimension: usize,
}

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.35;

impl LocalEmbeddingProvider {
    /// Create a new local provider with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn add_feature(&self, embedding: &mut [f32], feature: &str, weight: f32) {
        let hash = blake3::hash(feature.as_bytes());
        let bytes = hash.as_bytes();
        let bucket = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]) % self.dimension as u64;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        embedding[bucket as usize] += sign * weight;
    }

    /// Generate a deterministic embedding from text.
    fn deterministic_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return embedding;
        }

        let mut tokens = tokenize(text);
        if tokens.is_empty() {
            // Text made only of function words still gets a direction.
            tokens = words(text);
        }

        for token in tokens {
            self.add_feature(&mut embedding, &format!("w:{token}"), WORD_WEIGHT);

            let padded: Vec<char> = format!("#{token}#").chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut embedding, &format!("c:{trigram}"), TRIGRAM_WEIGHT);
            }
        }

        // Normalize to unit vector
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut embedding {
                *val /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str, _purpose: EmbedPurpose) -> Result<Vec<f32>> {
        Ok(self.deterministic_embedding(text))
    }

    async fn embed_batch(&self, texts: &[&str], _purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| self.deterministic_embedding(t))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Cosine similarity between two dense vectors.
///
/// Returns 0.0 when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ============================================================================
// Tests
// ============================================================================
