//! FastEmbed embedding provider.
//!
//! Runs pre-trained ONNX models (BGE, MiniLM, E5, the CLIP text tower) locally. Used as the
//! second link of the failover chain: slower than a hosted API but with no
//! quota to exhaust.
//!
//! `fastembed::TextEmbedding` needs `&mut` access and is not `Sync`, so the
//! model lives behind `Arc<Mutex<>>` and every call runs on
//! `tokio::task::spawn_blocking`.
//!
//! Requires the `vector-fastembed` feature.

use std::sync::{Arc, Mutex};

use agora_core::{Error, Result};
use async_trait::async_trait;

use crate::embedding::{EmbedPurpose, EmbeddingProvider};

const PROVIDER: &str = "fastembed";

fn resolve_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "bge-small-en-v1.5" | "BGESmallENV15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "all-minilm-l6-v2" | "AllMiniLML6V2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-base-en-v1.5" | "BGEBaseENV15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" | "MultilingualE5Small" => {
            Ok(fastembed::EmbeddingModel::MultilingualE5Small)
        }
        "clip-vit-b-32" | "ClipVitB32" => Ok(fastembed::EmbeddingModel::ClipVitB32),
        other => Err(Error::config(format!(
            "Unknown fastembed model: '{other}'. Supported: bge-small-en-v1.5, all-minilm-l6-v2, bge-base-en-v1.5, multilingual-e5-small, clip-vit-b-32"
        ))),
    }
}

/// E5-family models expect role prefixes on their input.
fn prefixed(model_name: &str, text: &str, purpose: EmbedPurpose) -> String {
    if !model_name.contains("e5") {
        return text.to_string();
    }
    match purpose {
        EmbedPurpose::Query => format!("query: {text}"),
        EmbedPurpose::Document => format!("passage: {text}"),
    }
}

/// Local transformer embedding provider.
pub struct FastEmbedProvider {
    model: Arc<Mutex<fastembed::TextEmbedding>>,
    dimension: usize,
    model_name: String,
}

impl FastEmbedProvider {
    /// Load (downloading on first use) the named model.
    pub fn new(model_name: &str, cache_path: Option<&str>) -> Result<Self> {
        let model_enum = resolve_model(model_name)?;

        let mut init = fastembed::InitOptions::new(model_enum);
        if let Some(path) = cache_path {
            init = init.with_cache_dir(std::path::PathBuf::from(path));
        }

        let mut text_embedding = fastembed::TextEmbedding::try_new(init)
            .map_err(|e| Error::provider(PROVIDER, format!("model init failed: {e}")))?;

        let probe = text_embedding
            .embed(vec!["dimension probe"], None)
            .map_err(|e| Error::provider(PROVIDER, format!("dimension probe failed: {e}")))?;
        let dimension = probe
            .first()
            .map(|v| v.len())
            .ok_or_else(|| Error::provider(PROVIDER, "empty probe embedding"))?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            dimension,
            model_name: model_name.to_lowercase(),
        })
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|e| Error::provider(PROVIDER, format!("mutex poisoned: {e}")))?;
            model
                .embed(texts, None)
                .map_err(|e| Error::provider(PROVIDER, format!("embedding failed: {e}")))
        })
        .await
        .map_err(|e| Error::provider(PROVIDER, format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>> {
        self.run(vec![prefixed(&self.model_name, text, purpose)])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider(PROVIDER, "no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[&str], purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>> {
        let inputs = texts
            .iter()
            .map(|t| prefixed(&self.model_name, t, purpose))
            .collect();
        self.run(inputs).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model", &self.model_name)
            .field("dimension", &self.dimension)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
