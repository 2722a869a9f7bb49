//! Configuration for the retrieval subsystem.
//!
//! Provides [`AgoraConfig`], loaded from TOML files, environment variables,
//! and defaults using the `confyg` crate.
//!
//! # Loading Priority
//!
//! 1. Explicit `--config <path>` flag
//! 2. `AGORA_CONFIG` environment variable
//! 3. XDG default: `~/.config/agora/config.toml`
//! 4. Built-in defaults
//!
//! Environment variables `AGORA_<SECTION>_<KEY>` overlay the file. confyg
//! passes env values as strings, so the overlay is meant for string
//! settings such as URLs, API keys and model names.

use std::path::PathBuf;
use std::time::Duration;

use agora_core::{Error, Result};
use agora_vector::{DimensionOverrides, Distance, RateLimitPolicy};
use confyg::{Confygery, env};
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::source::InteractionKind;

/// Name of the optional cross-modal collection.
pub const MULTIMODAL_COLLECTION: &str = "multimodal";

// ============================================================================
// Configuration structs
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgoraConfig {
    /// Vector store connection and collection layout.
    pub store: StoreConfig,

    /// Embedding providers and their limits.
    pub embedding: EmbeddingConfig,

    /// Search defaults.
    pub search: SearchConfig,

    /// Recommendation tuning.
    pub recommend: RecommendConfig,

    /// Indexing pipeline tuning.
    pub indexing: IndexingConfig,
}

/// Which vector store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Qdrant over REST.
    #[default]
    Qdrant,
    /// In-process exact search.
    Memory,
}

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store endpoint.
    pub url: String,

    /// API key, if the store requires one.
    pub api_key: Option<String>,

    /// Backend implementation.
    pub backend: StoreBackend,

    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,

    /// Dense dimension of every collection without an override.
    pub dense_dimension: usize,

    /// Dense distance metric.
    pub distance: Distance,

    /// Whether to create the multimodal collection.
    pub multimodal: bool,

    /// Dense dimension of the multimodal collection.
    pub multimodal_dimension: usize,

    /// Per-collection dense dimension overrides.
    pub collection_dimensions: DimensionOverrides,
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI (or compatible) API key. Enables the OpenAI provider.
    pub openai_api_key: Option<String>,

    /// OpenAI embedding model.
    pub openai_model: String,

    /// OpenAI-compatible API root.
    pub openai_base_url: Option<String>,

    /// Hugging Face API key. Enables the Hugging Face provider.
    pub huggingface_api_key: Option<String>,

    /// Hugging Face model.
    pub huggingface_model: String,

    /// fastembed model (only with the `vector-fastembed` feature).
    pub fastembed_model: Option<String>,

    /// fastembed model encoding queries for the multimodal collection (only
    /// with the `vector-fastembed` feature). Must match `multimodal_dimension`.
    pub multimodal_model: Option<String>,

    /// Per-call timeout in milliseconds.
    pub call_timeout_ms: u64,

    /// Requests allowed per provider per window.
    pub requests_per_window: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// First backoff in milliseconds.
    pub base_backoff_ms: u64,

    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,

    /// Consecutive failures before a provider backs off.
    pub failure_threshold: u32,
}

/// Score thresholds applied per search mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreThresholds {
    /// Dense-only (cosine).
    pub dense: f32,
    /// Sparse-only (dot).
    pub sparse: f32,
    /// RRF-fused.
    pub rrf: f32,
    /// DBSF-fused.
    pub dbsf: f32,
}

/// Search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// RRF smoothing constant.
    pub rrf_k: usize,

    /// Candidates fetched per list, as a multiple of the requested limit.
    pub prefetch_multiplier: usize,

    /// Limit used when the caller gives none.
    pub default_limit: usize,

    /// Default thresholds per mode.
    pub thresholds: ScoreThresholds,

    /// Default multi-stage candidate limit.
    pub default_candidate_limit: usize,
}

/// What to recommend to users with no interaction history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendFallback {
    /// Fail with `ProfileUnavailable`.
    None,
    /// Most-engaged posts.
    #[default]
    Popular,
}

/// Weight of each interaction kind in a profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionWeights {
    /// Up-vote.
    pub upvote: f32,
    /// Down-vote.
    pub downvote: f32,
    /// Bookmark.
    pub bookmark: f32,
    /// Comment.
    pub comment: f32,
    /// View.
    pub view: f32,
}

/// Recommendation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    /// Age at which an interaction counts half.
    pub half_life_days: f64,

    /// Most recent interactions considered.
    pub profile_depth: usize,

    /// Default pairwise similarity cap for diversity filtering.
    pub diversity_threshold: f32,

    /// Behaviour for users without history.
    pub fallback: RecommendFallback,

    /// Posts scanned by the popularity fallback.
    pub popular_scan: usize,

    /// Interaction weights.
    pub weights: InteractionWeights,
}

/// Indexing pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Extra attempts for a failed store write.
    pub retry_attempts: usize,

    /// First retry delay in milliseconds.
    pub retry_min_delay_ms: u64,

    /// Retry delay cap in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Capacity of the indexing outbox queue.
    pub outbox_capacity: usize,

    /// Characters of body text kept in payload excerpts.
    pub excerpt_chars: usize,
}

// ============================================================================
// Default implementations
// ============================================================================

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
            backend: StoreBackend::default(),
            timeout_ms: 5_000,
            dense_dimension: 384,
            distance: Distance::Cosine,
            collection_dimensions: DimensionOverrides::new(),
            multimodal: false,
            multimodal_dimension: 512,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: agora_vector::remote::OPENAI_MODEL.to_string(),
            openai_base_url: None,
            huggingface_api_key: None,
            huggingface_model: agora_vector::remote::HUGGINGFACE_MODEL.to_string(),
            fastembed_model: None,
            multimodal_model: None,
            call_timeout_ms: 10_000,
            requests_per_window: 60,
            window_secs: 60,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            failure_threshold: 3,
        }
    }
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            dense: 0.2,
            sparse: 0.0,
            rrf: 0.0,
            dbsf: 0.0,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: crate::fusion::DEFAULT_RRF_K,
            prefetch_multiplier: 3,
            default_limit: 10,
            thresholds: ScoreThresholds::default(),
            default_candidate_limit: 100,
        }
    }
}

impl Default for InteractionWeights {
    fn default() -> Self {
        Self {
            upvote: 1.0,
            downvote: -1.0,
            bookmark: 2.0,
            comment: 1.5,
            view: 0.25,
        }
    }
}

impl InteractionWeights {
    /// Weight of one interaction kind.
    pub fn weight(&self, kind: InteractionKind) -> f32 {
        match kind {
            InteractionKind::Upvote => self.upvote,
            InteractionKind::Downvote => self.downvote,
            InteractionKind::Bookmark => self.bookmark,
            InteractionKind::Comment => self.comment,
            InteractionKind::View => self.view,
        }
    }
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            weights: InteractionWeights::default(),
            profile_depth: 20,
            diversity_threshold: 0.9,
            fallback: RecommendFallback::default(),
            popular_scan: 200,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 2,
            retry_min_delay_ms: 200,
            retry_max_delay_ms: 2_000,
            outbox_capacity: 1_024,
            excerpt_chars: 280,
        }
    }
}

// ============================================================================
// Derived settings
// ============================================================================

impl StoreConfig {
    /// Dense dimension of a collection, honouring overrides.
    pub fn dimension_for(&self, collection: &str) -> usize {
        self.collection_dimensions
            .get(collection)
            .copied()
            .unwrap_or(self.dense_dimension)
    }

    /// Every collection this configuration declares.
    pub fn collection_specs(&self) -> Vec<agora_vector::CollectionSpec> {
        let mut specs: Vec<_> = EntityKind::ALL
            .iter()
            .map(|kind| {
                let name = kind.collection();
                agora_vector::CollectionSpec::hybrid(name, self.dimension_for(name), self.distance)
            })
            .collect();
        if self.multimodal {
            specs.push(agora_vector::CollectionSpec::dense_only(
                MULTIMODAL_COLLECTION,
                self.multimodal_dimension,
                self.distance,
            ));
        }
        specs
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl EmbeddingConfig {
    /// Rate-limit policy for the failover chain.
    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            requests_per_window: self.requests_per_window,
            window: Duration::from_secs(self.window_secs),
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            failure_threshold: self.failure_threshold,
        }
    }

    /// Per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Whether any hosted provider is configured.
    pub fn has_hosted_provider(&self) -> bool {
        self.openai_api_key.as_deref().is_some_and(|k| !k.is_empty())
            || self
                .huggingface_api_key
                .as_deref()
                .is_some_and(|k| !k.is_empty())
    }
}

// ============================================================================
// Config loading
// ============================================================================

impl AgoraConfig {
    /// Load configuration from file, environment, and defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder =
            Confygery::new().map_err(|e| Error::config(format!("config init: {e}")))?;

        if let Some(path) = Self::resolve_config_path(config_path)
            && path.exists()
        {
            builder
                .add_file(&path.to_string_lossy())
                .map_err(|e| Error::config(format!("config file: {e}")))?;
        }

        let mut env_opts = env::Options::with_top_level("AGORA");
        for section in ["store", "embedding", "search", "recommend", "indexing"] {
            env_opts.add_section(section);
        }
        builder
            .add_env(env_opts)
            .map_err(|e| Error::config(format!("config env: {e}")))?;

        let config: Self = builder
            .build()
            .map_err(|e| Error::config(format!("config build: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every call fail.
    pub fn validate(&self) -> Result<()> {
        if self.store.dense_dimension == 0 {
            return Err(Error::config("store.dense_dimension must be positive"));
        }
        if let Some((name, _)) = self.store.collection_dimensions.iter().find(|(_, d)| **d == 0) {
            return Err(Error::config(format!(
                "store.collection_dimensions.{name} must be positive"
            )));
        }
        if self.search.prefetch_multiplier == 0 {
            return Err(Error::config("search.prefetch_multiplier must be positive"));
        }
        if self.recommend.half_life_days <= 0.0 {
            return Err(Error::config("recommend.half_life_days must be positive"));
        }
        if !(0.0..=1.0).contains(&self.recommend.diversity_threshold) {
            return Err(Error::config(
                "recommend.diversity_threshold must be within [0, 1]",
            ));
        }
        Ok(())
    }

    /// Resolve the config file path from explicit flag, env var, or XDG default.
    pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("AGORA_CONFIG") {
            return Some(PathBuf::from(path));
        }
        Self::default_config_path()
    }

    /// Return the XDG default config path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("agora").join("config.toml"))
    }

    /// Serialize this config to a pretty-printed TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Flatten this config into environment variable pairs with `AGORA_` prefix.
    pub fn to_env_vars(&self) -> Result<Vec<(String, String)>> {
        let value: toml::Value =
            toml::Value::try_from(self).map_err(|e| Error::config(e.to_string()))?;
        let mut vars = Vec::new();
        flatten_toml_value(&value, "AGORA", &mut vars);
        Ok(vars)
    }
}

/// Recursively flatten a TOML value into `KEY=value` pairs.
fn flatten_toml_value(value: &toml::Value, prefix: &str, out: &mut Vec<(String, String)>) {
    match value {
        toml::Value::Table(table) => {
            for (key, val) in table {
                let env_key = format!("{}_{}", prefix, key.to_uppercase());
                flatten_toml_value(val, &env_key, out);
            }
        }
        toml::Value::Array(arr) => {
            if let Ok(json) = serde_json::to_string(arr) {
                out.push((prefix.to_string(), json));
            }
        }
        toml::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        toml::Value::Integer(i) => out.push((prefix.to_string(), i.to_string())),
        toml::Value::Float(f) => out.push((prefix.to_string(), f.to_string())),
        toml::Value::Boolean(b) => out.push((prefix.to_string(), b.to_string())),
        toml::Value::Datetime(dt) => out.push((prefix.to_string(), dt.to_string())),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AgoraConfig::default();
        assert_eq!(config.store.url, "http://localhost:6333");
        assert_eq!(config.store.backend, StoreBackend::Qdrant);
        assert_eq!(config.store.dense_dimension, 384);
        assert_eq!(config.search.rrf_k, 60);
        assert_eq!(config.search.thresholds.dense, 0.2);
        assert_eq!(config.recommend.fallback, RecommendFallback::Popular);
        assert_eq!(config.recommend.weights.weight(InteractionKind::Bookmark), 2.0);
        assert_eq!(config.indexing.excerpt_chars, 280);
        assert!(!config.embedding.has_hosted_provider());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let config: AgoraConfig = toml::from_str(
            r#"
                [store]
                backend = "memory"
                dense_dimension = 64
                multimodal = true

                [store.collection_dimensions]
                users = 32

                [search.thresholds]
                dense = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.dimension_for("posts"), 64);
        assert_eq!(config.store.dimension_for("users"), 32);
        assert_eq!(config.search.thresholds.dense, 0.5);
        assert_eq!(config.search.thresholds.rrf, 0.0);
        assert_eq!(config.search.default_limit, 10);

        let specs = config.store.collection_specs();
        assert_eq!(specs.len(), 5);
        assert_eq!(specs[4].name, MULTIMODAL_COLLECTION);
        assert!(!specs[4].sparse);
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let config = AgoraConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("[store]"));
        assert!(toml_str.contains("rrf_k = 60"));
        let parsed: AgoraConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.search.rrf_k, config.search.rrf_k);
        assert_eq!(parsed.store.url, config.store.url);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                [store]
                url = "http://qdrant:6333"
                [recommend]
                fallback = "none"
            "#,
        )
        .unwrap();

        let config = AgoraConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.store.url, "http://qdrant:6333");
        assert_eq!(config.recommend.fallback, RecommendFallback::None);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = AgoraConfig::load(Some("/nonexistent/agora.toml")).unwrap();
        assert_eq!(config.store.dense_dimension, 384);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AgoraConfig::default();
        config.store.dense_dimension = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AgoraConfig::default();
        config.recommend.diversity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_config_path() {
        let path = AgoraConfig::resolve_config_path(Some("/explicit/config.toml"));
        assert_eq!(path, Some(PathBuf::from("/explicit/config.toml")));
        if let Some(default) = AgoraConfig::default_config_path() {
            assert!(default.ends_with("agora/config.toml"));
        }
    }

    #[test]
    fn test_to_env_vars() {
        let vars = AgoraConfig::default().to_env_vars().unwrap();
        let map: HashMap<_, _> = vars.into_iter().collect();
        assert_eq!(map["AGORA_STORE_URL"], "http://localhost:6333");
        assert_eq!(map["AGORA_SEARCH_RRF_K"], "60");
        assert_eq!(map["AGORA_RECOMMEND_FALLBACK"], "popular");
    }
}
