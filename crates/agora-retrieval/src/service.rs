//! The retrieval subsystem as one object.
//!
//! [`RetrievalService`] wires the vector store, the failover embedding
//! chain, the indexing pipeline, the search engine and the recommender
//! together. It is what the web layer holds.

use std::sync::Arc;

use agora_core::Result;
use agora_vector::{
    CollectionSpec, EmbeddingProvider, FailoverEmbedder, HuggingFaceEmbeddingProvider,
    LocalEmbeddingProvider, MemoryVectorStore, OpenAiEmbeddingProvider, ProviderStatus,
    QdrantStore, RateLimiter, VectorStore,
};
use log::{info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::{AgoraConfig, EmbeddingConfig, StoreBackend, StoreConfig};
use crate::entity::{Entity, EntityRef};
use crate::indexing::{IndexEvent, IndexReport, IndexingOutbox, IndexingPipeline, RetryPolicy};
use crate::multistage::MultiStageOptions;
use crate::recommend::{RecommendOptions, Recommender, UserProfile};
use crate::search::{HybridSearchOptions, SearchEngine, SearchHit, SearchScope};
use crate::source::ContentSource;

/// Snapshot for an operational status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Store backend name.
    pub store: String,
    /// Whether the store answered its liveness probe.
    pub ready: bool,
    /// Per-provider rate-limit and backoff state, in priority order.
    pub providers: Vec<ProviderStatus>,
}

/// Facade over the retrieval subsystem.
pub struct RetrievalService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<FailoverEmbedder>,
    pipeline: Arc<IndexingPipeline>,
    search: SearchEngine,
    recommender: Recommender,
    specs: Vec<CollectionSpec>,
    outbox_capacity: usize,
}

impl RetrievalService {
    /// Build the store and embedding chain described by `config`.
    pub fn from_config(config: &AgoraConfig, source: Arc<dyn ContentSource>) -> Result<Self> {
        config.validate()?;
        let store = build_store(&config.store)?;
        let embedder = build_embedder(&config.embedding, config.store.dense_dimension)?;
        let multimodal = if config.store.multimodal {
            Some(build_multimodal_encoder(
                &config.embedding,
                config.store.multimodal_dimension,
            )?)
        } else {
            None
        };
        info!(
            "Retrieval service: store={}, embedding providers={:?}, multimodal={}",
            store.name(),
            embedder.provider_names(),
            multimodal.as_ref().map_or("off", |m| m.name())
        );
        Ok(Self::assemble(config, store, embedder, multimodal, source))
    }

    /// Assemble from already-built parts.
    ///
    /// A multimodal collection, if configured, gets the local encoder.
    pub fn new(
        config: &AgoraConfig,
        store: Arc<dyn VectorStore>,
        embedder: FailoverEmbedder,
        source: Arc<dyn ContentSource>,
    ) -> Self {
        let multimodal = config.store.multimodal.then(|| {
            Arc::new(LocalEmbeddingProvider::new(config.store.multimodal_dimension))
                as Arc<dyn EmbeddingProvider>
        });
        Self::assemble(config, store, embedder, multimodal, source)
    }

    fn assemble(
        config: &AgoraConfig,
        store: Arc<dyn VectorStore>,
        embedder: FailoverEmbedder,
        multimodal: Option<Arc<dyn EmbeddingProvider>>,
        source: Arc<dyn ContentSource>,
    ) -> Self {
        let embedder = Arc::new(embedder);
        let dense: Arc<dyn EmbeddingProvider> = embedder.clone();

        let specs = config.store.collection_specs();
        // Dense-only collections hold image vectors of their own size.
        for spec in specs.iter().filter(|s| s.sparse) {
            if let Some(d) = &spec.dense
                && d.size != dense.dimension()
            {
                warn!(
                    "Collection '{}' declares dimension {} but embeddings have {}; writes will be rejected",
                    spec.name,
                    d.size,
                    dense.dimension()
                );
            }
        }

        let mut pipeline = IndexingPipeline::new(store.clone(), dense.clone())
            .with_source(source.clone())
            .with_excerpt_chars(config.indexing.excerpt_chars)
            .with_retry(RetryPolicy::from(&config.indexing));
        let mut search = SearchEngine::new(store.clone(), dense, config.search.clone());
        if let Some(encoder) = multimodal {
            pipeline = pipeline.with_multimodal(encoder.clone());
            search = search.with_multimodal(encoder);
        }
        let recommender = Recommender::new(
            store.clone(),
            source,
            config.recommend.clone(),
            config.search.rrf_k,
        );

        Self {
            store,
            embedder,
            pipeline: Arc::new(pipeline),
            search,
            recommender,
            specs,
            outbox_capacity: config.indexing.outbox_capacity,
        }
    }

    /// Liveness gate. `false` means callers should use their non-vector path.
    pub async fn is_ready(&self) -> bool {
        self.store.is_ready().await
    }

    /// Create any missing collections.
    pub async fn ensure_collections(&self) -> Result<()> {
        self.store.ensure_collections(&self.specs).await
    }

    /// Drop and recreate every collection.
    ///
    /// Destructive. No indexing may run concurrently.
    pub async fn force_reset(&self) -> Result<()> {
        warn!(
            "Resetting {} collections on {}",
            self.specs.len(),
            self.store.name()
        );
        self.store.force_reset(&self.specs).await
    }

    /// Declared collections.
    pub fn collection_specs(&self) -> &[CollectionSpec] {
        &self.specs
    }

    /// Index one entity.
    pub async fn index_entity(&self, entity: &Entity) -> Result<()> {
        self.pipeline.index_entity(entity).await
    }

    /// Remove one entity.
    pub async fn delete_entity(&self, entity: EntityRef) -> Result<()> {
        self.pipeline.delete_entity(entity).await
    }

    /// Patch an entity's engagement counters.
    pub async fn refresh_signals(&self, entity: EntityRef) -> Result<()> {
        self.pipeline.refresh_signals(entity).await
    }

    /// Apply a write-path event, logging and discarding failures.
    pub async fn notify(&self, event: IndexEvent) {
        self.pipeline.notify(event).await;
    }

    /// Index an entity into the multimodal collection, optionally with a
    /// precomputed cross-modal vector.
    pub async fn index_multimodal(&self, entity: &Entity, vector: Option<Vec<f32>>) -> Result<()> {
        self.pipeline.index_multimodal(entity, vector).await
    }

    /// Index a batch, continuing past failures.
    pub async fn reindex_all(&self, entities: &[Entity]) -> IndexReport {
        self.pipeline.reindex_all(entities).await
    }

    /// Start a background indexing queue.
    pub fn spawn_outbox(&self) -> (IndexingOutbox, JoinHandle<usize>) {
        IndexingOutbox::spawn(self.pipeline.clone(), self.outbox_capacity)
    }

    /// Hybrid dense/sparse search.
    pub async fn hybrid_search(
        &self,
        query: &str,
        scope: &SearchScope,
        opts: &HybridSearchOptions,
    ) -> Result<Vec<SearchHit>> {
        self.search.hybrid_search(query, scope, opts).await
    }

    /// Candidate generation and rescoring.
    pub async fn multi_stage_search(
        &self,
        query: &str,
        opts: &MultiStageOptions,
    ) -> Result<Vec<SearchHit>> {
        self.search.multi_stage_search(query, opts).await
    }

    /// Recommendations for a user.
    pub async fn recommend(&self, user_id: i64, opts: &RecommendOptions) -> Result<Vec<SearchHit>> {
        self.recommender.recommend(user_id, opts).await
    }

    /// Recommendations for a caller-supplied profile.
    pub async fn recommend_for_profile(
        &self,
        profile: &UserProfile,
        opts: &RecommendOptions,
    ) -> Result<Vec<SearchHit>> {
        self.recommender.recommend_for_profile(profile, opts).await
    }

    /// Per-provider rate-limit and backoff state.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.embedder.status()
    }

    /// Store readiness and provider state.
    pub async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            store: self.store.name().to_string(),
            ready: self.is_ready().await,
            providers: self.provider_status(),
        }
    }
}

/// Build the configured vector store.
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    Ok(match config.backend {
        StoreBackend::Memory => Arc::new(MemoryVectorStore::new()),
        StoreBackend::Qdrant => Arc::new(
            QdrantStore::new(&config.url, config.timeout())?.with_api_key(config.api_key.clone()),
        ),
    })
}

/// Build the multimodal encoder: the fastembed CLIP text tower if configured,
/// otherwise the local provider at the collection's dimension.
///
/// Fails when the encoder's dimension differs from the collection's, since
/// every multimodal query would then be rejected by the store.
pub fn build_multimodal_encoder(
    config: &EmbeddingConfig,
    dimension: usize,
) -> Result<Arc<dyn EmbeddingProvider>> {
    #[cfg(feature = "vector-fastembed")]
    {
        if let Some(model) = &config.multimodal_model {
            let provider = agora_vector::FastEmbedProvider::new(model, None)?;
            if provider.dimension() != dimension {
                return Err(agora_core::Error::config(format!(
                    "multimodal model '{model}' has dimension {}, but the multimodal collection declares {dimension}",
                    provider.dimension()
                )));
            }
            return Ok(Arc::new(provider));
        }
    }
    #[cfg(not(feature = "vector-fastembed"))]
    if config.multimodal_model.is_some() {
        warn!("multimodal_model needs the vector-fastembed feature; using local encoder");
    }

    Ok(Arc::new(LocalEmbeddingProvider::new(dimension)))
}

/// Build the failover chain: hosted providers with keys, then fastembed if
/// configured, then the deterministic local provider.
pub fn build_embedder(config: &EmbeddingConfig, dimension: usize) -> Result<FailoverEmbedder> {
    let mut providers: Vec<Arc<dyn EmbeddingProvider>> = Vec::new();

    if let Some(key) = config.openai_api_key.as_deref().filter(|k| !k.is_empty()) {
        let mut provider = OpenAiEmbeddingProvider::new(key, &config.openai_model, dimension);
        if let Some(url) = &config.openai_base_url {
            provider = provider.with_base_url(url);
        }
        providers.push(Arc::new(provider));
    }
    if let Some(key) = config.huggingface_api_key.as_deref().filter(|k| !k.is_empty()) {
        providers.push(Arc::new(HuggingFaceEmbeddingProvider::new(
            key,
            &config.huggingface_model,
            dimension,
        )));
    }

    #[cfg(feature = "vector-fastembed")]
    {
        if let Some(model) = &config.fastembed_model {
            match agora_vector::FastEmbedProvider::new(model, None) {
                Ok(provider) if provider.dimension() == dimension => {
                    providers.push(Arc::new(provider))
                }
                Ok(provider) => warn!(
                    "fastembed model '{model}' has dimension {}, expected {dimension}; skipping",
                    provider.dimension()
                ),
                Err(e) => warn!("fastembed model '{model}' unavailable: {e}"),
            }
        }
    }

    if providers.is_empty() {
        info!("No hosted embedding provider configured, using local embeddings only");
    }
    providers.push(Arc::new(LocalEmbeddingProvider::new(dimension)));

    let limiter = Arc::new(RateLimiter::new(config.rate_limit_policy()));
    Ok(FailoverEmbedder::new(providers, limiter)?.with_call_timeout(config.call_timeout()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entity::tests::post;
    use crate::search::MatchType;
    use crate::source::MemoryContentSource;

    fn memory_config() -> AgoraConfig {
        let mut config = AgoraConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.store.dense_dimension = 64;
        config
    }

    #[test]
    fn test_build_embedder_without_keys_is_local_only() {
        let embedder = build_embedder(&EmbeddingConfig::default(), 64).unwrap();
        assert_eq!(embedder.provider_names(), vec!["local"]);
        assert_eq!(embedder.dimension(), 64);
    }

    #[test]
    fn test_build_embedder_orders_hosted_first() {
        let config = EmbeddingConfig {
            openai_api_key: Some("sk-test".into()),
            huggingface_api_key: Some("hf-test".into()),
            ..EmbeddingConfig::default()
        };
        let embedder = build_embedder(&config, 384).unwrap();
        let names = embedder.provider_names();
        assert_eq!(names.len(), 3);
        assert_eq!(names.last(), Some(&"local"));
    }

    #[test]
    fn test_empty_key_is_ignored() {
        let config = EmbeddingConfig {
            openai_api_key: Some(String::new()),
            ..EmbeddingConfig::default()
        };
        assert_eq!(build_embedder(&config, 8).unwrap().provider_names(), vec!["local"]);
    }

    #[tokio::test]
    async fn test_from_config_memory_roundtrip() {
        let service =
            RetrievalService::from_config(&memory_config(), Arc::new(MemoryContentSource::new()))
                .unwrap();
        assert!(service.is_ready().await);
        service.ensure_collections().await.unwrap();

        service
            .index_entity(&Entity::Post(post(1, "Quantum basics", "Qubits")))
            .await
            .unwrap();
        let hits = service
            .hybrid_search("quantum", &SearchScope::default(), &HybridSearchOptions::new(5))
            .await
            .unwrap();
        assert_eq!(hits[0].entity, EntityRef::post(1));

        let status = service.status().await;
        assert_eq!(status.store, "memory");
        assert!(status.ready);
        assert_eq!(status.providers.len(), 1);
        assert_eq!(status.providers[0].requests_in_window, 2);
    }

    #[tokio::test]
    async fn test_multimodal_search_uses_collection_dimension() {
        let mut config = memory_config();
        config.store.multimodal = true;
        assert_ne!(config.store.multimodal_dimension, config.store.dense_dimension);

        let service =
            RetrievalService::from_config(&config, Arc::new(MemoryContentSource::new())).unwrap();
        service.ensure_collections().await.unwrap();
        service
            .index_entity(&Entity::Post(post(1, "Quantum basics", "Qubits")))
            .await
            .unwrap();

        let hits = service
            .hybrid_search("quantum", &SearchScope::Multimodal, &HybridSearchOptions::new(5))
            .await
            .unwrap();
        assert_eq!(hits[0].entity, EntityRef::post(1));
        assert!(hits.iter().all(|h| h.match_type == MatchType::Dense));
    }

    #[tokio::test]
    async fn test_multimodal_scope_without_collection_is_bad_request() {
        let service =
            RetrievalService::from_config(&memory_config(), Arc::new(MemoryContentSource::new()))
                .unwrap();
        service.ensure_collections().await.unwrap();
        let err = service
            .hybrid_search("quantum", &SearchScope::Multimodal, &HybridSearchOptions::new(5))
            .await
            .unwrap_err();
        assert!(matches!(err, agora_core::Error::BadRequest(_)));
    }

    #[test]
    fn test_multimodal_encoder_matches_collection() {
        let encoder = build_multimodal_encoder(&EmbeddingConfig::default(), 512).unwrap();
        assert_eq!(encoder.dimension(), 512);
    }

    #[tokio::test]
    async fn test_force_reset_empties_collections() {
        let service =
            RetrievalService::from_config(&memory_config(), Arc::new(MemoryContentSource::new()))
                .unwrap();
        service.ensure_collections().await.unwrap();
        service
            .index_entity(&Entity::Post(post(1, "t", "c")))
            .await
            .unwrap();
        service.force_reset().await.unwrap();
        let hits = service
            .hybrid_search(
                "t c",
                &SearchScope::default(),
                &HybridSearchOptions::new(5).dense_only().with_threshold(-1.0),
            )
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
