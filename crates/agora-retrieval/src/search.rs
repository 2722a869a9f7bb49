//! Hybrid search over one or more collections.
//!
//! A query is embedded densely and term-weighted sparsely. Every enabled
//! (collection, vector type) pair is searched concurrently and yields its own
//! ranked list. One list keeps its native scores; two or more are fused with
//! RRF or DBSF.
//!
//! An unready store fails the whole search with
//! [`Error::StoreUnavailable`] so the caller can fall back to a non-vector
//! search path.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use agora_core::{Error, Result};
use agora_vector::{
    EmbedPurpose, EmbeddingProvider, Filter, PayloadMap, PointId, QueryVector, ScoredPoint,
    SearchRequest, SparseVector, VectorStore, sparsify, term_weights,
};
use futures::future::try_join_all;
use log::{debug, warn};
use serde::Serialize;

use crate::config::{MULTIMODAL_COLLECTION, SearchConfig};
use crate::entity::{EntityKind, EntityRef};
use crate::fusion::{FusionMethod, fuse};
use crate::payload::Payload;

// ============================================================================
// Options and results
// ============================================================================

/// Which collections a search covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    /// One or more entity collections.
    Kinds(Vec<EntityKind>),
    /// The cross-modal collection (dense only).
    Multimodal,
}

impl SearchScope {
    /// Every entity collection.
    pub fn all() -> Self {
        Self::Kinds(EntityKind::ALL.to_vec())
    }

    /// A single entity collection.
    pub fn kind(kind: EntityKind) -> Self {
        Self::Kinds(vec![kind])
    }

    /// Collection names in search order.
    pub fn collections(&self) -> Vec<&'static str> {
        match self {
            Self::Kinds(kinds) => kinds.iter().map(|k| k.collection()).collect(),
            Self::Multimodal => vec![MULTIMODAL_COLLECTION],
        }
    }

    /// Whether the scope's collections carry sparse vectors.
    pub fn supports_sparse(&self) -> bool {
        matches!(self, Self::Kinds(_))
    }
}

impl Default for SearchScope {
    fn default() -> Self {
        Self::kind(EntityKind::Post)
    }
}

impl FromStr for SearchScope {
    type Err = Error;

    /// `all`, `multimodal`, or a comma-separated list of kinds.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Self::all()),
            "multimodal" => Ok(Self::Multimodal),
            list => {
                let mut kinds = Vec::new();
                for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    let kind: EntityKind = part.parse()?;
                    if !kinds.contains(&kind) {
                        kinds.push(kind);
                    }
                }
                if kinds.is_empty() {
                    return Err(Error::bad_request("empty search scope"));
                }
                Ok(Self::Kinds(kinds))
            }
        }
    }
}

/// Options for [`SearchEngine::hybrid_search`].
#[derive(Debug, Clone)]
pub struct HybridSearchOptions {
    /// Maximum number of results.
    pub limit: usize,
    /// How lists are combined when there is more than one.
    pub fusion: FusionMethod,
    /// Minimum score kept; `None` uses the configured default for the mode.
    pub score_threshold: Option<f32>,
    /// Payload filter applied to every list.
    pub filter: Option<Filter>,
    /// Search the dense vectors.
    pub enable_dense: bool,
    /// Search the sparse vectors.
    pub enable_sparse: bool,
    /// Overall time budget.
    pub deadline: Option<Duration>,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            fusion: FusionMethod::default(),
            score_threshold: None,
            filter: None,
            enable_dense: true,
            enable_sparse: true,
            deadline: None,
        }
    }
}

impl HybridSearchOptions {
    /// Defaults with the given limit.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Set the fusion method.
    pub fn with_fusion(mut self, fusion: FusionMethod) -> Self {
        self.fusion = fusion;
        self
    }

    /// Set an explicit score threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    /// Set the payload filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Search dense vectors only.
    pub fn dense_only(mut self) -> Self {
        self.enable_dense = true;
        self.enable_sparse = false;
        self
    }

    /// Search sparse vectors only.
    pub fn sparse_only(mut self) -> Self {
        self.enable_dense = false;
        self.enable_sparse = true;
        self
    }

    /// Set the overall time budget.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Which signals produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Dense lists only.
    Dense,
    /// Sparse lists only.
    Sparse,
    /// Both.
    Hybrid,
    /// Ranked by engagement, not similarity.
    Popular,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dense => "dense",
            Self::Sparse => "sparse",
            Self::Hybrid => "hybrid",
            Self::Popular => "popular",
        })
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Vector store id.
    pub point_id: PointId,
    /// The entity the point was derived from.
    pub entity: EntityRef,
    /// Engine-native score. Not comparable across fusion methods.
    pub score: f64,
    /// 1-based position in the response.
    pub rank: usize,
    /// Denormalized display fields.
    pub payload: Payload,
    /// Which signals produced it.
    pub match_type: MatchType,
}

/// Turn a store payload into a typed hit, skipping foreign points.
pub(crate) fn typed_hit(
    point_id: PointId,
    payload: &PayloadMap,
    score: f64,
    match_type: MatchType,
) -> Option<SearchHit> {
    match Payload::from_map(payload) {
        Ok(payload) => Some(SearchHit {
            point_id,
            entity: payload.entity_ref(),
            score,
            rank: 0,
            payload,
            match_type,
        }),
        Err(e) => {
            warn!("Skipping point {point_id} with unreadable payload: {e}");
            None
        }
    }
}

/// Number hits from 1.
pub(crate) fn assign_ranks(hits: &mut [SearchHit]) {
    for (i, hit) in hits.iter_mut().enumerate() {
        hit.rank = i + 1;
    }
}

// ============================================================================
// Engine
// ============================================================================

struct RankedList {
    match_type: MatchType,
    points: Vec<ScoredPoint>,
}

/// Hybrid and multi-stage search over the vector store.
pub struct SearchEngine {
    pub(crate) store: Arc<dyn VectorStore>,
    pub(crate) embedder: Arc<dyn EmbeddingProvider>,
    pub(crate) rescorer: Option<Arc<dyn EmbeddingProvider>>,
    pub(crate) multimodal: Option<Arc<dyn EmbeddingProvider>>,
    pub(crate) settings: SearchConfig,
}

impl SearchEngine {
    /// Create an engine.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            rescorer: None,
            multimodal: None,
            settings,
        }
    }

    /// Query encoder for the multimodal collection. Its dimension must match
    /// the collection's.
    pub fn with_multimodal(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.multimodal = Some(embedder);
        self
    }

    /// The provider that embeds queries for `scope`.
    pub(crate) fn query_embedder(&self, scope: &SearchScope) -> Result<&Arc<dyn EmbeddingProvider>> {
        match scope {
            SearchScope::Kinds(_) => Ok(&self.embedder),
            SearchScope::Multimodal => self
                .multimodal
                .as_ref()
                .ok_or_else(|| Error::bad_request("multimodal search is not enabled")),
        }
    }

    /// Provider used by multi-stage re-embedding. Defaults to the main embedder.
    pub fn with_rescorer(mut self, rescorer: Arc<dyn EmbeddingProvider>) -> Self {
        self.rescorer = Some(rescorer);
        self
    }

    /// Search settings in effect.
    pub fn settings(&self) -> &SearchConfig {
        &self.settings
    }

    /// Fail with `StoreUnavailable` when the store is not ready.
    pub(crate) async fn require_ready(&self) -> Result<()> {
        if self.store.is_ready().await {
            Ok(())
        } else {
            Err(Error::store_unavailable(format!(
                "{} store is not ready",
                self.store.name()
            )))
        }
    }

    /// Run `fut` under an optional deadline.
    pub(crate) async fn within<T, F>(deadline: Option<Duration>, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::timeout(format!("{what} exceeded {limit:?}")))?,
            None => fut.await,
        }
    }

    /// Term-weighted sparse form of a query; `None` when it has no usable terms.
    pub(crate) fn sparse_query(query: &str) -> Option<SparseVector> {
        let sparse = sparsify(term_weights(query));
        (!sparse.is_empty()).then_some(sparse)
    }

    /// Ranked results for `query` across `scope`.
    pub async fn hybrid_search(
        &self,
        query: &str,
        scope: &SearchScope,
        opts: &HybridSearchOptions,
    ) -> Result<Vec<SearchHit>> {
        self.require_ready().await?;
        if opts.limit == 0 {
            return Err(Error::bad_request("limit must be positive"));
        }
        if !opts.enable_dense && !opts.enable_sparse {
            return Err(Error::bad_request(
                "at least one of dense or sparse search must be enabled",
            ));
        }
        if query.trim().is_empty() {
            return Err(Error::bad_request("empty query"));
        }

        Self::within(opts.deadline, "hybrid search", self.run_hybrid(query, scope, opts)).await
    }

    async fn run_hybrid(
        &self,
        query: &str,
        scope: &SearchScope,
        opts: &HybridSearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let dense = if opts.enable_dense {
            let embedder = self.query_embedder(scope)?;
            Some(embedder.embed(query, EmbedPurpose::Query).await?)
        } else {
            None
        };
        let sparse = if opts.enable_sparse && scope.supports_sparse() {
            Self::sparse_query(query)
        } else {
            None
        };

        let prefetch = opts.limit.saturating_mul(self.settings.prefetch_multiplier);
        let mut requests = Vec::new();
        for collection in scope.collections() {
            if let Some(vector) = &dense {
                requests.push((
                    collection,
                    MatchType::Dense,
                    QueryVector::Dense(vector.clone()),
                ));
            }
            if let Some(vector) = &sparse {
                requests.push((
                    collection,
                    MatchType::Sparse,
                    QueryVector::Sparse(vector.clone()),
                ));
            }
        }
        if requests.is_empty() {
            debug!("Query '{query}' has no searchable representation");
            return Ok(Vec::new());
        }

        let lists = try_join_all(requests.into_iter().map(|(collection, match_type, vector)| {
            let request = SearchRequest::new(vector, prefetch).with_filter(opts.filter.clone());
            async move {
                let points = self.store.search(collection, request).await?;
                Ok::<_, Error>(RankedList { match_type, points })
            }
        }))
        .await?;

        debug!(
            "Hybrid search '{query}': {} lists, {} candidates",
            lists.len(),
            lists.iter().map(|l| l.points.len()).sum::<usize>()
        );

        Ok(self.combine(lists, opts))
    }

    fn combine(&self, lists: Vec<RankedList>, opts: &HybridSearchOptions) -> Vec<SearchHit> {
        let thresholds = &self.settings.thresholds;

        let scored: Vec<(PointId, f64, MatchType)> = if let [single] = lists.as_slice() {
            let default = match single.match_type {
                MatchType::Sparse => thresholds.sparse,
                _ => thresholds.dense,
            };
            let threshold = f64::from(opts.score_threshold.unwrap_or(default));
            single
                .points
                .iter()
                .map(|p| (p.id, f64::from(p.score), single.match_type))
                .filter(|(_, score, _)| *score >= threshold)
                .collect()
        } else {
            let default = match opts.fusion {
                FusionMethod::Rrf => thresholds.rrf,
                FusionMethod::Dbsf => thresholds.dbsf,
            };
            let threshold = f64::from(opts.score_threshold.unwrap_or(default));
            let ranked: Vec<Vec<(PointId, f32)>> = lists
                .iter()
                .map(|l| l.points.iter().map(|p| (p.id, p.score)).collect())
                .collect();
            fuse(&ranked, opts.fusion, self.settings.rrf_k)
                .into_iter()
                .filter(|f| f.score >= threshold)
                .map(|f| {
                    let dense = f.sources.iter().any(|&i| lists[i].match_type == MatchType::Dense);
                    let sparse = f.sources.iter().any(|&i| lists[i].match_type == MatchType::Sparse);
                    let match_type = match (dense, sparse) {
                        (true, true) => MatchType::Hybrid,
                        (false, true) => MatchType::Sparse,
                        _ => MatchType::Dense,
                    };
                    (f.id, f.score, match_type)
                })
                .collect()
        };

        let payloads: HashMap<PointId, &PayloadMap> = lists
            .iter()
            .flat_map(|l| l.points.iter().map(|p| (p.id, &p.payload)))
            .collect();

        let mut hits: Vec<SearchHit> = scored
            .into_iter()
            .filter_map(|(id, score, match_type)| {
                payloads
                    .get(&id)
                    .and_then(|payload| typed_hit(id, payload, score, match_type))
            })
            .take(opts.limit)
            .collect();
        assign_ranks(&mut hits);
        hits
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::entity::tests::post;
    use crate::entity::{Category, Entity};
    use crate::indexing::IndexingPipeline;
    use agora_vector::{LocalEmbeddingProvider, MemoryVectorStore};
    use async_trait::async_trait;

    pub(crate) const DIM: usize = 128;

    pub(crate) async fn indexed_store(entities: &[Entity]) -> Arc<MemoryVectorStore> {
        let store = Arc::new(MemoryVectorStore::new());
        let config = StoreConfig {
            dense_dimension: DIM,
            ..StoreConfig::default()
        };
        store
            .ensure_collections(&config.collection_specs())
            .await
            .unwrap();
        let pipeline =
            IndexingPipeline::new(store.clone(), Arc::new(LocalEmbeddingProvider::new(DIM)));
        let report = pipeline.reindex_all(entities).await;
        assert!(report.failed.is_empty());
        store
    }

    pub(crate) fn corpus() -> Vec<Entity> {
        vec![
            Entity::Post(post(
                1,
                "Quantum basics",
                "An introduction to quantum computing: qubits, superposition and entanglement.",
            )),
            Entity::Post(post(
                2,
                "Sourdough starter tips",
                "Feed your starter flour and water daily and keep it warm.",
            )),
            Entity::Post(post(
                3,
                "Garden tomatoes",
                "Tomatoes need sun, deep watering and support stakes.",
            )),
            Entity::Category(Category {
                id: 3,
                name: "Physics".into(),
                description: Some("Quantum mechanics, relativity and more".into()),
                post_count: 1,
            }),
        ]
    }

    async fn engine() -> (SearchEngine, Arc<MemoryVectorStore>) {
        let store = indexed_store(&corpus()).await;
        let engine = SearchEngine::new(
            store.clone(),
            Arc::new(LocalEmbeddingProvider::new(DIM)),
            SearchConfig::default(),
        );
        (engine, store)
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!("all".parse::<SearchScope>().unwrap(), SearchScope::all());
        assert_eq!(
            "posts, comments,posts".parse::<SearchScope>().unwrap(),
            SearchScope::Kinds(vec![EntityKind::Post, EntityKind::Comment])
        );
        assert_eq!(
            "multimodal".parse::<SearchScope>().unwrap().collections(),
            vec![MULTIMODAL_COLLECTION]
        );
        assert!(" , ".parse::<SearchScope>().is_err());
        assert!("threads".parse::<SearchScope>().is_err());
    }

    #[tokio::test]
    async fn test_hybrid_finds_relevant_post_first() {
        let (engine, _) = engine().await;
        let hits = engine
            .hybrid_search(
                "quantum computing explained",
                &SearchScope::default(),
                &HybridSearchOptions::new(5),
            )
            .await
            .unwrap();
        assert_eq!(hits[0].entity, EntityRef::post(1));
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[0].match_type, MatchType::Hybrid);
        assert_eq!(hits[0].payload.title(), "Quantum basics");
        assert!(hits.iter().zip(hits.iter().skip(1)).all(|(a, b)| a.score >= b.score));
    }

    #[tokio::test]
    async fn test_repeated_queries_are_identical() {
        let (engine, _) = engine().await;
        let opts = HybridSearchOptions::new(10).with_fusion(FusionMethod::Dbsf);
        let a = engine
            .hybrid_search("watering tomatoes", &SearchScope::all(), &opts)
            .await
            .unwrap();
        let b = engine
            .hybrid_search("watering tomatoes", &SearchScope::all(), &opts)
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_dense_only_keeps_native_scores() {
        let (engine, _) = engine().await;
        let hits = engine
            .hybrid_search(
                "quantum qubits",
                &SearchScope::default(),
                &HybridSearchOptions::new(3).dense_only().with_threshold(-1.0),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.match_type == MatchType::Dense));
        assert!(hits.iter().all(|h| h.score <= 1.0 + 1e-6));
    }

    #[tokio::test]
    async fn test_sparse_only_with_stop_words_is_empty() {
        let (engine, _) = engine().await;
        let hits = engine
            .hybrid_search(
                "the and of",
                &SearchScope::default(),
                &HybridSearchOptions::new(3).sparse_only(),
            )
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_everyday_words_are_searchable() {
        let (engine, _) = engine().await;
        let hits = engine
            .hybrid_search(
                "keep it warm daily",
                &SearchScope::default(),
                &HybridSearchOptions::new(3).sparse_only(),
            )
            .await
            .unwrap();
        assert_eq!(hits[0].entity, EntityRef::post(2));
    }

    #[tokio::test]
    async fn test_scope_all_spans_collections() {
        let (engine, _) = engine().await;
        let hits = engine
            .hybrid_search("quantum", &SearchScope::all(), &HybridSearchOptions::new(10).sparse_only())
            .await
            .unwrap();
        let kinds: Vec<EntityKind> = hits.iter().map(|h| h.entity.kind).collect();
        assert!(kinds.contains(&EntityKind::Post));
        assert!(kinds.contains(&EntityKind::Category));
    }

    #[tokio::test]
    async fn test_filter_applies_to_every_list() {
        let (engine, _) = engine().await;
        let filter = Filter::new().must_equal(crate::payload::ENTITY_ID_KEY, 2);
        let hits = engine
            .hybrid_search(
                "quantum computing",
                &SearchScope::default(),
                &HybridSearchOptions::new(5).with_filter(filter),
            )
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.entity == EntityRef::post(2)));
    }

    #[tokio::test]
    async fn test_unready_store_is_store_unavailable() {
        let (engine, store) = engine().await;
        store.set_available(false);
        let err = engine
            .hybrid_search("quantum", &SearchScope::default(), &HybridSearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(err.is_degraded());
    }

    #[tokio::test]
    async fn test_bad_options() {
        let (engine, _) = engine().await;
        let scope = SearchScope::default();
        let mut opts = HybridSearchOptions::new(0);
        assert!(matches!(
            engine.hybrid_search("q", &scope, &opts).await,
            Err(Error::BadRequest(_))
        ));
        opts.limit = 5;
        opts.enable_dense = false;
        opts.enable_sparse = false;
        assert!(matches!(
            engine.hybrid_search("q", &scope, &opts).await,
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            engine
                .hybrid_search("  ", &scope, &HybridSearchOptions::default())
                .await,
            Err(Error::BadRequest(_))
        ));
    }

    struct HangingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for HangingEmbedder {
        async fn embed(&self, _text: &str, _purpose: EmbedPurpose) -> Result<Vec<f32>> {
            std::future::pending().await
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_timeout() {
        let (_, store) = engine().await;
        let engine = SearchEngine::new(store, Arc::new(HangingEmbedder), SearchConfig::default());
        let err = engine
            .hybrid_search(
                "quantum",
                &SearchScope::default(),
                &HybridSearchOptions::new(5).with_deadline(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
