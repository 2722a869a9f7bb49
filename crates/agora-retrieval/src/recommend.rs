//! Personalised recommendations with diversity filtering.
//!
//! A user's profile is built from their recent interactions, each weighted
//! by kind and decayed by age (`weight · 0.5^(age / half_life)`):
//!
//! - the **collaborative** profile is the weighted sum of the sparse vectors
//!   of the content they engaged with (terms, authors, categories, tags);
//! - the **content** profile is the weighted mean of those items' dense
//!   vectors, over positive interactions only.
//!
//! `Hybrid` runs both searches and fuses them with RRF. Items the user
//! already interacted with and their own posts are never recommended.
//! Candidates the profile scores at or below zero are dropped. Users without
//! usable history (none, or down-votes only) get the popularity fallback, if
//! configured.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use agora_core::{Error, Result};
use agora_vector::{
    Filter, PointId, QueryVector, ScoredPoint, ScrollRequest, SearchRequest, SparseVector,
    VectorStore, cosine_similarity, weighted_sum,
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{RecommendConfig, RecommendFallback};
use crate::entity::EntityKind;
use crate::fusion::reciprocal_rank_fusion;
use crate::payload::{AUTHOR_ID_KEY, Payload};
use crate::search::{MatchType, SearchHit, assign_ranks, typed_hit};
use crate::source::{ContentSource, Interaction};

/// Candidates fetched per requested result before filtering.
const CANDIDATE_MULTIPLIER: usize = 4;

/// Which profile drives recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendAlgorithm {
    /// Sparse interaction profile.
    Collaborative,
    /// Dense interest vector.
    Content,
    /// Both, fused with RRF.
    #[default]
    Hybrid,
}

impl fmt::Display for RecommendAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Collaborative => "collaborative",
            Self::Content => "content",
            Self::Hybrid => "hybrid",
        })
    }
}

impl FromStr for RecommendAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "collaborative" => Ok(Self::Collaborative),
            "content" => Ok(Self::Content),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(Error::bad_request(format!(
                "unknown recommendation algorithm '{other}'"
            ))),
        }
    }
}

/// Options for [`Recommender::recommend`].
#[derive(Debug, Clone)]
pub struct RecommendOptions {
    /// Results returned.
    pub limit: usize,
    /// Profile used.
    pub algorithm: RecommendAlgorithm,
    /// Pairwise similarity at or above which a candidate is a near-duplicate.
    /// `None` uses the configured default.
    pub diversity_threshold: Option<f32>,
    /// Apply diversity filtering.
    pub enable_diversity_filtering: bool,
    /// Kind of content recommended.
    pub kind: EntityKind,
}

impl Default for RecommendOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            algorithm: RecommendAlgorithm::default(),
            diversity_threshold: None,
            enable_diversity_filtering: true,
            kind: EntityKind::Post,
        }
    }
}

impl RecommendOptions {
    /// Defaults with the given limit.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Set the algorithm.
    pub fn with_algorithm(mut self, algorithm: RecommendAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the diversity threshold.
    pub fn with_diversity_threshold(mut self, threshold: f32) -> Self {
        self.diversity_threshold = Some(threshold);
        self
    }

    /// Turn diversity filtering off.
    pub fn without_diversity(mut self) -> Self {
        self.enable_diversity_filtering = false;
        self
    }
}

/// A user's interest profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProfile {
    /// The user, whose own content is excluded.
    pub user_id: Option<i64>,
    /// Collaborative profile.
    pub sparse: SparseVector,
    /// Content profile.
    pub dense: Option<Vec<f32>>,
    /// Points never recommended (already seen).
    pub exclude: Vec<PointId>,
}

impl UserProfile {
    /// Whether the profile carries any signal.
    pub fn is_empty(&self) -> bool {
        self.sparse.is_empty() && self.dense.is_none()
    }
}

/// Greedy diversity filter.
///
/// Walks `candidates` in order and accepts one only if its cosine
/// similarity to every accepted item is below `threshold`. Items without a
/// vector are accepted. Stops at `limit`.
pub fn diversify<T, V, F>(candidates: Vec<T>, vector: F, threshold: f32, limit: usize) -> Vec<T>
where
    V: AsRef<[f32]>,
    F: Fn(&T) -> Option<V>,
{
    let mut accepted: Vec<T> = Vec::with_capacity(limit);
    let mut accepted_vectors: Vec<V> = Vec::with_capacity(limit);
    for candidate in candidates {
        if accepted.len() >= limit {
            break;
        }
        let v = vector(&candidate);
        let near_duplicate = v.as_ref().is_some_and(|v| {
            accepted_vectors
                .iter()
                .any(|other| cosine_similarity(v.as_ref(), other.as_ref()) >= threshold)
        });
        if !near_duplicate {
            accepted_vectors.extend(v);
            accepted.push(candidate);
        }
    }
    accepted
}

struct Candidate {
    hit: SearchHit,
    dense: Option<Vec<f32>>,
}

/// Builds profiles and retrieves recommendations.
pub struct Recommender {
    store: Arc<dyn VectorStore>,
    source: Arc<dyn ContentSource>,
    settings: RecommendConfig,
    rrf_k: usize,
}

impl Recommender {
    /// Create a recommender.
    pub fn new(
        store: Arc<dyn VectorStore>,
        source: Arc<dyn ContentSource>,
        settings: RecommendConfig,
        rrf_k: usize,
    ) -> Self {
        Self {
            store,
            source,
            settings,
            rrf_k,
        }
    }

    /// Weight of one interaction at `now`.
    pub fn interaction_weight(&self, interaction: &Interaction, now: DateTime<Utc>) -> f32 {
        let age_days = ((now - interaction.occurred_at).num_seconds().max(0) as f64) / 86_400.0;
        let decay = 0.5_f64.powf(age_days / self.settings.half_life_days);
        self.settings.weights.weight(interaction.kind) * decay as f32
    }

    /// Build a profile from a user's interaction history.
    pub async fn build_profile(&self, user_id: i64, now: DateTime<Utc>) -> Result<UserProfile> {
        let history = self.source.user_interactions(user_id).await?;

        let mut weights: HashMap<PointId, f32> = HashMap::new();
        let mut by_collection: HashMap<&'static str, Vec<PointId>> = HashMap::new();
        for interaction in history.iter().take(self.settings.profile_depth) {
            let id = interaction.target.point_id();
            let weight = self.interaction_weight(interaction, now);
            if !weights.contains_key(&id) {
                by_collection
                    .entry(interaction.target.kind.collection())
                    .or_default()
                    .push(id);
            }
            *weights.entry(id).or_insert(0.0) += weight;
        }

        let mut exclude: Vec<PointId> = history.iter().map(|i| i.target.point_id()).collect();
        exclude.sort();
        exclude.dedup();

        let mut profile = UserProfile {
            user_id: Some(user_id),
            exclude,
            ..UserProfile::default()
        };
        // Down-votes alone say what to avoid, not what to recommend.
        if !weights.values().any(|w| *w > 0.0) {
            debug!("User {user_id} has no positive interaction signal");
            return Ok(profile);
        }

        let mut points = Vec::new();
        for (collection, ids) in &by_collection {
            points.extend(self.store.retrieve(collection, ids, true).await?);
        }

        let sparse_parts: Vec<(&SparseVector, f32)> = points
            .iter()
            .filter_map(|p| {
                let weight = weights.get(&p.id).copied()?;
                let sparse = p.vectors.as_ref()?.sparse.as_ref()?;
                Some((sparse, weight))
            })
            .collect();
        profile.sparse = weighted_sum(sparse_parts);

        let mut dense_sum: Option<Vec<f32>> = None;
        let mut total = 0.0_f32;
        for point in &points {
            let weight = weights.get(&point.id).copied().unwrap_or(0.0);
            let Some(dense) = point.vectors.as_ref().and_then(|v| v.dense.as_ref()) else {
                continue;
            };
            if weight <= 0.0 {
                continue;
            }
            let sum = dense_sum.get_or_insert_with(|| vec![0.0; dense.len()]);
            if sum.len() != dense.len() {
                continue;
            }
            for (s, x) in sum.iter_mut().zip(dense) {
                *s += weight * x;
            }
            total += weight;
        }
        profile.dense = dense_sum
            .filter(|_| total > 0.0)
            .map(|sum| sum.into_iter().map(|s| s / total).collect());

        debug!(
            "Profile for user {user_id}: {} interactions, {} sparse terms, dense={}",
            weights.len(),
            profile.sparse.len(),
            profile.dense.is_some()
        );
        Ok(profile)
    }

    /// Recommendations for a user.
    ///
    /// Fails with `ProfileUnavailable` when the user has no usable history
    /// and the popularity fallback is disabled.
    pub async fn recommend(&self, user_id: i64, opts: &RecommendOptions) -> Result<Vec<SearchHit>> {
        self.require_ready().await?;
        self.validate(opts)?;

        let profile = self.build_profile(user_id, Utc::now()).await?;
        if !profile.is_empty() {
            let hits = self.personalised(&profile, opts).await?;
            if !hits.is_empty() {
                return Ok(hits);
            }
        }

        match self.settings.fallback {
            RecommendFallback::Popular => {
                info!("No usable profile for user {user_id}, recommending popular content");
                self.popular(&profile, opts).await
            }
            RecommendFallback::None => Err(Error::profile_unavailable(format!(
                "user {user_id} has no interaction signal"
            ))),
        }
    }

    /// Recommendations for a caller-supplied profile.
    pub async fn recommend_for_profile(
        &self,
        profile: &UserProfile,
        opts: &RecommendOptions,
    ) -> Result<Vec<SearchHit>> {
        self.require_ready().await?;
        self.validate(opts)?;
        if profile.is_empty() {
            return Err(Error::profile_unavailable("profile carries no signal"));
        }
        self.personalised(profile, opts).await
    }

    async fn require_ready(&self) -> Result<()> {
        if self.store.is_ready().await {
            Ok(())
        } else {
            Err(Error::store_unavailable(format!(
                "{} store is not ready",
                self.store.name()
            )))
        }
    }

    fn validate(&self, opts: &RecommendOptions) -> Result<()> {
        if opts.limit == 0 {
            return Err(Error::bad_request("limit must be positive"));
        }
        if let Some(t) = opts.diversity_threshold
            && !(0.0..=1.0).contains(&t)
        {
            return Err(Error::bad_request(format!(
                "diversity threshold {t} outside [0, 1]"
            )));
        }
        Ok(())
    }

    fn exclusion_filter(profile: &UserProfile) -> Option<Filter> {
        let mut filter = Filter::new();
        if !profile.exclude.is_empty() {
            filter = filter.exclude_ids(profile.exclude.clone());
        }
        if let Some(user_id) = profile.user_id {
            filter = filter.must_not_equal(AUTHOR_ID_KEY, user_id);
        }
        (!filter.is_empty()).then_some(filter)
    }

    async fn personalised(
        &self,
        profile: &UserProfile,
        opts: &RecommendOptions,
    ) -> Result<Vec<SearchHit>> {
        let collection = opts.kind.collection();
        let fetch = opts.limit.saturating_mul(CANDIDATE_MULTIPLIER);
        let filter = Self::exclusion_filter(profile);

        let sparse_list = match opts.algorithm {
            RecommendAlgorithm::Collaborative | RecommendAlgorithm::Hybrid
                if !profile.sparse.is_empty() =>
            {
                let request = SearchRequest::new(QueryVector::Sparse(profile.sparse.clone()), fetch)
                    .with_filter(filter.clone())
                    .with_vectors();
                self.store.search(collection, request).await?
            }
            _ => Vec::new(),
        };
        let dense_list = match (&opts.algorithm, &profile.dense) {
            (RecommendAlgorithm::Content | RecommendAlgorithm::Hybrid, Some(dense)) => {
                let request = SearchRequest::new(QueryVector::Dense(dense.clone()), fetch)
                    .with_filter(filter)
                    .with_vectors();
                self.store.search(collection, request).await?
            }
            _ => Vec::new(),
        };

        let (sparse_list, dense_list) = (positive(sparse_list), positive(dense_list));
        let candidates = self.merge(sparse_list, dense_list, opts.algorithm);
        let threshold = opts
            .diversity_threshold
            .unwrap_or(self.settings.diversity_threshold);

        let selected = if opts.enable_diversity_filtering {
            diversify(candidates, |c| c.dense.clone(), threshold, opts.limit)
        } else {
            candidates.into_iter().take(opts.limit).collect()
        };

        let mut hits: Vec<SearchHit> = selected.into_iter().map(|c| c.hit).collect();
        assign_ranks(&mut hits);
        Ok(hits)
    }

    fn merge(
        &self,
        sparse_list: Vec<ScoredPoint>,
        dense_list: Vec<ScoredPoint>,
        algorithm: RecommendAlgorithm,
    ) -> Vec<Candidate> {
        let candidate = |p: &ScoredPoint, score: f64, match_type: MatchType| {
            typed_hit(p.id, &p.payload, score, match_type).map(|hit| Candidate {
                hit,
                dense: p.vectors.as_ref().and_then(|v| v.dense.clone()),
            })
        };

        if algorithm != RecommendAlgorithm::Hybrid {
            let (list, match_type) = if dense_list.is_empty() {
                (sparse_list, MatchType::Sparse)
            } else {
                (dense_list, MatchType::Dense)
            };
            return list
                .iter()
                .filter_map(|p| candidate(p, f64::from(p.score), match_type))
                .collect();
        }

        let lists: Vec<Vec<(PointId, f32)>> = [&sparse_list, &dense_list]
            .iter()
            .map(|l| l.iter().map(|p| (p.id, p.score)).collect())
            .collect();
        let points: HashMap<PointId, &ScoredPoint> = sparse_list
            .iter()
            .chain(dense_list.iter())
            .map(|p| (p.id, p))
            .collect();

        reciprocal_rank_fusion(&lists, self.rrf_k)
            .into_iter()
            .filter_map(|fused| {
                let match_type = match fused.sources.as_slice() {
                    [0] => MatchType::Sparse,
                    [1] => MatchType::Dense,
                    _ => MatchType::Hybrid,
                };
                points
                    .get(&fused.id)
                    .and_then(|p| candidate(p, fused.score, match_type))
            })
            .collect()
    }

    /// Most-engaged content, newest first among equals.
    async fn popular(&self, profile: &UserProfile, opts: &RecommendOptions) -> Result<Vec<SearchHit>> {
        let collection = opts.kind.collection();
        let filter = Self::exclusion_filter(profile);
        let scan = self.settings.popular_scan.max(opts.limit);

        let mut payloads: Vec<(PointId, Payload)> = Vec::new();
        let mut offset = None;
        let mut seen = HashSet::new();
        while payloads.len() < scan {
            let page = self
                .store
                .scroll(
                    collection,
                    ScrollRequest {
                        limit: scan - payloads.len(),
                        offset,
                        filter: filter.clone(),
                        with_vectors: false,
                    },
                )
                .await?;
            for point in page.points {
                if seen.insert(point.id)
                    && let Ok(payload) = Payload::from_map(&point.payload)
                {
                    payloads.push((point.id, payload));
                }
            }
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        payloads.sort_by(|(a_id, a), (b_id, b)| {
            b.engagement()
                .cmp(&a.engagement())
                .then_with(|| created_at(b).cmp(&created_at(a)))
                .then_with(|| a_id.cmp(b_id))
        });

        let mut hits: Vec<SearchHit> = payloads
            .into_iter()
            .take(opts.limit)
            .map(|(point_id, payload)| SearchHit {
                point_id,
                entity: payload.entity_ref(),
                score: payload.engagement() as f64,
                rank: 0,
                payload,
                match_type: MatchType::Popular,
            })
            .collect();
        assign_ranks(&mut hits);
        Ok(hits)
    }
}

/// Drop candidates the profile scores against.
fn positive(mut list: Vec<ScoredPoint>) -> Vec<ScoredPoint> {
    list.retain(|p| p.score > 0.0);
    list
}

fn created_at(payload: &Payload) -> Option<DateTime<Utc>> {
    match payload {
        Payload::Post(p) => Some(p.created_at),
        Payload::Comment(c) => Some(c.created_at),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entity::tests::post;
    use crate::entity::{Entity, EntityRef, UserSummary};
    use crate::search::tests::indexed_store;
    use crate::source::{InteractionKind, MemoryContentSource};
    use agora_vector::MemoryVectorStore;
    use chrono::Duration;

    fn by(author: i64, mut p: crate::entity::Post) -> Entity {
        p.author = UserSummary {
            id: author,
            username: format!("user{author}"),
        };
        Entity::Post(p)
    }

    fn corpus() -> Vec<Entity> {
        let mut popular = post(5, "Bread baking", "Crusty sourdough loaves with a dark bake.");
        popular.vote_score = 50;
        vec![
            by(7, post(1, "Quantum basics", "Qubits, superposition and entanglement.")),
            by(8, post(2, "Quantum entanglement", "Entanglement links qubits across distance.")),
            by(8, post(3, "Garden tomatoes", "Tomatoes need sun and deep watering.")),
            by(9, post(4, "Quantum entanglement", "Entanglement links qubits across distance.")),
            by(8, popular),
        ]
    }

    async fn fixture(fallback: RecommendFallback) -> (Recommender, Arc<MemoryContentSource>, Arc<MemoryVectorStore>) {
        let store = indexed_store(&corpus()).await;
        let source = Arc::new(MemoryContentSource::new());
        let settings = RecommendConfig {
            fallback,
            ..RecommendConfig::default()
        };
        let recommender = Recommender::new(store.clone(), source.clone(), settings, 60);
        (recommender, source, store)
    }

    async fn interact(source: &MemoryContentSource, user: i64, post_id: i64, kind: InteractionKind, days_ago: i64) {
        source
            .record(
                user,
                Interaction {
                    target: EntityRef::post(post_id),
                    kind,
                    occurred_at: Utc::now() - Duration::days(days_ago),
                },
            )
            .await;
    }

    #[test]
    fn test_diversify_never_keeps_near_duplicates() {
        let vectors: HashMap<u32, Vec<f32>> = [
            (1, vec![1.0, 0.0, 0.0]),
            (2, vec![0.0, 1.0, 0.0]),
            (3, vec![0.0, 0.99, 0.1]),
        ]
        .into_iter()
        .collect();

        for order in [[1, 2, 3], [2, 3, 1], [3, 2, 1], [2, 1, 3], [3, 1, 2]] {
            let picked = diversify(order.to_vec(), |id| vectors.get(id).map(Vec::as_slice), 0.9, 2);
            let mut sorted = picked.clone();
            sorted.sort();
            assert!(sorted == vec![1, 2] || sorted == vec![1, 3], "{order:?} -> {picked:?}");
        }
    }

    #[test]
    fn test_diversify_accepts_items_without_vectors() {
        let picked = diversify(vec![1, 2, 3], |_: &i32| None::<Vec<f32>>, 0.5, 2);
        assert_eq!(picked, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_interaction_weight_decays() {
        let (recommender, _, _) = fixture(RecommendFallback::Popular).await;
        let now = Utc::now();
        let fresh = Interaction {
            target: EntityRef::post(1),
            kind: InteractionKind::Bookmark,
            occurred_at: now,
        };
        let old = Interaction {
            occurred_at: now - Duration::days(30),
            ..fresh.clone()
        };
        assert!((recommender.interaction_weight(&fresh, now) - 2.0).abs() < 1e-6);
        assert!((recommender.interaction_weight(&old, now) - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_content_recommendation_excludes_seen_and_own() {
        let (recommender, source, _) = fixture(RecommendFallback::None).await;
        interact(&source, 9, 1, InteractionKind::Bookmark, 1).await;

        let opts = RecommendOptions::new(3).without_diversity();
        for algorithm in [
            RecommendAlgorithm::Collaborative,
            RecommendAlgorithm::Content,
            RecommendAlgorithm::Hybrid,
        ] {
            let hits = recommender
                .recommend(9, &opts.clone().with_algorithm(algorithm))
                .await
                .unwrap();
            assert_eq!(hits[0].entity, EntityRef::post(2), "{algorithm}");
            assert!(hits.iter().all(|h| h.entity != EntityRef::post(1)));
            // Post 4 is the user's own.
            assert!(hits.iter().all(|h| h.entity != EntityRef::post(4)));
        }
    }

    #[tokio::test]
    async fn test_diversity_filter_drops_near_duplicate() {
        let (recommender, source, _) = fixture(RecommendFallback::None).await;
        // User 10 authored nothing, so posts 2 and 4 (identical bodies) are both eligible.
        interact(&source, 10, 1, InteractionKind::Upvote, 0).await;

        let plain = recommender
            .recommend(10, &RecommendOptions::new(2).without_diversity().with_algorithm(RecommendAlgorithm::Content))
            .await
            .unwrap();
        let plain_ids: HashSet<EntityRef> = plain.iter().map(|h| h.entity).collect();
        assert_eq!(plain_ids, [EntityRef::post(2), EntityRef::post(4)].into_iter().collect());

        let diverse = recommender
            .recommend(
                10,
                &RecommendOptions::new(2)
                    .with_algorithm(RecommendAlgorithm::Content)
                    .with_diversity_threshold(0.9),
            )
            .await
            .unwrap();
        let diverse_ids: HashSet<EntityRef> = diverse.iter().map(|h| h.entity).collect();
        assert_eq!(diverse.len(), 2);
        assert_ne!(diverse_ids, plain_ids);
    }

    #[tokio::test]
    async fn test_no_history_falls_back_to_popular() {
        let (recommender, _, _) = fixture(RecommendFallback::Popular).await;
        let hits = recommender.recommend(42, &RecommendOptions::new(2)).await.unwrap();
        assert_eq!(hits[0].entity, EntityRef::post(5));
        assert_eq!(hits[0].match_type, MatchType::Popular);
        assert_eq!(hits[0].rank, 1);
    }

    #[tokio::test]
    async fn test_downvotes_only_fall_back_to_popular() {
        let (recommender, source, _) = fixture(RecommendFallback::Popular).await;
        interact(&source, 10, 1, InteractionKind::Downvote, 0).await;

        let profile = recommender.build_profile(10, Utc::now()).await.unwrap();
        assert!(profile.is_empty());
        assert_eq!(profile.exclude, vec![EntityRef::post(1).point_id()]);

        let hits = recommender
            .recommend(10, &RecommendOptions::new(3).with_algorithm(RecommendAlgorithm::Collaborative))
            .await
            .unwrap();
        assert_eq!(hits[0].entity, EntityRef::post(5));
        assert!(hits.iter().all(|h| h.match_type == MatchType::Popular));
        assert!(hits.iter().all(|h| h.entity != EntityRef::post(1)));
    }

    #[tokio::test]
    async fn test_negative_profile_scores_are_dropped() {
        let (recommender, _, _) = fixture(RecommendFallback::None).await;
        let profile = UserProfile {
            sparse: agora_vector::sparsify([("term:entanglement", -1.0)]),
            ..UserProfile::default()
        };
        let hits = recommender
            .recommend_for_profile(
                &profile,
                &RecommendOptions::new(5).with_algorithm(RecommendAlgorithm::Collaborative),
            )
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_no_history_without_fallback_is_profile_unavailable() {
        let (recommender, _, _) = fixture(RecommendFallback::None).await;
        let err = recommender.recommend(42, &RecommendOptions::new(2)).await.unwrap_err();
        assert!(matches!(err, Error::ProfileUnavailable(_)));
    }

    #[tokio::test]
    async fn test_supplied_profile() {
        let (recommender, _, _) = fixture(RecommendFallback::None).await;
        let profile = UserProfile {
            sparse: agora_vector::sparsify([("term:tomatoes", 1.0)]),
            ..UserProfile::default()
        };
        let hits = recommender
            .recommend_for_profile(
                &profile,
                &RecommendOptions::new(1).with_algorithm(RecommendAlgorithm::Collaborative),
            )
            .await
            .unwrap();
        assert_eq!(hits[0].entity, EntityRef::post(3));

        let err = recommender
            .recommend_for_profile(&UserProfile::default(), &RecommendOptions::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProfileUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unready_store() {
        let (recommender, _, store) = fixture(RecommendFallback::Popular).await;
        store.set_available(false);
        let err = recommender.recommend(1, &RecommendOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("Content".parse::<RecommendAlgorithm>().unwrap(), RecommendAlgorithm::Content);
        assert!("random".parse::<RecommendAlgorithm>().is_err());
    }
}
