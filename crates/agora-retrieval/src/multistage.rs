//! Two-phase retrieval: cheap candidate generation, then precise rescoring.
//!
//! Stage one pulls `candidate_limit` points per collection from a cheap
//! index (sparse by default). Stage two scores only those candidates with a
//! more precise representation and keeps the top `limit`. The cost of stage
//! two is bounded by `candidate_limit`; choosing it large enough for good
//! recall is the caller's call.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use agora_core::{Error, Result};
use agora_vector::{EmbedPurpose, Filter, QueryVector, ScoredPoint, SearchRequest, cosine_similarity};
use futures::future::try_join_all;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::payload::Payload;
use crate::search::{MatchType, SearchEngine, SearchHit, SearchScope, assign_ranks};

/// Which index produces stage-one candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    /// Sparse term overlap. Falls back to dense for queries with no terms.
    #[default]
    Sparse,
    /// Dense nearest neighbours.
    Dense,
}

/// How stage two scores candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rescore {
    /// Exact cosine against the candidates' stored dense vectors.
    #[default]
    StoredVectors,
    /// Re-embed the candidates' payload text with the rescoring provider.
    ReEmbed,
}

impl fmt::Display for Rescore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StoredVectors => "stored_vectors",
            Self::ReEmbed => "re_embed",
        })
    }
}

impl FromStr for Rescore {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "stored_vectors" | "stored" => Ok(Self::StoredVectors),
            "re_embed" | "reembed" => Ok(Self::ReEmbed),
            other => Err(Error::bad_request(format!(
                "unknown rescore model '{other}' (expected stored_vectors or re_embed)"
            ))),
        }
    }
}

/// Options for [`SearchEngine::multi_stage_search`].
#[derive(Debug, Clone)]
pub struct MultiStageOptions {
    /// Results returned.
    pub limit: usize,
    /// Stage-one candidates per collection. Must be at least `limit`.
    pub candidate_limit: usize,
    /// Collections searched.
    pub scope: SearchScope,
    /// Payload filter applied in stage one.
    pub filter: Option<Filter>,
    /// Stage-one index.
    pub candidate_source: CandidateSource,
    /// Stage-two scoring.
    pub rescore: Rescore,
    /// Overall time budget.
    pub deadline: Option<Duration>,
}

impl MultiStageOptions {
    /// Defaults with the given limits.
    pub fn new(limit: usize, candidate_limit: usize) -> Self {
        Self {
            limit,
            candidate_limit,
            scope: SearchScope::default(),
            filter: None,
            candidate_source: CandidateSource::default(),
            rescore: Rescore::default(),
            deadline: None,
        }
    }

    /// Set the collections searched.
    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the payload filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the stage-one index.
    pub fn with_candidate_source(mut self, source: CandidateSource) -> Self {
        self.candidate_source = source;
        self
    }

    /// Set the stage-two scoring.
    pub fn with_rescore(mut self, rescore: Rescore) -> Self {
        self.rescore = rescore;
        self
    }

    /// Set the overall time budget.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

struct Candidate {
    point: ScoredPoint,
    payload: Payload,
}

impl SearchEngine {
    /// Candidate generation followed by rescoring of the candidates only.
    pub async fn multi_stage_search(
        &self,
        query: &str,
        opts: &MultiStageOptions,
    ) -> Result<Vec<SearchHit>> {
        self.require_ready().await?;
        if opts.limit == 0 {
            return Err(Error::bad_request("limit must be positive"));
        }
        if opts.candidate_limit < opts.limit {
            return Err(Error::bad_request(format!(
                "candidate_limit ({}) must be at least limit ({})",
                opts.candidate_limit, opts.limit
            )));
        }
        if query.trim().is_empty() {
            return Err(Error::bad_request("empty query"));
        }

        Self::within(opts.deadline, "multi-stage search", self.run_multi_stage(query, opts)).await
    }

    async fn run_multi_stage(&self, query: &str, opts: &MultiStageOptions) -> Result<Vec<SearchHit>> {
        let sparse = match opts.candidate_source {
            CandidateSource::Sparse if opts.scope.supports_sparse() => Self::sparse_query(query),
            _ => None,
        };

        let (stage_one, match_type) = match sparse {
            Some(vector) => (QueryVector::Sparse(vector), MatchType::Hybrid),
            None => {
                if opts.candidate_source == CandidateSource::Sparse {
                    debug!("Query '{query}' has no sparse terms, using dense candidates");
                }
                let dense = self
                    .query_embedder(&opts.scope)?
                    .embed(query, EmbedPurpose::Query)
                    .await?;
                (QueryVector::Dense(dense), MatchType::Dense)
            }
        };

        let candidates = self.candidates(stage_one, opts).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let scores = match opts.rescore {
            Rescore::StoredVectors => {
                self.rescore_stored(query, &opts.scope, &candidates).await?
            }
            Rescore::ReEmbed => self.rescore_reembed(query, &candidates).await?,
        };

        let mut rescored: Vec<(f32, Candidate)> = scores
            .into_iter()
            .zip(candidates)
            .filter_map(|(score, candidate)| score.map(|s| (s, candidate)))
            .collect();
        // Stable: equal scores keep their stage-one order.
        rescored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut hits: Vec<SearchHit> = rescored
            .into_iter()
            .take(opts.limit)
            .map(|(score, c)| SearchHit {
                point_id: c.point.id,
                entity: c.payload.entity_ref(),
                score: f64::from(score),
                rank: 0,
                payload: c.payload,
                match_type,
            })
            .collect();
        assign_ranks(&mut hits);
        Ok(hits)
    }

    /// Stage one: candidates across the scope, best first, deduplicated.
    async fn candidates(&self, vector: QueryVector, opts: &MultiStageOptions) -> Result<Vec<Candidate>> {
        let with_vectors = opts.rescore == Rescore::StoredVectors;
        let pages = try_join_all(opts.scope.collections().into_iter().map(|collection| {
            let mut request =
                SearchRequest::new(vector.clone(), opts.candidate_limit).with_filter(opts.filter.clone());
            if with_vectors {
                request = request.with_vectors();
            }
            async move { self.store.search(collection, request).await }
        }))
        .await?;

        let mut points: Vec<ScoredPoint> = pages.into_iter().flatten().collect();
        points.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));

        let mut seen = HashSet::new();
        let candidates: Vec<Candidate> = points
            .into_iter()
            .filter(|p| seen.insert(p.id))
            .filter_map(|point| {
                Payload::from_map(&point.payload)
                    .ok()
                    .map(|payload| Candidate { point, payload })
            })
            .take(opts.candidate_limit)
            .collect();

        debug!("Stage one produced {} candidates", candidates.len());
        Ok(candidates)
    }

    /// Cosine of the query embedding against each candidate's stored vector.
    async fn rescore_stored(
        &self,
        query: &str,
        scope: &SearchScope,
        candidates: &[Candidate],
    ) -> Result<Vec<Option<f32>>> {
        let query_vector = self
            .query_embedder(scope)?
            .embed(query, EmbedPurpose::Query)
            .await?;
        Ok(candidates
            .iter()
            .map(|c| {
                c.point
                    .vectors
                    .as_ref()
                    .and_then(|v| v.dense.as_deref())
                    .map(|dense| cosine_similarity(&query_vector, dense))
            })
            .collect())
    }

    /// Re-embed candidate payload text with the rescoring provider.
    async fn rescore_reembed(&self, query: &str, candidates: &[Candidate]) -> Result<Vec<Option<f32>>> {
        let rescorer = self.rescorer.as_ref().unwrap_or(&self.embedder);
        let query_vector = rescorer.embed(query, EmbedPurpose::Query).await?;

        let texts: Vec<String> = candidates.iter().map(|c| c.payload.text()).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = rescorer.embed_batch(&refs, EmbedPurpose::Document).await?;
        if vectors.len() != candidates.len() {
            return Err(Error::provider(
                rescorer.name(),
                format!("expected {} embeddings, got {}", candidates.len(), vectors.len()),
            ));
        }

        Ok(vectors
            .iter()
            .map(|v| Some(cosine_similarity(&query_vector, v)))
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
