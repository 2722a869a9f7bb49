//! In-memory vector store.
//!
//! Exact (brute-force) search over points held in process memory. Used by
//! tests, by the CLI's `memory` backend and as a fallback for small
//! deployments. An availability switch simulates store outages so
//! degraded-mode behaviour can be exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use agora_core::{Error, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedding::cosine_similarity;
use crate::store::{VectorStore, check_dimension};
use crate::types::{
    CollectionSpec, Distance, PayloadMap, Point, PointId, QueryVector, ScoredPoint, ScrollPage,
    ScrollRequest, SearchRequest, StoredPoint,
};

#[derive(Debug)]
struct MemoryCollection {
    spec: CollectionSpec,
    points: BTreeMap<PointId, Point>,
}

/// Brute-force in-memory [`VectorStore`].
#[derive(Debug)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    available: AtomicBool,
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVectorStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of points in a collection (0 if it doesn't exist).
    pub async fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::store_unavailable("memory store is offline"))
        }
    }

    fn validate_point(spec: &CollectionSpec, point: &Point) -> Result<()> {
        if let Some(dense) = &point.vectors.dense {
            let declared = spec.dense.ok_or_else(|| {
                Error::bad_request(format!("collection '{}' has no dense vector", spec.name))
            })?;
            check_dimension(&spec.name, declared.size, dense.len())?;
        }
        if let Some(sparse) = &point.vectors.sparse {
            if !spec.sparse {
                return Err(Error::bad_request(format!(
                    "collection '{}' has no sparse vector",
                    spec.name
                )));
            }
            if !sparse.is_well_formed() {
                return Err(Error::bad_request("sparse indices must be strictly ascending"));
            }
        }
        Ok(())
    }
}

fn missing_collection(name: &str) -> Error {
    Error::bad_request(format!("collection '{name}' not found"))
}

fn dense_score(distance: Distance, query: &[f32], stored: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => cosine_similarity(query, stored),
        Distance::Dot => query.iter().zip(stored).map(|(a, b)| a * b).sum(),
        Distance::Euclid => -query
            .iter()
            .zip(stored)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt(),
    }
}

fn to_stored(point: &Point, with_vectors: bool) -> StoredPoint {
    StoredPoint {
        id: point.id,
        payload: point.payload.clone(),
        vectors: with_vectors.then(|| point.vectors.clone()),
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn is_ready(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn ensure_collections(&self, specs: &[CollectionSpec]) -> Result<()> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        for spec in specs {
            collections
                .entry(spec.name.clone())
                .or_insert_with(|| MemoryCollection {
                    spec: spec.clone(),
                    points: BTreeMap::new(),
                });
        }
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.check_available()?;
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing_collection(collection))?;

        // Validate the whole batch before writing any of it.
        for point in &points {
            Self::validate_point(&target.spec, point)?;
        }
        for point in points {
            target.points.insert(point.id, point);
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[PointId]) -> Result<()> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing_collection(collection))?;
        for id in ids {
            target.points.remove(id);
        }
        Ok(())
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: PointId,
        payload: PayloadMap,
    ) -> Result<()> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing_collection(collection))?;
        let point = target
            .points
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("point {id} in '{collection}'")))?;
        for (key, value) in payload {
            point.payload.insert(key, value);
        }
        Ok(())
    }

    async fn retrieve(
        &self,
        collection: &str,
        ids: &[PointId],
        with_vectors: bool,
    ) -> Result<Vec<StoredPoint>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| missing_collection(collection))?;
        Ok(ids
            .iter()
            .filter_map(|id| target.points.get(id))
            .map(|p| to_stored(p, with_vectors))
            .collect())
    }

    async fn search(&self, collection: &str, request: SearchRequest) -> Result<Vec<ScoredPoint>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| missing_collection(collection))?;

        let mut hits: Vec<ScoredPoint> = Vec::new();
        match &request.vector {
            QueryVector::Dense(query) => {
                let declared = target.spec.dense.ok_or_else(|| {
                    Error::bad_request(format!("collection '{collection}' has no dense vector"))
                })?;
                check_dimension(collection, declared.size, query.len())?;
                for point in target.points.values() {
                    let Some(stored) = &point.vectors.dense else {
                        continue;
                    };
                    if request
                        .filter
                        .as_ref()
                        .is_some_and(|f| !f.matches(&point.id, &point.payload))
                    {
                        continue;
                    }
                    hits.push(ScoredPoint {
                        id: point.id,
                        score: dense_score(declared.distance, query, stored),
                        payload: point.payload.clone(),
                        vectors: request.with_vectors.then(|| point.vectors.clone()),
                    });
                }
            }
            QueryVector::Sparse(query) => {
                if !target.spec.sparse {
                    return Err(Error::bad_request(format!(
                        "collection '{collection}' has no sparse vector"
                    )));
                }
                for point in target.points.values() {
                    let Some(stored) = &point.vectors.sparse else {
                        continue;
                    };
                    if request
                        .filter
                        .as_ref()
                        .is_some_and(|f| !f.matches(&point.id, &point.payload))
                    {
                        continue;
                    }
                    let score = query.dot(stored);
                    // Sparse search only returns points that share at least one index.
                    if score == 0.0 {
                        continue;
                    }
                    hits.push(ScoredPoint {
                        id: point.id,
                        score,
                        payload: point.payload.clone(),
                        vectors: request.with_vectors.then(|| point.vectors.clone()),
                    });
                }
            }
        }

        if let Some(threshold) = request.score_threshold {
            hits.retain(|h| h.score >= threshold);
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(request.limit);
        Ok(hits)
    }

    async fn scroll(&self, collection: &str, request: ScrollRequest) -> Result<ScrollPage> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| missing_collection(collection))?;

        let start = request.offset.map(std::ops::Bound::Included);
        let range = target
            .points
            .range((start.unwrap_or(std::ops::Bound::Unbounded), std::ops::Bound::Unbounded));

        let mut points = Vec::new();
        let mut next_offset = None;
        for (id, point) in range {
            if request
                .filter
                .as_ref()
                .is_some_and(|f| !f.matches(id, &point.payload))
            {
                continue;
            }
            if points.len() == request.limit {
                next_offset = Some(*id);
                break;
            }
            points.push(to_stored(point, request.with_vectors));
        }
        Ok(ScrollPage {
            points,
            next_offset,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// Tests
// ============================================================================
