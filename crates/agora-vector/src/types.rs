//! Common types for the vector store gateway.
//!
//! These types are shared by every [`VectorStore`](crate::store::VectorStore)
//! implementation and mirror the contract of the external vector database:
//! named collections of points, each point carrying an optional dense
//! vector, an optional sparse vector and a JSON payload.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::Filter;
use crate::sparse::SparseVector;

/// Name of the dense vector slot in every collection.
pub const DENSE_VECTOR: &str = "dense";

/// Name of the sparse vector slot in every collection.
pub const SPARSE_VECTOR: &str = "sparse";

/// Untyped payload as stored by the vector database.
pub type PayloadMap = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Identifiers
// ============================================================================

/// Point identifier.
///
/// Derived deterministically from a name (e.g. `post:42`) so re-indexing
/// the same entity overwrites instead of duplicating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointId(pub Uuid);

/// Namespace for point ids, so ids never collide with other UUIDv5 users.
const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_4c0e_9b7d_4e55_8a2c_3f41_d0b7_9e13);

impl PointId {
    /// Derive a stable id from a name.
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&POINT_NAMESPACE, name.as_bytes()))
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Collections
// ============================================================================

/// Distance metric of a dense vector slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    /// Cosine similarity (higher is closer).
    #[default]
    Cosine,
    /// Dot product (higher is closer).
    Dot,
    /// Euclidean distance (lower is closer; reported negated by the memory store).
    Euclid,
}

impl Distance {
    /// Name used by the Qdrant REST API.
    pub fn as_qdrant(&self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Dot => "Dot",
            Self::Euclid => "Euclid",
        }
    }
}

/// Dense vector configuration of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseVectorSpec {
    /// Dimensionality every dense vector must have.
    pub size: usize,
    /// Distance metric.
    pub distance: Distance,
}

/// Declared configuration of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// Collection name.
    pub name: String,

    /// Dense vector slot, if the collection has one.
    pub dense: Option<DenseVectorSpec>,

    /// Whether the collection has a sparse vector slot.
    pub sparse: bool,
}

impl CollectionSpec {
    /// A collection with a dense slot of `size` dimensions and a sparse slot.
    pub fn hybrid(name: impl Into<String>, size: usize, distance: Distance) -> Self {
        Self {
            name: name.into(),
            dense: Some(DenseVectorSpec { size, distance }),
            sparse: true,
        }
    }

    /// A collection with only a dense slot.
    pub fn dense_only(name: impl Into<String>, size: usize, distance: Distance) -> Self {
        Self {
            name: name.into(),
            dense: Some(DenseVectorSpec { size, distance }),
            sparse: false,
        }
    }
}

// ============================================================================
// Points
// ============================================================================

/// The vectors attached to a point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointVectors {
    /// Dense embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense: Option<Vec<f32>>,

    /// Sparse term/feature vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<SparseVector>,
}

/// The unit stored in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Deterministic identifier.
    pub id: PointId,

    /// Dense and/or sparse vectors.
    pub vectors: PointVectors,

    /// Denormalized fields needed to render a result.
    pub payload: PayloadMap,
}

/// A point read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPoint {
    /// Point identifier.
    pub id: PointId,

    /// Payload snapshot.
    pub payload: PayloadMap,

    /// Vectors, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectors: Option<PointVectors>,
}

// ============================================================================
// Search
// ============================================================================

/// The vector a search runs against.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVector {
    /// Search the dense slot.
    Dense(Vec<f32>),
    /// Search the sparse slot.
    Sparse(SparseVector),
}

impl QueryVector {
    /// The slot this query targets.
    pub fn slot(&self) -> &'static str {
        match self {
            Self::Dense(_) => DENSE_VECTOR,
            Self::Sparse(_) => SPARSE_VECTOR,
        }
    }
}

/// A single vector search request against one collection.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Query vector.
    pub vector: QueryVector,

    /// Maximum points to return.
    pub limit: usize,

    /// Drop points scoring below this.
    pub score_threshold: Option<f32>,

    /// Payload filter.
    pub filter: Option<Filter>,

    /// Return stored vectors alongside payloads.
    pub with_vectors: bool,
}

impl SearchRequest {
    /// Create a request with the given vector and limit.
    pub fn new(vector: QueryVector, limit: usize) -> Self {
        Self {
            vector,
            limit,
            score_threshold: None,
            filter: None,
            with_vectors: false,
        }
    }

    /// Set the score threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    /// Set the payload filter.
    pub fn with_filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }

    /// Request stored vectors in the results.
    pub fn with_vectors(mut self) -> Self {
        self.with_vectors = true;
        self
    }
}

/// A search hit with its engine-native score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    /// Point identifier.
    pub id: PointId,

    /// Native score (cosine, dot, negated distance).
    pub score: f32,

    /// Payload snapshot.
    pub payload: PayloadMap,

    /// Stored vectors, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectors: Option<PointVectors>,
}

/// Paging request for an unordered scan of a collection.
#[derive(Debug, Clone, Default)]
pub struct ScrollRequest {
    /// Page size.
    pub limit: usize,

    /// Continue after this point (from a previous page's `next_offset`).
    pub offset: Option<PointId>,

    /// Payload filter.
    pub filter: Option<Filter>,

    /// Return stored vectors.
    pub with_vectors: bool,
}

/// One page of a scroll.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    /// Points in this page.
    pub points: Vec<StoredPoint>,

    /// Offset for the next page; `None` when exhausted.
    pub next_offset: Option<PointId>,
}

/// Per-collection dimension overrides keyed by collection name.
pub type DimensionOverrides = HashMap<String, usize>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_deterministic() {
        assert_eq!(PointId::from_name("post:42"), PointId::from_name("post:42"));
        assert_ne!(PointId::from_name("post:42"), PointId::from_name("comment:42"));
    }

    #[test]
    fn test_point_id_serializes_as_uuid_string() {
        let id = PointId::from_name("post:1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.0));
    }

    #[test]
    fn test_collection_spec_constructors() {
        let spec = CollectionSpec::hybrid("posts", 384, Distance::Cosine);
        assert!(spec.sparse);
        assert_eq!(spec.dense.unwrap().size, 384);

        let spec = CollectionSpec::dense_only("multimodal", 512, Distance::Dot);
        assert!(!spec.sparse);
        assert_eq!(spec.dense.unwrap().distance, Distance::Dot);
    }

    #[test]
    fn test_point_vectors_skip_empty() {
        let json = serde_json::to_string(&PointVectors::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_search_request_builder() {
        let req = SearchRequest::new(QueryVector::Dense(vec![1.0]), 5)
            .with_threshold(0.3)
            .with_vectors();
        assert_eq!(req.limit, 5);
        assert_eq!(req.score_threshold, Some(0.3));
        assert!(req.with_vectors);
        assert_eq!(req.vector.slot(), DENSE_VECTOR);
    }
}
