//! Vector store gateway trait.
//!
//! A thin typed wrapper over the external vector database. Every method
//! may fail at any time (network, store restart); implementations surface
//! [`Error::StoreUnavailable`] for those and [`Error::BadRequest`] for
//! caller mistakes such as a dimension mismatch, and never retry silently.
//! Retrying is the caller's policy.
//!
//! # Implementations
//!
//! - [`MemoryVectorStore`](crate::memory::MemoryVectorStore): exact in-process search
//! - [`QdrantStore`](crate::qdrant::QdrantStore): Qdrant REST API

use agora_core::{Error, Result};
use async_trait::async_trait;

use crate::types::{
    CollectionSpec, PayloadMap, Point, PointId, ScoredPoint, ScrollPage, ScrollRequest,
    SearchRequest, StoredPoint,
};

/// Trait for vector database gateways.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Single liveness probe. `false` means every other call should be
    /// treated as degraded without being attempted.
    async fn is_ready(&self) -> bool;

    /// Create any missing collections. Existing collections are left alone.
    async fn ensure_collections(&self, specs: &[CollectionSpec]) -> Result<()>;

    /// Drop a collection and everything in it. Missing collections are ignored.
    async fn drop_collection(&self, name: &str) -> Result<()>;

    /// Insert or overwrite points by id.
    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()>;

    /// Delete points by id. Missing ids are ignored.
    async fn delete(&self, collection: &str, ids: &[PointId]) -> Result<()>;

    /// Merge `payload` keys into an existing point's payload.
    ///
    /// Fails with [`Error::NotFound`] when the point does not exist.
    async fn set_payload(&self, collection: &str, id: PointId, payload: PayloadMap)
        -> Result<()>;

    /// Fetch points by id. Missing ids are skipped.
    async fn retrieve(
        &self,
        collection: &str,
        ids: &[PointId],
        with_vectors: bool,
    ) -> Result<Vec<StoredPoint>>;

    /// Ranked vector search, best first.
    async fn search(&self, collection: &str, request: SearchRequest) -> Result<Vec<ScoredPoint>>;

    /// Unordered page of points.
    async fn scroll(&self, collection: &str, request: ScrollRequest) -> Result<ScrollPage>;

    /// Backend name for diagnostics.
    fn name(&self) -> &str;

    /// Drop and recreate every collection from its spec.
    ///
    /// Destructive. Callers must make sure no indexing runs concurrently.
    async fn force_reset(&self, specs: &[CollectionSpec]) -> Result<()> {
        for spec in specs {
            self.drop_collection(&spec.name).await?;
        }
        self.ensure_collections(specs).await
    }
}

/// Check a dense vector against a collection's declared dimension.
pub fn check_dimension(collection: &str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::bad_request(format!(
            "dimension mismatch for collection '{collection}': expected {expected}, got {actual}"
        )))
    }
}
