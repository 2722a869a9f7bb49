//! Qdrant REST gateway.
//!
//! Talks to Qdrant's HTTP API with `reqwest`. Every collection has a named
//! dense slot (`dense`) and, when declared, a named sparse slot (`sparse`).
//!
//! Error mapping:
//!
//! | Condition | Error |
//! |-----------|-------|
//! | Connection failure, 5xx | [`Error::StoreUnavailable`] |
//! | Request timeout | [`Error::Timeout`] |
//! | 400 / 422 (e.g. dimension mismatch) | [`Error::BadRequest`] |
//! | 404 on a collection | [`Error::BadRequest`] |
//! | 404 on a point | [`Error::NotFound`] |
//! | 401 / 403 | [`Error::Config`] |
//!
//! The gateway never retries.

use std::time::Duration;

use agora_core::{Error, Result};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::store::VectorStore;
use crate::types::{
    CollectionSpec, DENSE_VECTOR, PayloadMap, Point, PointId, PointVectors, QueryVector,
    SPARSE_VECTOR, ScoredPoint, ScrollPage, ScrollRequest, SearchRequest, StoredPoint,
};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Vector store backed by a Qdrant server.
pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl QdrantStore {
    /// Connect to a Qdrant server (no request is made until first use).
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: url.into().trim_end_matches('/').to_string(),
            api_key: None,
            client,
        })
    }

    /// Authenticate with an API key.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    /// Send a request and unwrap Qdrant's `{"result": ..}` envelope.
    async fn call(&self, builder: reqwest::RequestBuilder, context: &str) -> Result<Value> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(format!("qdrant {context}"))
            } else {
                Error::store_unavailable(format!("qdrant {context}: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, context));
        }

        let mut envelope: Value = response
            .json()
            .await
            .map_err(|e| Error::store_unavailable(format!("qdrant {context}: bad response: {e}")))?;
        Ok(envelope
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        match self
            .call(self.request(Method::GET, &format!("/collections/{name}")), name)
            .await
        {
            Ok(_) => Ok(true),
            Err(Error::BadRequest(msg)) if msg.starts_with("collection not found") => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_key.is_some())
            .finish()
    }
}

// ============================================================================
// Wire helpers
// ============================================================================

fn classify_status(status: StatusCode, body: &str, context: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND if body.to_lowercase().contains("no point") => {
            Error::not_found(format!("{context}: {body}"))
        }
        StatusCode::NOT_FOUND => Error::bad_request(format!("collection not found: {context}")),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            Error::bad_request(format!("{context}: {body}"))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::config(format!("qdrant rejected credentials ({status})"))
        }
        _ => Error::store_unavailable(format!("qdrant {context}: HTTP {status}: {body}")),
    }
}

fn create_collection_body(spec: &CollectionSpec) -> Value {
    let mut vectors = serde_json::Map::new();
    if let Some(dense) = spec.dense {
        vectors.insert(
            DENSE_VECTOR.into(),
            json!({ "size": dense.size, "distance": dense.distance.as_qdrant() }),
        );
    }
    let mut body = serde_json::Map::new();
    body.insert("vectors".into(), Value::Object(vectors));
    if spec.sparse {
        let mut sparse = serde_json::Map::new();
        sparse.insert(SPARSE_VECTOR.into(), json!({}));
        body.insert("sparse_vectors".into(), Value::Object(sparse));
    }
    Value::Object(body)
}

fn points_body(points: &[Point]) -> Result<Value> {
    let points = points
        .iter()
        .map(|p| {
            if p.vectors.sparse.as_ref().is_some_and(|s| !s.is_well_formed()) {
                return Err(Error::bad_request(format!(
                    "point {}: sparse indices must be strictly ascending",
                    p.id
                )));
            }
            Ok(json!({ "id": p.id, "vector": p.vectors, "payload": p.payload }))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(json!({ "points": points }))
}

fn search_body(request: &SearchRequest) -> Value {
    let vector = match &request.vector {
        QueryVector::Dense(v) => json!({ "name": DENSE_VECTOR, "vector": v }),
        QueryVector::Sparse(s) => json!({ "name": SPARSE_VECTOR, "vector": s }),
    };
    let mut body = json!({
        "vector": vector,
        "limit": request.limit,
        "with_payload": true,
        "with_vector": request.with_vectors,
    });
    if let Some(threshold) = request.score_threshold {
        body["score_threshold"] = json!(threshold);
    }
    if let Some(filter) = request.filter.as_ref().filter(|f| !f.is_empty()) {
        body["filter"] = filter.to_qdrant();
    }
    body
}

fn scroll_body(request: &ScrollRequest) -> Value {
    let mut body = json!({
        "limit": request.limit,
        "with_payload": true,
        "with_vector": request.with_vectors,
    });
    if let Some(offset) = request.offset {
        body["offset"] = json!(offset);
    }
    if let Some(filter) = request.filter.as_ref().filter(|f| !f.is_empty()) {
        body["filter"] = filter.to_qdrant();
    }
    body
}

#[derive(Debug, Deserialize)]
struct WirePoint {
    id: PointId,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    payload: Option<PayloadMap>,
    #[serde(default)]
    vector: Option<PointVectors>,
}

#[derive(Debug, Deserialize)]
struct WireScroll {
    points: Vec<WirePoint>,
    next_page_offset: Option<PointId>,
}

impl From<WirePoint> for StoredPoint {
    fn from(p: WirePoint) -> Self {
        Self {
            id: p.id,
            payload: p.payload.unwrap_or_default(),
            vectors: p.vector,
        }
    }
}

impl From<WirePoint> for ScoredPoint {
    fn from(p: WirePoint) -> Self {
        Self {
            id: p.id,
            score: p.score,
            payload: p.payload.unwrap_or_default(),
            vectors: p.vector,
        }
    }
}

// ============================================================================
// VectorStore
// ============================================================================

#[async_trait]
impl VectorStore for QdrantStore {
    async fn is_ready(&self) -> bool {
        match self.request(Method::GET, "/readyz").send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Qdrant readiness probe failed: {e}");
                false
            }
        }
    }

    async fn ensure_collections(&self, specs: &[CollectionSpec]) -> Result<()> {
        for spec in specs {
            if self.collection_exists(&spec.name).await? {
                continue;
            }
            info!("Creating Qdrant collection '{}'", spec.name);
            self.call(
                self.request(Method::PUT, &format!("/collections/{}", spec.name))
                    .json(&create_collection_body(spec)),
                &spec.name,
            )
            .await?;
        }
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        match self
            .call(self.request(Method::DELETE, &format!("/collections/{name}")), name)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::BadRequest(msg)) if msg.starts_with("collection not found") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.call(
            self.request(
                Method::PUT,
                &format!("/collections/{collection}/points?wait=true"),
            )
            .json(&points_body(&points)?),
            collection,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[PointId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.call(
            self.request(
                Method::POST,
                &format!("/collections/{collection}/points/delete?wait=true"),
            )
            .json(&json!({ "points": ids })),
            collection,
        )
        .await?;
        Ok(())
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: PointId,
        payload: PayloadMap,
    ) -> Result<()> {
        // Older servers accept payload updates for missing ids; check first.
        if self.retrieve(collection, &[id], false).await?.is_empty() {
            return Err(Error::not_found(format!("point {id} in '{collection}'")));
        }
        self.call(
            self.request(
                Method::POST,
                &format!("/collections/{collection}/points/payload?wait=true"),
            )
            .json(&json!({ "payload": payload, "points": [id] })),
            collection,
        )
        .await?;
        Ok(())
    }

    async fn retrieve(
        &self,
        collection: &str,
        ids: &[PointId],
        with_vectors: bool,
    ) -> Result<Vec<StoredPoint>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let result = self
            .call(
                self.request(Method::POST, &format!("/collections/{collection}/points"))
                    .json(&json!({ "ids": ids, "with_payload": true, "with_vector": with_vectors })),
                collection,
            )
            .await?;
        let points: Vec<WirePoint> = serde_json::from_value(result)?;
        Ok(points.into_iter().map(StoredPoint::from).collect())
    }

    async fn search(&self, collection: &str, request: SearchRequest) -> Result<Vec<ScoredPoint>> {
        if matches!(&request.vector, QueryVector::Sparse(s) if s.is_empty()) || request.limit == 0 {
            return Ok(Vec::new());
        }
        let result = self
            .call(
                self.request(
                    Method::POST,
                    &format!("/collections/{collection}/points/search"),
                )
                .json(&search_body(&request)),
                collection,
            )
            .await?;
        let points: Vec<WirePoint> = serde_json::from_value(result)?;
        Ok(points.into_iter().map(ScoredPoint::from).collect())
    }

    async fn scroll(&self, collection: &str, request: ScrollRequest) -> Result<ScrollPage> {
        let result = self
            .call(
                self.request(
                    Method::POST,
                    &format!("/collections/{collection}/points/scroll"),
                )
                .json(&scroll_body(&request)),
                collection,
            )
            .await?;
        let page: WireScroll = serde_json::from_value(result)?;
        Ok(ScrollPage {
            points: page.points.into_iter().map(StoredPoint::from).collect(),
            next_offset: page.next_page_offset,
        })
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::sparse::{SparseEncoder, SparseVector};
    use crate::types::Distance;

    #[test]
    fn test_create_collection_body() {
        let body = create_collection_body(&CollectionSpec::hybrid("posts", 384, Distance::Cosine));
        assert_eq!(body["vectors"]["dense"]["size"], 384);
        assert_eq!(body["vectors"]["dense"]["distance"], "Cosine");
        assert!(body["sparse_vectors"]["sparse"].is_object());

        let body =
            create_collection_body(&CollectionSpec::dense_only("multimodal", 512, Distance::Dot));
        assert!(body.get("sparse_vectors").is_none());
    }

    #[test]
    fn test_points_body_uses_named_vectors() {
        let point = Point {
            id: PointId::from_name("post:1"),
            vectors: PointVectors {
                dense: Some(vec![0.5, 0.5]),
                sparse: Some(SparseEncoder::vocabulary(["a"]).sparsify([("a", 1.0)])),
            },
            payload: PayloadMap::new(),
        };
        let body = points_body(&[point]).unwrap();
        let wire = &body["points"][0];
        assert_eq!(wire["vector"]["dense"][0], 0.5);
        assert_eq!(wire["vector"]["sparse"]["indices"][0], 0);
        assert_eq!(wire["vector"]["sparse"]["values"][0], 1.0);
    }

    #[test]
    fn test_points_body_rejects_unsorted_sparse() {
        let point = Point {
            id: PointId::from_name("post:1"),
            vectors: PointVectors {
                dense: None,
                sparse: Some(SparseVector {
                    indices: vec![3, 1],
                    weights: vec![1.0, 1.0],
                }),
            },
            payload: PayloadMap::new(),
        };
        assert!(matches!(points_body(&[point]), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_search_body() {
        let request = SearchRequest::new(QueryVector::Dense(vec![1.0, 0.0]), 7)
            .with_threshold(0.2)
            .with_filter(Some(Filter::new().must_equal("type", "post")));
        let body = search_body(&request);
        assert_eq!(body["vector"]["name"], "dense");
        assert_eq!(body["limit"], 7);
        assert!((body["score_threshold"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(body["filter"]["must"][0]["key"], "type");
    }

    #[test]
    fn test_scroll_body_offset() {
        let offset = PointId::from_name("post:9");
        let body = scroll_body(&ScrollRequest {
            limit: 50,
            offset: Some(offset),
            ..Default::default()
        });
        assert_eq!(body["offset"], offset.to_string());
        assert!(body.get("filter").is_none());
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "", "posts"),
            Error::StoreUnavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "Vector dimension error", "posts"),
            Error::BadRequest(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "wrong input", "posts"),
            Error::BadRequest(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "Collection `x` doesn't exist", "x"),
            Error::BadRequest(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "No point with id 1 found", "posts"),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_wire_point_parsing() {
        let id = PointId::from_name("post:1");
        let value = json!({
            "id": id,
            "version": 3,
            "score": 0.87,
            "payload": { "type": "post" },
            "vector": { "dense": [0.1, 0.2], "sparse": { "indices": [4], "values": [1.5] } }
        });
        let point: ScoredPoint = serde_json::from_value::<WirePoint>(value).unwrap().into();
        assert_eq!(point.id, id);
        assert!((point.score - 0.87).abs() < 1e-6);
        let vectors = point.vectors.unwrap();
        assert_eq!(vectors.sparse.unwrap().weights, vec![1.5]);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_not_ready() {
        let store = QdrantStore::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(!store.is_ready().await);
        let err = store
            .search("posts", SearchRequest::new(QueryVector::Dense(vec![1.0]), 1))
            .await
            .unwrap_err();
        assert!(err.is_degraded());
    }

    #[tokio::test]
    #[ignore = "requires a Qdrant server on localhost:6333"]
    async fn test_live_roundtrip() {
        let store = QdrantStore::new("http://localhost:6333", DEFAULT_TIMEOUT).unwrap();
        let spec = CollectionSpec::hybrid("agora_live_test", 2, Distance::Cosine);
        store.force_reset(std::slice::from_ref(&spec)).await.unwrap();
        let id = PointId::from_name("post:1");
        store
            .upsert(
                "agora_live_test",
                vec![Point {
                    id,
                    vectors: PointVectors {
                        dense: Some(vec![1.0, 0.0]),
                        sparse: None,
                    },
                    payload: PayloadMap::new(),
                }],
            )
            .await
            .unwrap();
        let hits = store
            .search(
                "agora_live_test",
                SearchRequest::new(QueryVector::Dense(vec![1.0, 0.0]), 1),
            )
            .await
            .unwrap();
        assert_eq!(hits[0].id, id);
        store.drop_collection("agora_live_test").await.unwrap();
    }
}
