//! Indexing pipeline: keeps the vector store in step with the primary store.
//!
//! Every create/update of an entity calls [`IndexingPipeline::index_entity`]
//! with the freshly loaded, joined entity; every delete calls
//! [`IndexingPipeline::delete_entity`]. Engagement changes (votes, bookmarks)
//! call [`IndexingPipeline::refresh_signals`], which patches counters in the
//! payload without re-embedding.
//!
//! When a multimodal encoder is attached, every entity is mirrored into the
//! dense-only multimodal collection as well, embedded by that encoder.
//! [`IndexingPipeline::index_multimodal`] writes a caller-supplied vector
//! (an image embedding, say) there instead.
//!
//! All operations return `Result`, but write paths should go through
//! [`IndexingPipeline::notify`] (or an [`IndexingOutbox`]), which logs and
//! discards failures. Consistency with the primary store is eventual.

use std::sync::Arc;
use std::time::Duration;

use agora_core::{Error, Result};
use agora_vector::{
    EmbedPurpose, EmbeddingProvider, Point, PointVectors, VectorStore, sparsify,
};
use backon::{ExponentialBuilder, Retryable};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{IndexingConfig, MULTIMODAL_COLLECTION};
use crate::entity::{Entity, EntityRef};
use crate::payload::{Payload, signal_fields};
use crate::source::ContentSource;

/// Default excerpt length in payloads.
pub const DEFAULT_EXCERPT_CHARS: usize = 280;

// ============================================================================
// Retry policy
// ============================================================================

/// Retry policy for store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub attempts: usize,
    /// First delay.
    pub min_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            attempts: 0,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.attempts)
    }
}

impl From<&IndexingConfig> for RetryPolicy {
    fn from(config: &IndexingConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            min_delay: Duration::from_millis(config.retry_min_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// A post-commit notification from the primary store's write path.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
    /// An entity was created or updated.
    Upserted(Entity),
    /// An entity was deleted.
    Deleted(EntityRef),
    /// An entity's engagement counters changed.
    SignalsChanged(EntityRef),
}

impl IndexEvent {
    /// The entity the event concerns.
    pub fn entity_ref(&self) -> EntityRef {
        match self {
            Self::Upserted(entity) => entity.entity_ref(),
            Self::Deleted(r) | Self::SignalsChanged(r) => *r,
        }
    }
}

/// Outcome of a batch re-index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Entities written.
    pub indexed: usize,
    /// Entities that failed.
    pub failed: Vec<EntityRef>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Converts entities to points and writes them to the vector store.
pub struct IndexingPipeline {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    multimodal: Option<Arc<dyn EmbeddingProvider>>,
    source: Option<Arc<dyn ContentSource>>,
    excerpt_chars: usize,
    retry: RetryPolicy,
}

impl IndexingPipeline {
    /// Create a pipeline with default excerpt length and retry policy.
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            multimodal: None,
            source: None,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            retry: RetryPolicy::default(),
        }
    }

    /// Attach the primary store, needed by [`refresh_signals`](Self::refresh_signals).
    pub fn with_source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Mirror entities into the multimodal collection, embedded by `encoder`.
    pub fn with_multimodal(mut self, encoder: Arc<dyn EmbeddingProvider>) -> Self {
        self.multimodal = Some(encoder);
        self
    }

    /// Set the payload excerpt length.
    pub fn with_excerpt_chars(mut self, chars: usize) -> Self {
        self.excerpt_chars = chars;
        self
    }

    /// Set the store write retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn should_retry(error: &Error) -> bool {
        error.is_retryable()
    }

    /// Build the point for an entity: dense embedding, sparse features, payload.
    pub async fn build_point(&self, entity: &Entity) -> Result<Point> {
        let dense = self
            .embedder
            .embed(&entity.embedding_text(), EmbedPurpose::Document)
            .await?;
        let sparse = sparsify(entity.sparse_features());
        let payload = Payload::from_entity(entity, self.excerpt_chars).into_map()?;

        Ok(Point {
            id: entity.entity_ref().point_id(),
            vectors: PointVectors {
                dense: Some(dense),
                sparse: (!sparse.is_empty()).then_some(sparse),
            },
            payload,
        })
    }

    /// Index (insert or overwrite) one entity.
    ///
    /// Idempotent: the point id derives from the entity's kind and id.
    pub async fn index_entity(&self, entity: &Entity) -> Result<()> {
        let target = entity.entity_ref();
        self.write_entity(entity)
            .await
            .map_err(|e| Error::indexing(target.to_string(), e))?;
        debug!("Indexed {target}");
        Ok(())
    }

    async fn write_entity(&self, entity: &Entity) -> Result<()> {
        let point = self.build_point(entity).await?;
        self.upsert(entity.kind().collection(), point).await?;
        if self.multimodal.is_some() {
            self.write_multimodal(entity, None).await?;
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, point: Point) -> Result<()> {
        (|| async { self.store.upsert(collection, vec![point.clone()]).await })
            .retry(self.retry.backoff())
            .when(Self::should_retry)
            .await
    }

    /// Index an entity into the multimodal collection only.
    ///
    /// `vector` is a precomputed cross-modal embedding, such as one of the
    /// post's images; without it the entity text is embedded by the
    /// multimodal encoder. A vector of the wrong dimension is rejected by
    /// the store.
    pub async fn index_multimodal(&self, entity: &Entity, vector: Option<Vec<f32>>) -> Result<()> {
        let target = entity.entity_ref();
        self.write_multimodal(entity, vector)
            .await
            .map_err(|e| Error::indexing(target.to_string(), e))?;
        debug!("Indexed {target} into {MULTIMODAL_COLLECTION}");
        Ok(())
    }

    async fn write_multimodal(&self, entity: &Entity, vector: Option<Vec<f32>>) -> Result<()> {
        let dense = match (vector, &self.multimodal) {
            (Some(vector), _) => vector,
            (None, Some(encoder)) => {
                encoder
                    .embed(&entity.embedding_text(), EmbedPurpose::Document)
                    .await?
            }
            (None, None) => {
                return Err(Error::config(
                    "multimodal indexing needs a vector or a multimodal encoder",
                ));
            }
        };
        let point = Point {
            id: entity.entity_ref().point_id(),
            vectors: PointVectors {
                dense: Some(dense),
                sparse: None,
            },
            payload: Payload::from_entity(entity, self.excerpt_chars).into_map()?,
        };
        self.upsert(MULTIMODAL_COLLECTION, point).await
    }

    /// Remove an entity's points. Deleting an absent point succeeds.
    pub async fn delete_entity(&self, target: EntityRef) -> Result<()> {
        let ids = [target.point_id()];
        let mut collections = vec![target.kind.collection()];
        if self.multimodal.is_some() {
            collections.push(MULTIMODAL_COLLECTION);
        }
        for collection in collections {
            (|| async { self.store.delete(collection, &ids).await })
                .retry(self.retry.backoff())
                .when(Self::should_retry)
                .await
                .map_err(|e| Error::indexing(target.to_string(), e))?;
        }
        debug!("Deleted {target}");
        Ok(())
    }

    /// Bring an entity's engagement counters up to date.
    ///
    /// Loads the entity from the content source and patches only the
    /// counter fields of the stored payload. A missing point is fully
    /// indexed instead; a missing entity is deleted.
    pub async fn refresh_signals(&self, target: EntityRef) -> Result<()> {
        self.patch_signals(target)
            .await
            .map_err(|e| match e {
                Error::IndexingFailure { .. } => e,
                other => Error::indexing(target.to_string(), other),
            })
    }

    async fn patch_signals(&self, target: EntityRef) -> Result<()> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| Error::config("signal refresh requires a content source"))?;

        let Some(entity) = source.load_entity(target).await? else {
            debug!("{target} no longer exists, removing its point");
            return self.delete_entity(target).await;
        };

        let fields = signal_fields(&entity);
        let collection = target.kind.collection();
        let id = target.point_id();
        let patched = (|| async { self.store.set_payload(collection, id, fields.clone()).await })
            .retry(self.retry.backoff())
            .when(Self::should_retry)
            .await;

        match patched {
            Ok(()) => {
                if self.multimodal.is_some() {
                    match self
                        .store
                        .set_payload(MULTIMODAL_COLLECTION, id, fields)
                        .await
                    {
                        Ok(()) | Err(Error::NotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                debug!("Refreshed signals for {target}");
                Ok(())
            }
            Err(Error::NotFound(_)) => {
                debug!("{target} not indexed yet, indexing in full");
                self.index_entity(&entity).await
            }
            Err(e) => Err(e),
        }
    }

    /// Index a batch of entities, continuing past failures.
    pub async fn reindex_all(&self, entities: &[Entity]) -> IndexReport {
        let mut report = IndexReport::default();
        for entity in entities {
            match self.index_entity(entity).await {
                Ok(()) => report.indexed += 1,
                Err(e) => {
                    warn!("{e}");
                    report.failed.push(entity.entity_ref());
                }
            }
        }
        info!(
            "Re-indexed {} entities ({} failed)",
            report.indexed,
            report.failed.len()
        );
        report
    }

    /// Apply a write-path event.
    pub async fn handle(&self, event: IndexEvent) -> Result<()> {
        match event {
            IndexEvent::Upserted(entity) => self.index_entity(&entity).await,
            IndexEvent::Deleted(target) => self.delete_entity(target).await,
            IndexEvent::SignalsChanged(target) => self.refresh_signals(target).await,
        }
    }

    /// Apply a write-path event, logging and discarding any failure.
    ///
    /// This is what the primary store's write path calls: a failed index
    /// must never fail the write that triggered it.
    pub async fn notify(&self, event: IndexEvent) {
        let target = event.entity_ref();
        if let Err(e) = self.handle(event).await {
            warn!("Indexing {target} skipped: {e}");
        }
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// Bounded queue decoupling the write path from indexing latency.
///
/// Events are applied in order by a single background task through
/// [`IndexingPipeline::notify`]. The worker exits once every sender is
/// dropped, returning the number of events it processed.
#[derive(Clone)]
pub struct IndexingOutbox {
    tx: mpsc::Sender<IndexEvent>,
}

impl IndexingOutbox {
    /// Start the worker.
    pub fn spawn(pipeline: Arc<IndexingPipeline>, capacity: usize) -> (Self, JoinHandle<usize>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(async move {
            let mut processed = 0;
            while let Some(event) = rx.recv().await {
                pipeline.notify(event).await;
                processed += 1;
            }
            debug!("Indexing outbox drained after {processed} events");
            processed
        });
        (Self { tx }, worker)
    }

    /// Queue an event, waiting for capacity.
    pub async fn send(&self, event: IndexEvent) -> Result<()> {
        let target = event.entity_ref();
        self.tx.send(event).await.map_err(|_| {
            Error::indexing(
                target.to_string(),
                Error::store_unavailable("indexing outbox closed"),
            )
        })
    }

    /// Queue an event without waiting. Fails when the queue is full.
    pub fn try_send(&self, event: IndexEvent) -> Result<()> {
        let target = event.entity_ref();
        self.tx.try_send(event).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "indexing outbox full",
                mpsc::error::TrySendError::Closed(_) => "indexing outbox closed",
            };
            Error::indexing(target.to_string(), Error::store_unavailable(reason))
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
