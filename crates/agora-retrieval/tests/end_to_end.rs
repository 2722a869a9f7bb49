//! End-to-end tests for the retrieval service.
//!
//! These drive `RetrievalService` against the in-memory store and the
//! local embedder, covering:
//! - Indexing then searching
//! - Idempotent re-indexing
//! - Degraded mode when the store is down
//! - Provider failover and backoff reporting
//! - Write-path events through the outbox
//! - Recommendations from interaction history

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use agora_core::{Error, Result};
use agora_retrieval::service::build_embedder;
use agora_retrieval::{
    AgoraConfig, CategorySummary, Entity, EntityRef, HybridSearchOptions, IndexEvent, Interaction,
    InteractionKind, MemoryContentSource, Payload, Post, RecommendOptions, RetrievalService,
    SearchScope, StoreBackend, UserSummary,
};
use agora_vector::{
    EmbedPurpose, EmbeddingProvider, FailoverEmbedder, LocalEmbeddingProvider, MemoryVectorStore,
    RateLimitPolicy, RateLimiter,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

const DIM: usize = 64;

fn config() -> AgoraConfig {
    let mut config = AgoraConfig::default();
    config.store.backend = StoreBackend::Memory;
    config.store.dense_dimension = DIM;
    config.indexing.retry_attempts = 0;
    config
}

fn post(id: i64, author: i64, title: &str, content: &str) -> Entity {
    Entity::Post(Post {
        id,
        title: title.to_string(),
        content: content.to_string(),
        author: UserSummary {
            id: author,
            username: format!("user{author}"),
        },
        category: Some(CategorySummary {
            id: 1,
            name: "General".into(),
        }),
        tags: Vec::new(),
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        updated_at: None,
        vote_score: 0,
        comment_count: 0,
        bookmark_count: 0,
    })
}

fn corpus() -> Vec<Entity> {
    vec![
        post(1, 10, "Quantum basics", "What qubits are and how superposition works."),
        post(2, 11, "Sourdough starter", "Feed the starter daily with flour and water."),
        post(3, 12, "Tomato blight", "Remove affected leaves and water at the base."),
        post(4, 13, "Marathon training", "Build weekly mileage slowly and rest well."),
        post(5, 14, "Learning Rust", "Ownership and borrowing take a while to click."),
    ]
}

async fn service(
    store: Arc<MemoryVectorStore>,
    source: Arc<MemoryContentSource>,
) -> RetrievalService {
    let config = config();
    let embedder = build_embedder(&config.embedding, DIM).unwrap();
    let service = RetrievalService::new(&config, store, embedder, source);
    service.ensure_collections().await.unwrap();
    service
}

#[tokio::test]
async fn test_indexed_post_is_found_by_related_query() {
    let service = service(
        Arc::new(MemoryVectorStore::new()),
        Arc::new(MemoryContentSource::new()),
    )
    .await;
    let report = service.reindex_all(&corpus()).await;
    assert_eq!(report.indexed, 5);

    let hits = service
        .hybrid_search(
            "quantum computing explained",
            &SearchScope::default(),
            &HybridSearchOptions::new(5),
        )
        .await
        .unwrap();

    assert!(hits.len() <= 5);
    assert!(hits.iter().any(|h| h.entity == EntityRef::post(1)));
    assert_eq!(hits[0].payload.title(), "Quantum basics");
}

#[tokio::test]
async fn test_reindexing_does_not_duplicate() {
    let store = Arc::new(MemoryVectorStore::new());
    let service = service(store.clone(), Arc::new(MemoryContentSource::new())).await;
    let entity = post(1, 10, "Quantum basics", "Qubits.");

    service.index_entity(&entity).await.unwrap();
    service.index_entity(&entity).await.unwrap();

    assert_eq!(store.point_count("posts").await, 1);
    let hits = service
        .hybrid_search(
            "quantum",
            &SearchScope::default(),
            &HybridSearchOptions::new(10).dense_only().with_threshold(-1.0),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_mode_when_store_is_down() {
    let store = Arc::new(MemoryVectorStore::new());
    let service = service(store.clone(), Arc::new(MemoryContentSource::new())).await;
    store.set_available(false);

    assert!(!service.is_ready().await);

    let err = service
        .hybrid_search("quantum", &SearchScope::default(), &HybridSearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert!(err.is_degraded());

    let err = service
        .recommend(1, &RecommendOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_degraded());

    // The write path never sees indexing failures.
    service
        .notify(IndexEvent::Upserted(post(1, 10, "t", "c")))
        .await;
    assert!(matches!(
        service.index_entity(&post(1, 10, "t", "c")).await,
        Err(Error::IndexingFailure { .. })
    ));
}

struct DownProvider;

#[async_trait]
impl EmbeddingProvider for DownProvider {
    async fn embed(&self, _text: &str, _purpose: EmbedPurpose) -> Result<Vec<f32>> {
        Err(Error::provider("hosted", "503 Service Unavailable"))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn name(&self) -> &str {
        "hosted"
    }
}

#[tokio::test(start_paused = true)]
async fn test_failing_provider_backs_off_and_local_takes_over() {
    let limiter = Arc::new(RateLimiter::new(RateLimitPolicy {
        failure_threshold: 2,
        base_backoff: Duration::from_secs(5),
        ..RateLimitPolicy::default()
    }));
    let embedder = FailoverEmbedder::new(
        vec![Arc::new(DownProvider), Arc::new(LocalEmbeddingProvider::new(DIM))],
        limiter,
    )
    .unwrap();
    let service = RetrievalService::new(
        &config(),
        Arc::new(MemoryVectorStore::new()),
        embedder,
        Arc::new(MemoryContentSource::new()),
    );
    service.ensure_collections().await.unwrap();

    for entity in corpus().iter().take(2) {
        service.index_entity(entity).await.unwrap();
    }

    let status = service.provider_status();
    assert_eq!(status[0].name, "hosted");
    assert!(!status[0].available);
    assert!(status[0].backoff_remaining > Duration::ZERO);
    assert!(status[1].available);

    // While backing off, the hosted provider is skipped entirely.
    service.index_entity(&corpus()[2]).await.unwrap();
    assert_eq!(service.provider_status()[0].consecutive_failures, 2);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(service.provider_status()[0].backoff_remaining.is_zero());
}

#[tokio::test]
async fn test_outbox_events_keep_payload_current() {
    let store = Arc::new(MemoryVectorStore::new());
    let source = Arc::new(MemoryContentSource::new());
    let service = service(store.clone(), source.clone()).await;
    let (outbox, worker) = service.spawn_outbox();

    let mut entity = post(1, 10, "Quantum basics", "Qubits.");
    source.put(entity.clone()).await;
    outbox.send(IndexEvent::Upserted(entity.clone())).await.unwrap();

    if let Entity::Post(p) = &mut entity {
        p.vote_score = 7;
        p.bookmark_count = 2;
    }
    source.put(entity).await;
    outbox
        .send(IndexEvent::SignalsChanged(EntityRef::post(1)))
        .await
        .unwrap();
    drop(outbox);
    assert_eq!(worker.await.unwrap(), 2);

    let hits = service
        .hybrid_search("quantum", &SearchScope::default(), &HybridSearchOptions::new(1))
        .await
        .unwrap();
    match &hits[0].payload {
        Payload::Post(p) => {
            assert_eq!(p.vote_score, 7);
            assert_eq!(p.bookmark_count, 2);
        }
        other => unreachable!("expected a post payload, got {other:?}"),
    }
}

#[tokio::test]
async fn test_recommendations_follow_interests() {
    let source = Arc::new(MemoryContentSource::new());
    let service = service(Arc::new(MemoryVectorStore::new()), source.clone()).await;

    let mut entities = corpus();
    entities.push(post(
        6,
        15,
        "Quantum error correction",
        "Protecting qubits from noise with superposition-aware codes.",
    ));
    service.reindex_all(&entities).await;

    source
        .record(
            99,
            Interaction {
                target: EntityRef::post(1),
                kind: InteractionKind::Bookmark,
                occurred_at: Utc::now(),
            },
        )
        .await;

    let hits = service
        .recommend(99, &RecommendOptions::new(3))
        .await
        .unwrap();
    assert_eq!(hits[0].entity, EntityRef::post(6));
    assert!(hits.iter().all(|h| h.entity != EntityRef::post(1)));
}
