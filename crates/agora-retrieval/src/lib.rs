//! Semantic retrieval and recommendations for Agora.
//!
//! This crate knows about forum entities. It turns them into points,
//! keeps the vector index in step with the primary store, and answers
//! search and recommendation queries on top of `agora-vector`.
//!
//! # Features
//!
//! - `vector-fastembed`: Add a local transformer model to the embedding chain
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    RetrievalService                       │
//! ├───────────────┬───────────────────┬───────────────────────┤
//! │ IndexingPipeline │  SearchEngine   │     Recommender       │
//! │ (+ outbox)    │  hybrid / multi-  │  collaborative /      │
//! │               │  stage            │  content / hybrid     │
//! ├───────────────┴───────────────────┴───────────────────────┤
//! │  entity · payload · fusion · source (ContentSource)       │
//! ├───────────────────────────────────────────────────────────┤
//! │  agora-vector: FailoverEmbedder · VectorStore · sparse    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agora_retrieval::{
//!     AgoraConfig, HybridSearchOptions, MemoryContentSource, RetrievalService, SearchScope,
//! };
//!
//! let config = AgoraConfig::load(None)?;
//! let service = RetrievalService::from_config(&config, Arc::new(MemoryContentSource::new()))?;
//! service.ensure_collections().await?;
//!
//! if service.is_ready().await {
//!     let hits = service
//!         .hybrid_search("quantum computing", &SearchScope::default(), &HybridSearchOptions::new(5))
//!         .await?;
//! }
//! ```

// Domain
pub mod entity;
pub mod payload;
pub mod source;

// Configuration
pub mod config;

// Indexing
pub mod indexing;

// Retrieval
pub mod fusion;
pub mod multistage;
pub mod recommend;
pub mod search;

// Facade
pub mod service;

// Re-exports: domain
pub use entity::{
    Category, CategorySummary, Comment, Entity, EntityKind, EntityRef, Post, User, UserSummary,
};
pub use payload::{CategoryPayload, CommentPayload, Payload, PostPayload, UserPayload};
pub use source::{ContentSource, Interaction, InteractionKind, MemoryContentSource};

// Re-exports: configuration
pub use config::{AgoraConfig, RecommendFallback, StoreBackend};

// Re-exports: indexing
pub use indexing::{IndexEvent, IndexReport, IndexingOutbox, IndexingPipeline, RetryPolicy};

// Re-exports: retrieval
pub use fusion::{FusionMethod, Fused, fuse};
pub use multistage::{CandidateSource, MultiStageOptions, Rescore};
pub use recommend::{RecommendAlgorithm, RecommendOptions, Recommender, UserProfile, diversify};
pub use search::{HybridSearchOptions, MatchType, SearchEngine, SearchHit, SearchScope};

// Re-exports: facade
pub use service::{RetrievalService, ServiceStatus};
