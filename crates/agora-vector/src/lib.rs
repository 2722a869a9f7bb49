//! Embedding and vector store plumbing for Agora.
//!
//! This crate turns text into vectors and moves vectors in and out of the
//! external vector database. It knows nothing about forum entities; that
//! lives in `agora-retrieval`.
//!
//! # Features
//!
//! - `vector-fastembed`: Enable local transformer embeddings via fastembed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     agora-vector                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider trait                                    │
//! │  ├── OpenAiEmbeddingProvider / HuggingFaceEmbeddingProvider │
//! │  ├── FastEmbedProvider (feature: vector-fastembed)          │
//! │  ├── LocalEmbeddingProvider (deterministic, always up)      │
//! │  └── FailoverEmbedder (priority chain + RateLimiter)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Sparse vectors (sparsify, term weighting)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  VectorStore trait                                          │
//! │  ├── MemoryVectorStore (exact, in-process)                  │
//! │  └── QdrantStore (REST)                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use agora_vector::{
//!     CollectionSpec, Distance, EmbedPurpose, EmbeddingProvider,
//!     LocalEmbeddingProvider, MemoryVectorStore, QueryVector, SearchRequest, VectorStore,
//! };
//!
//! let embedder = LocalEmbeddingProvider::new(384);
//! let store = MemoryVectorStore::new();
//! store.ensure_collections(&[CollectionSpec::hybrid("posts", 384, Distance::Cosine)]).await?;
//!
//! let query = embedder.embed("quantum computing", EmbedPurpose::Query).await?;
//! let hits = store.search("posts", SearchRequest::new(QueryVector::Dense(query), 10)).await?;
//! ```

// Embedding
pub mod embedding;
pub mod failover;
pub mod rate_limit;
pub mod remote;

// Sparse vectors and filters
pub mod filter;
pub mod sparse;

// Store gateway
pub mod memory;
pub mod qdrant;
pub mod store;
pub mod types;

#[cfg(feature = "vector-fastembed")]
pub mod fastembed;

// Re-exports: embedding
pub use embedding::{EmbedPurpose, EmbeddingProvider, LocalEmbeddingProvider, cosine_similarity};
pub use failover::FailoverEmbedder;
pub use rate_limit::{ProviderStatus, RateLimitPolicy, RateLimiter};
pub use remote::{HuggingFaceEmbeddingProvider, OpenAiEmbeddingProvider};

// Re-exports: sparse and filters
pub use filter::{Condition, Filter};
pub use sparse::{
    SparseEncoder, SparseVector, sparsify, term_weights, tokenize, weighted_sum, words,
};

// Re-exports: store
pub use memory::MemoryVectorStore;
pub use qdrant::QdrantStore;
pub use store::VectorStore;
pub use types::{
    CollectionSpec, DENSE_VECTOR, DenseVectorSpec, DimensionOverrides, Distance, PayloadMap,
    Point, PointId, PointVectors, QueryVector, SPARSE_VECTOR, ScoredPoint, ScrollPage,
    ScrollRequest, SearchRequest, StoredPoint,
};

#[cfg(feature = "vector-fastembed")]
pub use fastembed::FastEmbedProvider;
