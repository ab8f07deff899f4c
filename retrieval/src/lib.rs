//! osgrep retrieval core.
//!
//! Structure-aware semantic code search: a repository is traversed and
//! change-detected, chunks are embedded through a bounded worker pool,
//! and queries are answered by hybrid dense+lexical retrieval fused with
//! RRF, a pooled-cosine prefilter, a late-interaction rerank, and
//! structural score shaping with per-file diversification.
//!
//! External collaborators (the vector store engine, the structure-aware
//! chunker, the encoder model) plug in behind the `ChunkStore`,
//! `Chunker`, and `EncoderBackend` traits.

// Core modules
pub mod config;
pub mod error;
pub mod meta;
pub mod service;
pub mod types;

// Subsystems
pub mod chunking;
pub mod embeddings;
pub mod eval;
pub mod indexing;
pub mod pool;
pub mod query;
pub mod search;
pub mod storage;

// Re-exports
pub use config::RetrievalConfig;
pub use config::SearchTuning;
pub use error::Result;
pub use error::RetrievalErr;
pub use meta::FileMeta;
pub use meta::MetaStore;
pub use service::SearchOptions;
pub use service::SearchService;
pub use types::ChunkRecord;
pub use types::ChunkType;
pub use types::Encoding;
pub use types::LateInteractionMatrix;
pub use types::SearchResponse;

// Pipeline exports
pub use chunking::Chunker;
pub use chunking::LineChunker;
pub use embeddings::VectorCache;
pub use eval::EvalOutcome;
pub use eval::judge;
pub use indexing::ChangeSet;
pub use indexing::IndexStats;
pub use indexing::Indexer;
pub use indexing::detect_changes;
pub use pool::BackendFactory;
pub use pool::EncoderBackend;
pub use pool::EncoderPool;
pub use pool::PoolConfig;
pub use query::QueryEncoder;
pub use search::HybridRetriever;
pub use search::ScoreShaper;
pub use search::TwoStageReranker;
pub use storage::ChunkStore;
pub use storage::MemoryStore;
