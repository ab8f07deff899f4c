//! Hybrid search and multi-stage ranking.

pub mod fusion;
pub mod rerank;
pub mod retriever;
pub mod scoring;

pub use fusion::fuse;
pub use rerank::TwoStageReranker;
pub use retriever::HybridRetriever;
pub use retriever::path_prefix_filter;
pub use scoring::ScoreShaper;

use crate::types::ChunkRecord;

/// A candidate moving through fusion, reranking, and shaping.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: ChunkRecord,
    /// Reciprocal-rank-fusion score from the hybrid retrieval stage.
    pub rrf_score: f32,
    /// Late-interaction score (or the rerank-disabled tie-breaker).
    pub rerank_score: f32,
    /// Final shaped score.
    pub score: f32,
}

impl Candidate {
    pub fn new(record: ChunkRecord, rrf_score: f32) -> Self {
        Self {
            record,
            rrf_score,
            rerank_score: 0.0,
            score: 0.0,
        }
    }
}
