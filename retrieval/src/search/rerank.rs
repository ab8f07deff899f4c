//! Two-stage reranking: pooled-cosine prefilter, then late interaction.

use super::Candidate;
use crate::config::SearchTuning;
use crate::pool::EncoderPool;
use crate::types::Encoding;
use crate::types::LateInteractionMatrix;
use crate::types::dot;

pub struct TwoStageReranker {
    pool: EncoderPool,
    tuning: SearchTuning,
}

impl TwoStageReranker {
    pub fn new(pool: EncoderPool, tuning: SearchTuning) -> Self {
        Self { pool, tuning }
    }

    /// Stage 1: pooled-cosine prefilter.
    ///
    /// Runs only when more than `stage2_k` candidates arrived and the
    /// query has a pooled vector; otherwise candidates pass through in
    /// order. Candidates lacking a pooled vector score -1 and sink.
    pub fn prefilter(&self, query: &Encoding, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let stage2_k = self.tuning.stage2_k;
        if candidates.len() <= stage2_k {
            return candidates;
        }
        let Some(pooled) = query.pooled.as_deref() else {
            return candidates;
        };

        let mut scored: Vec<(f32, Candidate)> = candidates
            .into_iter()
            .map(|candidate| {
                let score = candidate
                    .record
                    .pooled_colbert
                    .as_deref()
                    .map(|doc| dot(pooled, doc))
                    .unwrap_or(-1.0);
                (score, candidate)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(stage2_k);
        tracing::debug!(kept = scored.len(), "Pooled-cosine prefilter applied");
        scored.into_iter().map(|(_, candidate)| candidate).collect()
    }

    /// Stage 2: MaxSim over the worker pool on the top `rerank_top`
    /// candidates. With reranking disabled, or when the pool fails, the
    /// fused order is kept under a tiny monotonic tie-breaker.
    pub async fn rerank(
        &self,
        query: &Encoding,
        candidates: Vec<Candidate>,
        enabled: bool,
    ) -> Vec<Candidate> {
        if candidates.is_empty() {
            return candidates;
        }
        if !enabled {
            return fused_order_scores(candidates);
        }
        let Some(query_matrix) = query.colbert.clone() else {
            tracing::debug!("Query has no late-interaction matrix; keeping fused order");
            return fused_order_scores(candidates);
        };

        let top = self.tuning.rerank_top.min(candidates.len());
        let mut head: Vec<Candidate> = candidates;
        head.truncate(top);

        let docs: Vec<LateInteractionMatrix> = head
            .iter()
            .map(|candidate| {
                candidate
                    .record
                    .colbert
                    .clone()
                    .unwrap_or_else(|| LateInteractionMatrix::empty(query_matrix.dim))
            })
            .collect();

        match self.pool.rerank(query_matrix, docs).await {
            Ok(scores) => {
                for (candidate, score) in head.iter_mut().zip(scores) {
                    candidate.rerank_score = score;
                }
                head
            }
            Err(e) => {
                // A search never fails for worker trouble.
                tracing::warn!(error = %e, "Late-interaction rerank failed; keeping fused order");
                fused_order_scores(head)
            }
        }
    }
}

/// Tie-breaker `1/(idx+1)` preserving the fused order through the blend.
fn fused_order_scores(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    for (idx, candidate) in candidates.iter_mut().enumerate() {
        candidate.rerank_score = 1.0 / (idx as f32 + 1.0);
    }
    candidates
}
