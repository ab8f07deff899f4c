//! Reciprocal Rank Fusion of the dense and lexical result lists.
//!
//! Score per list membership is `1 / (k + rank + 1)` with k = 60. The
//! candidate key is the record id, falling back to `path:chunk_index`.
//! Ties keep insertion order, dense list first.

use std::collections::HashMap;

use super::Candidate;
use crate::types::ChunkRecord;

/// Default RRF constant.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Fuse the dense and lexical lists, truncating to `limit`.
pub fn fuse(
    dense: Vec<ChunkRecord>,
    lexical: Vec<ChunkRecord>,
    rrf_k: f32,
    limit: usize,
) -> Vec<Candidate> {
    let mut order: Vec<Candidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for list in [dense, lexical] {
        for (rank, record) in list.into_iter().enumerate() {
            let score = 1.0 / (rrf_k + rank as f32 + 1.0);
            let key = record.fusion_key();
            match index.get(&key) {
                Some(&at) => order[at].rrf_score += score,
                None => {
                    index.insert(key, order.len());
                    order.push(Candidate::new(record, score));
                }
            }
        }
    }

    // Stable sort: equal scores keep first-seen (dense-first) order.
    order.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(limit);
    order
}
