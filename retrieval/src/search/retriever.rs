//! Hybrid retrieval: parallel dense and lexical searches, RRF-fused.
//!
//! Dense failure (missing table) yields an empty result; a lexical
//! failure logs and contributes nothing. The full-text index is created
//! lazily once per process.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use super::Candidate;
use super::fusion::fuse;
use crate::config::SearchTuning;
use crate::error::Result;
use crate::error::RetrievalErr;
use crate::storage::ChunkStore;
use crate::types::ChunkRecord;
use crate::types::Encoding;

pub struct HybridRetriever {
    store: Arc<dyn ChunkStore>,
    tuning: SearchTuning,
    /// One-shot flag: the FTS index is checked at most once per process.
    fts_checked: AtomicBool,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn ChunkStore>, tuning: SearchTuning) -> Self {
        Self {
            store,
            tuning,
            fts_checked: AtomicBool::new(false),
        }
    }

    /// Run both searches and fuse. `final_limit` sizes the pre-rerank
    /// candidate pool; the fused list is truncated to `stage1_k`.
    pub async fn retrieve(
        &self,
        encoding: &Encoding,
        query_text: &str,
        path_prefix: Option<&str>,
        final_limit: usize,
    ) -> Result<Vec<Candidate>> {
        let pre_k = self.tuning.pre_rerank_k(final_limit);
        let filter = path_prefix.map(path_prefix_filter);
        let filter = filter.as_deref();

        let (dense, lexical) = tokio::join!(
            self.store.vector_search(&encoding.dense, pre_k, filter),
            self.text_search(query_text, pre_k, filter),
        );

        let dense = match dense {
            Ok(records) => records,
            Err(RetrievalErr::StoreMissing { cause }) => {
                tracing::debug!(%cause, "Vector table missing; empty result");
                return Ok(Vec::new());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dense search failed; empty result");
                return Ok(Vec::new());
            }
        };
        let lexical = lexical.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Full-text search failed; continuing dense-only");
            Vec::new()
        });

        tracing::debug!(
            dense = dense.len(),
            lexical = lexical.len(),
            pre_k,
            "Hybrid retrieval complete"
        );
        Ok(fuse(dense, lexical, self.tuning.rrf_k, self.tuning.stage1_k))
    }

    async fn text_search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<ChunkRecord>> {
        if !self.fts_checked.load(Ordering::Acquire) {
            if let Err(e) = self.store.create_fts_index().await {
                tracing::warn!(error = %e, "Could not create full-text index");
            }
            self.fts_checked.store(true, Ordering::Release);
        }
        self.store.text_search(query, limit, filter).await
    }
}

/// `path LIKE '<prefix>%'` with single quotes doubled and the prefix
/// POSIX-normalized.
pub fn path_prefix_filter(prefix: &str) -> String {
    let normalized = prefix.replace('\\', "/");
    let escaped = normalized.replace('\'', "''");
    format!("path LIKE '{escaped}%'")
}
