//! High-level search service.
//!
//! Composes the query encoder, hybrid retriever, two-stage reranker, and
//! score shaping into `search()`, and the traversal/change-detection/
//! embedding pipeline into `index()`.

use std::path::Path;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embeddings::VectorCache;
use crate::error::Result;
use crate::indexing::IndexStats;
use crate::indexing::Indexer;
use crate::meta::MetaStore;
use crate::pool::BackendFactory;
use crate::pool::EncoderPool;
use crate::pool::PoolConfig;
use crate::query::QueryEncoder;
use crate::search::Candidate;
use crate::search::HybridRetriever;
use crate::search::ScoreShaper;
use crate::search::TwoStageReranker;
use crate::storage::ChunkStore;
use crate::types::GeneratedMetadata;
use crate::types::ResultItem;
use crate::types::ResultMetadata;
use crate::types::SearchResponse;

use crate::chunking::SharedChunker;

/// Per-query options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum results returned.
    pub limit: usize,
    /// Late-interaction reranking; disabled keeps the fused order.
    pub rerank: bool,
    /// Restrict to paths under this repo-relative prefix.
    pub path_prefix: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            rerank: true,
            path_prefix: None,
        }
    }
}

pub struct SearchService {
    config: RetrievalConfig,
    pool: EncoderPool,
    encoder: QueryEncoder,
    retriever: HybridRetriever,
    reranker: TwoStageReranker,
    shaper: ScoreShaper,
    meta: Arc<MetaStore>,
    indexer: Indexer,
}

impl SearchService {
    /// Build a service over an opened store, an encoder backend factory,
    /// and a chunker. Must run inside a tokio runtime (the pool spawns
    /// its reply demultiplexer here).
    pub fn new(
        config: RetrievalConfig,
        store: Arc<dyn ChunkStore>,
        factory: BackendFactory,
        chunker: SharedChunker,
    ) -> Result<Self> {
        config.validate()?;
        let tuning = config.search.clone().with_env_overrides();

        let pool = EncoderPool::new(factory, PoolConfig::from(&config.pool))?;
        let cache = Arc::new(VectorCache::new(config.indexing.cache_capacity));
        let encoder = QueryEncoder::new(
            pool.clone(),
            Arc::clone(&cache),
            config.embedding.colbert_dim,
        );
        let retriever = HybridRetriever::new(Arc::clone(&store), tuning.clone());
        let reranker = TwoStageReranker::new(pool.clone(), tuning.clone());
        let shaper = ScoreShaper::new(tuning);
        let meta = Arc::new(MetaStore::load(config.meta_path()));
        let indexer = Indexer::new(
            store,
            pool.clone(),
            cache,
            chunker,
            Arc::clone(&meta),
            config.indexing.batch_size,
        );

        Ok(Self {
            config,
            pool,
            encoder,
            retriever,
            reranker,
            shaper,
            meta,
            indexer,
        })
    }

    /// Search for code matching a natural-language query.
    ///
    /// Never fails for a missing table, missing FTS index, zero
    /// candidates, or worker trouble; those produce an empty or shorter
    /// list.
    pub async fn search(&self, query: &str, opts: SearchOptions) -> Result<SearchResponse> {
        let limit = opts.limit.max(1);

        let encoding = match self.encoder.encode(query).await {
            Ok(encoding) => encoding,
            Err(e) => {
                tracing::warn!(error = %e, "Query encoding failed; empty result");
                return Ok(SearchResponse::default());
            }
        };

        let candidates = self
            .retriever
            .retrieve(&encoding, query, opts.path_prefix.as_deref(), limit)
            .await?;
        if candidates.is_empty() {
            return Ok(SearchResponse::default());
        }

        let prefiltered = self.reranker.prefilter(&encoding, candidates);
        let ranked = self.reranker.rerank(&encoding, prefiltered, opts.rerank).await;
        if ranked.is_empty() {
            return Ok(SearchResponse::default());
        }

        let shaped = self.shaper.shape(ranked, opts.rerank);
        let diverse = self.shaper.diversify(shaped, limit);

        tracing::debug!(results = diverse.len(), limit, "Search complete");
        Ok(SearchResponse {
            data: diverse.into_iter().map(result_item).collect(),
        })
    }

    /// Index (or re-index) a repository root incrementally.
    pub async fn index(&self, root: &Path) -> Result<IndexStats> {
        self.indexer.index(root, &self.config.custom_ignore).await
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    /// Stop the encoder workers. Idempotent.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

fn result_item(candidate: Candidate) -> ResultItem {
    let record = candidate.record;
    ResultItem {
        kind: "text".to_string(),
        text: record.render_text(),
        score: candidate.score,
        metadata: ResultMetadata {
            path: record.path,
            hash: record.hash,
            is_anchor: record.is_anchor,
        },
        generated_metadata: GeneratedMetadata {
            start_line: record.start_line,
            num_lines: (record.end_line - record.start_line + 1).max(1),
            kind: record.chunk_type,
        },
    }
}
