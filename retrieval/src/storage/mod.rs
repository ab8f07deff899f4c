//! Store interface required of the external vector database.
//!
//! The on-disk engine is an external collaborator; the core only needs a
//! table supporting vector search, full-text search, filtered reads, and
//! batched upserts.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ChunkRecord;

/// Chunk table surface used by retrieval and indexing.
///
/// Error contract: `vector_search` on a missing table returns
/// `StoreMissing`; `text_search` without a full-text index returns
/// `FtsUnavailable`. Both are recoverable for callers.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Open or create the chunks table.
    async fn ensure_table(&self) -> Result<()>;

    /// Create the full-text index; idempotent.
    async fn create_fts_index(&self) -> Result<()>;

    /// Dense ANN search, optionally filtered by a SQL predicate
    /// (`path LIKE '...%'`).
    async fn vector_search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<ChunkRecord>>;

    /// Lexical full-text search with the same limit and filter semantics.
    async fn text_search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<ChunkRecord>>;

    /// Insert or replace records keyed by `(path, chunk_index)`.
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<()>;

    /// Remove every record for a repo-relative path.
    async fn delete_by_path(&self, path: &str) -> Result<()>;
}

pub use memory::MemoryStore;
