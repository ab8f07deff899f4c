//! In-memory reference implementation of [`ChunkStore`].
//!
//! Serves the test suite and small repositories; the production engine
//! plugs in behind the same trait. Semantics mirror the external store:
//! full-text search fails with `FtsUnavailable` until the index has been
//! created, and ordering is deterministic (score descending, id ascending).

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::ChunkStore;
use crate::error::Result;
use crate::error::RetrievalErr;
use crate::types::ChunkRecord;
use crate::types::dot;

#[derive(Default)]
pub struct MemoryStore {
    // BTreeMap keeps iteration deterministic across runs.
    records: RwLock<BTreeMap<(String, i32), ChunkRecord>>,
    table_created: AtomicBool,
    fts_created: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn paths(&self) -> Vec<String> {
        let records = self.records.read().await;
        let mut paths: Vec<String> = records.keys().map(|(path, _)| path.clone()).collect();
        paths.dedup();
        paths
    }

    fn ranked(
        mut scored: Vec<(f32, ChunkRecord)>,
        limit: usize,
    ) -> Vec<ChunkRecord> {
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        scored.truncate(limit);
        scored.into_iter().map(|(_, record)| record).collect()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn ensure_table(&self) -> Result<()> {
        self.table_created.store(true, Ordering::Release);
        Ok(())
    }

    async fn create_fts_index(&self) -> Result<()> {
        self.fts_created.store(true, Ordering::Release);
        Ok(())
    }

    async fn vector_search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<ChunkRecord>> {
        if !self.table_created.load(Ordering::Acquire) {
            return Err(RetrievalErr::StoreMissing {
                cause: "chunks table has not been created".to_string(),
            });
        }
        let records = self.records.read().await;
        let scored: Vec<(f32, ChunkRecord)> = records
            .values()
            .filter(|r| filter_matches(filter, &r.path))
            .map(|r| (dot(vector, &r.vector), r.clone()))
            .collect();
        Ok(Self::ranked(scored, limit))
    }

    async fn text_search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<ChunkRecord>> {
        if !self.fts_created.load(Ordering::Acquire) {
            return Err(RetrievalErr::FtsUnavailable {
                cause: "full-text index has not been created".to_string(),
            });
        }
        let terms: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let records = self.records.read().await;
        let scored: Vec<(f32, ChunkRecord)> = records
            .values()
            .filter(|r| filter_matches(filter, &r.path))
            .filter_map(|r| {
                let haystack = format!("{} {}", r.path, r.content).to_lowercase();
                let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                if hits == 0 {
                    None
                } else {
                    Some((hits as f32, r.clone()))
                }
            })
            .collect();
        Ok(Self::ranked(scored, limit))
    }

    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<()> {
        self.table_created.store(true, Ordering::Release);
        let mut map = self.records.write().await;
        for record in records {
            map.insert((record.path.clone(), record.chunk_index), record);
        }
        Ok(())
    }

    async fn delete_by_path(&self, path: &str) -> Result<()> {
        let mut map = self.records.write().await;
        map.retain(|(record_path, _), _| record_path != path);
        Ok(())
    }
}

/// Evaluate the one predicate shape the core emits:
/// `path LIKE '<prefix>%'` with doubled single quotes.
fn filter_matches(filter: Option<&str>, path: &str) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    match parse_like_prefix(filter) {
        Some(prefix) => path.starts_with(&prefix),
        None => true,
    }
}

fn parse_like_prefix(filter: &str) -> Option<String> {
    let open = filter.find('\'')?;
    let close = filter.rfind('\'')?;
    if close <= open {
        return None;
    }
    let literal = &filter[open + 1..close];
    let unescaped = literal.replace("''", "'");
    Some(unescaped.trim_end_matches('%').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkType;
    use pretty_assertions::assert_eq;

    fn record(path: &str, chunk_index: i32, content: &str, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: crate::types::chunk_id(path, chunk_index),
            path: path.to_string(),
            chunk_index,
            content: content.to_string(),
            display_text: String::new(),
            context_prev: String::new(),
            context_next: String::new(),
            start_line: 1,
            end_line: 1,
            chunk_type: ChunkType::Block,
            is_anchor: false,
            hash: String::new(),
            vector,
            colbert: None,
            pooled_colbert: None,
            doc_token_ids: None,
        }
    }

    #[tokio::test]
    async fn vector_search_before_table_is_store_missing() {
        let store = MemoryStore::new();
        let err = store.vector_search(&[1.0], 5, None).await.unwrap_err();
        assert!(matches!(err, RetrievalErr::StoreMissing { .. }));
    }

    #[tokio::test]
    async fn text_search_before_index_is_fts_unavailable() {
        let store = MemoryStore::new();
        store.ensure_table().await.unwrap();
        let err = store.text_search("query", 5, None).await.unwrap_err();
        assert!(matches!(err, RetrievalErr::FtsUnavailable { .. }));
    }

    #[tokio::test]
    async fn upsert_replaces_by_path_and_index() {
        let store = MemoryStore::new();
        store
            .upsert(vec![record("src/a.rs", 0, "one", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert(vec![record("src/a.rs", 0, "two", vec![0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        let hits = store.vector_search(&[0.0, 1.0], 5, None).await.unwrap();
        assert_eq!(hits[0].content, "two");
    }

    #[tokio::test]
    async fn vector_search_orders_by_similarity() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                record("src/a.rs", 0, "a", vec![1.0, 0.0]),
                record("src/b.rs", 0, "b", vec![0.0, 1.0]),
                record("src/c.rs", 0, "c", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = store.vector_search(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "src/a.rs");
        assert_eq!(hits[1].path, "src/c.rs");
    }

    #[tokio::test]
    async fn like_filter_restricts_by_path_prefix() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                record("src/a.rs", 0, "a", vec![1.0]),
                record("lib/b.rs", 0, "b", vec![1.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .vector_search(&[1.0], 10, Some("path LIKE 'src/%'"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "src/a.rs");
    }

    #[tokio::test]
    async fn delete_by_path_removes_all_chunks() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                record("src/a.rs", 0, "a0", vec![1.0]),
                record("src/a.rs", 1, "a1", vec![1.0]),
                record("src/b.rs", 0, "b0", vec![1.0]),
            ])
            .await
            .unwrap();

        store.delete_by_path("src/a.rs").await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn like_prefix_unescapes_doubled_quotes() {
        assert_eq!(
            parse_like_prefix("path LIKE 'it''s/src/%'"),
            Some("it's/src/".to_string())
        );
    }
}
