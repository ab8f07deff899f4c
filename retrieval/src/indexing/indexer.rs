//! Index pipeline: traversal, change detection, chunking, batched
//! embedding, store upsert, meta persist.

use std::collections::HashMap;
use std::path::MAIN_SEPARATOR;
use std::path::Path;
use std::sync::Arc;

use osgrep_file_ignore::FileWalker;

use super::change_detector::detect_changes;
use super::change_detector::file_meta_with_hash;
use crate::chunking::ChunkInput;
use crate::chunking::SharedChunker;
use crate::embeddings::VectorCache;
use crate::error::Result;
use crate::error::RetrievalErr;
use crate::meta::FileMeta;
use crate::meta::MetaStore;
use crate::pool::EncoderPool;
use crate::storage::ChunkStore;
use crate::types::ChunkRecord;
use crate::types::Encoding;
use crate::types::chunk_id;
use crate::types::content_hash;
use crate::types::l2_normalize;

/// Counters for one index run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub files_deleted: usize,
    pub chunks_written: usize,
    pub embed_cache_hits: usize,
}

pub struct Indexer {
    store: Arc<dyn ChunkStore>,
    pool: EncoderPool,
    cache: Arc<VectorCache>,
    chunker: SharedChunker,
    meta: Arc<MetaStore>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        pool: EncoderPool,
        cache: Arc<VectorCache>,
        chunker: SharedChunker,
        meta: Arc<MetaStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            pool,
            cache,
            chunker,
            meta,
            batch_size: batch_size.max(1),
        }
    }

    /// Index `root` incrementally: only added, modified, and deleted
    /// files touch the store. Meta entries and records for a vanished
    /// file are removed together before new work is persisted.
    pub async fn index(&self, root: &Path, custom_ignore: &[String]) -> Result<IndexStats> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let walker = FileWalker::for_root(&root, custom_ignore);
        let files = walker.files();

        // Only this root's slice of the meta map takes part in the diff.
        let root_prefix = format!("{}{}", root.to_string_lossy(), MAIN_SEPARATOR);
        let previous: HashMap<String, FileMeta> = self
            .meta
            .snapshot()
            .into_iter()
            .filter(|(key, _)| key.starts_with(&root_prefix))
            .collect();

        let changes = detect_changes(&previous, &files);
        let mut stats = IndexStats::default();
        if changes.is_empty() {
            tracing::debug!(root = %root.display(), "Index is up to date");
            return Ok(stats);
        }
        tracing::info!(
            root = %root.display(),
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            "Indexing changes"
        );

        self.store.ensure_table().await?;

        for key in &changes.deleted {
            if let Some(rel) = relative_posix(&root, Path::new(key)) {
                self.store.delete_by_path(&rel).await?;
            }
            self.meta.delete(key);
            stats.files_deleted += 1;
        }

        let mut pending: Vec<ChunkRecord> = Vec::new();
        let reindexed = changes
            .added
            .iter()
            .map(|p| (p, false))
            .chain(changes.modified.iter().map(|p| (p, true)));
        for (path, is_modified) in reindexed {
            // Binary or unreadable files drop out of the index.
            let Ok(content) = std::fs::read_to_string(path) else {
                continue;
            };
            let Some(rel) = relative_posix(&root, path) else {
                continue;
            };
            if is_modified {
                // Replace wholesale so stale high-index chunks cannot linger.
                self.store.delete_by_path(&rel).await?;
            }

            let inputs = self.chunker.chunk(&rel, &content);
            let file_hash = content_hash(&content);
            if !inputs.is_empty() {
                let records = self.build_records(&rel, inputs, &mut stats).await?;
                stats.chunks_written += records.len();
                pending.extend(records);
                while pending.len() >= self.batch_size {
                    let batch: Vec<ChunkRecord> = pending.drain(..self.batch_size).collect();
                    self.store.upsert(batch).await?;
                }
            }

            self.meta
                .set(path.to_string_lossy(), file_meta_with_hash(path, file_hash)?);
            stats.files_indexed += 1;
        }
        if !pending.is_empty() {
            self.store.upsert(pending).await?;
        }

        self.meta.save().await?;
        tracing::info!(
            files = stats.files_indexed,
            chunks = stats.chunks_written,
            deleted = stats.files_deleted,
            cache_hits = stats.embed_cache_hits,
            "Index run complete"
        );
        Ok(stats)
    }

    /// Embed chunk contents (cache first, then batched pool requests) and
    /// assemble records. Vectors are normalized at write time.
    async fn build_records(
        &self,
        rel: &str,
        inputs: Vec<ChunkInput>,
        stats: &mut IndexStats,
    ) -> Result<Vec<ChunkRecord>> {
        let mut encodings: Vec<Option<Arc<Encoding>>> =
            inputs.iter().map(|i| self.cache.get(&i.content)).collect();
        stats.embed_cache_hits += encodings.iter().filter(|e| e.is_some()).count();

        let misses: Vec<usize> = encodings
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_none())
            .map(|(i, _)| i)
            .collect();
        for batch in misses.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|&i| inputs[i].content.clone()).collect();
            let batch_encodings = self.pool.embed_batch(texts).await?;
            if batch_encodings.len() != batch.len() {
                return Err(RetrievalErr::WorkerFailed {
                    cause: format!(
                        "embed batch returned {} encodings for {} texts",
                        batch_encodings.len(),
                        batch.len()
                    ),
                });
            }
            for (&i, encoding) in batch.iter().zip(batch_encodings) {
                let encoding = Arc::new(encoding);
                self.cache.put(inputs[i].content.clone(), Arc::clone(&encoding));
                encodings[i] = Some(encoding);
            }
        }

        let mut records = Vec::with_capacity(inputs.len());
        for (idx, (input, encoding)) in inputs.into_iter().zip(encodings).enumerate() {
            let Some(encoding) = encoding else {
                return Err(RetrievalErr::WorkerFailed {
                    cause: "missing encoding for chunk".to_string(),
                });
            };
            let mut vector = encoding.dense.clone();
            l2_normalize(&mut vector);
            let pooled_colbert = encoding.pooled.clone().map(|mut pooled| {
                l2_normalize(&mut pooled);
                pooled
            });
            records.push(ChunkRecord {
                id: chunk_id(rel, idx as i32),
                path: rel.to_string(),
                chunk_index: idx as i32,
                hash: content_hash(&input.content),
                content: input.content,
                display_text: input.display_text,
                context_prev: input.context_prev,
                context_next: input.context_next,
                start_line: input.start_line,
                end_line: input.end_line,
                chunk_type: input.chunk_type,
                is_anchor: input.is_anchor,
                vector,
                colbert: encoding.colbert.clone(),
                pooled_colbert,
                doc_token_ids: None,
            });
        }
        Ok(records)
    }
}

fn relative_posix(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::LineChunker;
    use crate::pool::BackendFactory;
    use crate::pool::EncoderBackend;
    use crate::pool::PoolConfig;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// Deterministic hashing embedder for tests.
    struct HashBackend;

    fn hash_embed(text: &str) -> Vec<f32> {
        use std::hash::DefaultHasher;
        use std::hash::Hash;
        use std::hash::Hasher;
        let mut v = vec![0.0f32; 16];
        for token in text.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % 16) as usize;
            v[bucket] += 1.0;
        }
        l2_normalize(&mut v);
        v
    }

    impl EncoderBackend for HashBackend {
        fn embed(&mut self, text: &str) -> crate::error::Result<Vec<f32>> {
            Ok(hash_embed(text))
        }

        fn encode_document(&mut self, text: &str) -> crate::error::Result<Encoding> {
            let rows: Vec<Vec<f32>> = text
                .split_whitespace()
                .take(8)
                .map(hash_embed)
                .collect();
            let colbert = crate::types::LateInteractionMatrix::from_rows(&rows);
            let pooled = if rows.is_empty() {
                None
            } else {
                let mut mean = vec![0.0f32; 16];
                for row in &rows {
                    for (m, r) in mean.iter_mut().zip(row) {
                        *m += r;
                    }
                }
                l2_normalize(&mut mean);
                Some(mean)
            };
            Ok(Encoding {
                dense: hash_embed(text),
                colbert,
                pooled,
            })
        }
    }

    fn test_indexer(dir: &TempDir) -> (Indexer, Arc<MemoryStore>, Arc<MetaStore>) {
        let store = Arc::new(MemoryStore::new());
        let factory: BackendFactory =
            Arc::new(|_slot| Ok(Box::new(HashBackend) as Box<dyn EncoderBackend>));
        let pool = EncoderPool::new(
            factory,
            PoolConfig {
                workers: 1,
                ..Default::default()
            },
        )
        .unwrap();
        let meta = Arc::new(MetaStore::new(dir.path().join("home").join("meta.json")));
        let indexer = Indexer::new(
            Arc::clone(&store) as Arc<dyn ChunkStore>,
            pool,
            Arc::new(VectorCache::new(256)),
            Arc::new(LineChunker::default()),
            Arc::clone(&meta),
            32,
        );
        (indexer, store, meta)
    }

    fn write(dir: &TempDir, rel: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("repo").join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn repo(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("repo")
    }

    #[tokio::test]
    async fn first_index_writes_records_and_meta() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/a.rs", "fn alpha() {}\nfn beta() {}");
        write(&dir, "src/b.rs", "fn gamma() {}");
        let (indexer, store, meta) = test_indexer(&dir);

        let stats = indexer.index(&repo(&dir), &[]).await.unwrap();
        assert_eq!(stats.files_indexed, 2);
        assert_eq!(stats.files_deleted, 0);
        assert_eq!(store.len().await, 2);
        assert_eq!(meta.len(), 2);

        // Records are normalized at write time.
        let hits = store
            .vector_search(&hash_embed("fn alpha() {}\nfn beta() {}"), 1, None)
            .await
            .unwrap();
        assert!(crate::types::is_unit_norm(&hits[0].vector));
    }

    #[tokio::test]
    async fn second_index_of_unchanged_tree_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/a.rs", "fn alpha() {}");
        let (indexer, store, _meta) = test_indexer(&dir);

        indexer.index(&repo(&dir), &[]).await.unwrap();
        let again = indexer.index(&repo(&dir), &[]).await.unwrap();
        assert_eq!(again, IndexStats::default());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn modified_file_replaces_all_of_its_chunks() {
        let dir = TempDir::new().unwrap();
        // 90 lines: anchor + three windows.
        let long: String = (0..90).map(|i| format!("line {i}\n")).collect();
        let path = write(&dir, "src/a.rs", &long);
        let (indexer, store, _meta) = test_indexer(&dir);

        indexer.index(&repo(&dir), &[]).await.unwrap();
        assert!(store.len().await > 1);

        std::fs::write(&path, "fn tiny() {}").unwrap();
        indexer.index(&repo(&dir), &[]).await.unwrap();
        // Stale high-index chunks are gone with the rewrite.
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn deleted_file_drops_records_and_meta() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "src/a.rs", "fn alpha() {}");
        write(&dir, "src/b.rs", "fn beta() {}");
        let (indexer, store, meta) = test_indexer(&dir);

        indexer.index(&repo(&dir), &[]).await.unwrap();
        assert_eq!(store.len().await, 2);

        std::fs::remove_file(&path).unwrap();
        let stats = indexer.index(&repo(&dir), &[]).await.unwrap();
        assert_eq!(stats.files_deleted, 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(meta.len(), 1);
        assert_eq!(store.paths().await, vec!["src/b.rs".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_aliases_index_each_chunk_once() {
        let dir = TempDir::new().unwrap();
        write(&dir, "real/code.rs", "fn real() {}");
        let repo_root = repo(&dir);
        std::os::unix::fs::symlink(repo_root.join("real"), repo_root.join("alias_a")).unwrap();
        std::os::unix::fs::symlink(repo_root.join("real"), repo_root.join("alias_b")).unwrap();
        let (indexer, store, _meta) = test_indexer(&dir);

        let stats = indexer.index(&repo_root, &[]).await.unwrap();
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(store.len().await, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_cycle_terminates_and_indexes_once() {
        let dir = TempDir::new().unwrap();
        write(&dir, "looped/code.rs", "fn looped() {}");
        let repo_root = repo(&dir);
        std::os::unix::fs::symlink(repo_root.join("looped"), repo_root.join("looped/cycle"))
            .unwrap();
        let (indexer, store, _meta) = test_indexer(&dir);

        let stats = indexer.index(&repo_root, &[]).await.unwrap();
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn repeated_content_hits_the_embedding_cache() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/a.rs", "fn same() {}");
        write(&dir, "src/b.rs", "fn same() {}");
        let (indexer, _store, _meta) = test_indexer(&dir);

        let stats = indexer.index(&repo(&dir), &[]).await.unwrap();
        // Identical chunk content embeds once; the second file is a hit.
        assert_eq!(stats.embed_cache_hits, 1);
    }
}
