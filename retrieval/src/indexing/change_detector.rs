//! Change detection against the persisted file metadata.
//!
//! A file is modified when its size differs, or its mtime differs and the
//! content hash differs too. The hash is only computed when size or mtime
//! moved, so unchanged files are never read.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use sha2::Digest;
use sha2::Sha256;

use crate::meta::FileMeta;

/// Added, modified, and deleted paths for one traversal.
///
/// `deleted` carries the meta-store keys (absolute paths) of files that
/// vanished since the last index.
#[derive(Debug, Default, PartialEq)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Diff the current traversal against the previous meta map.
pub fn detect_changes(previous: &HashMap<String, FileMeta>, files: &[PathBuf]) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(files.len());

    for path in files {
        let key = path.to_string_lossy().to_string();
        let Ok(metadata) = std::fs::metadata(path) else {
            continue;
        };
        seen.insert(key.clone());

        match previous.get(&key) {
            None => changes.added.push(path.clone()),
            Some(prev) => {
                if prev.size != metadata.len() {
                    changes.modified.push(path.clone());
                } else if prev.mtime_ms != mtime_millis(&metadata) {
                    match hash_file(path) {
                        Ok(hash) if hash != prev.hash => changes.modified.push(path.clone()),
                        _ => {}
                    }
                }
            }
        }
    }

    changes.deleted = previous
        .keys()
        .filter(|key| !seen.contains(key.as_str()))
        .cloned()
        .collect();

    changes.added.sort();
    changes.modified.sort();
    changes.deleted.sort();
    changes
}

/// Current `{hash, mtimeMs, size}` for a file, with the hash supplied by
/// the caller who already read the content.
pub fn file_meta_with_hash(path: &Path, hash: String) -> std::io::Result<FileMeta> {
    let metadata = std::fs::metadata(path)?;
    Ok(FileMeta {
        hash,
        mtime_ms: mtime_millis(&metadata),
        size: metadata.len(),
    })
}

/// SHA256 of the file content, hex-encoded.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn mtime_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
