//! Durable per-file metadata store for change detection.
//!
//! A single JSON object keyed by absolute path, written atomically
//! (tmp-then-rename). Loads tolerate a missing or corrupt main file by
//! consulting the tmp file and promoting it by copy.

use std::collections::HashMap;
use std::path::MAIN_SEPARATOR;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;

/// Per-file metadata entry: `{ hash, mtimeMs, size }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileMeta {
    pub hash: String,
    #[serde(rename = "mtimeMs")]
    pub mtime_ms: i64,
    pub size: u64,
}

impl<'de> Deserialize<'de> for FileMeta {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Entry {
                #[serde(default)]
                hash: String,
                #[serde(rename = "mtimeMs", default)]
                mtime_ms: i64,
                #[serde(default)]
                size: u64,
            },
            // Legacy format stored the bare content hash.
            Legacy(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Entry {
                hash,
                mtime_ms,
                size,
            } => FileMeta {
                hash,
                mtime_ms,
                size,
            },
            Repr::Legacy(hash) => FileMeta {
                hash,
                mtime_ms: 0,
                size: 0,
            },
        })
    }
}

/// Crash-safe key-to-record map backing the change detector.
///
/// Reads are served from the in-memory snapshot. Saves are serialized
/// through an async mutex, so concurrent callers queue and a failed save
/// releases the queue instead of blocking it.
pub struct MetaStore {
    path: PathBuf,
    entries: StdMutex<HashMap<String, FileMeta>>,
    save_lock: AsyncMutex<()>,
}

impl MetaStore {
    /// Create an empty store that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: StdMutex::new(HashMap::new()),
            save_lock: AsyncMutex::new(()),
        }
    }

    /// Load from disk, recovering from the tmp file when the main file is
    /// missing or corrupt. Never fails; the fallback is an empty map.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_map(&path) {
            Ok(map) => map,
            Err(main_err) => {
                let tmp = tmp_path(&path);
                match read_map(&tmp) {
                    Ok(map) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %main_err,
                            "Meta file unreadable; recovered from tmp"
                        );
                        if let Err(e) = std::fs::copy(&tmp, &path) {
                            tracing::warn!(error = %e, "Could not promote tmp meta file");
                        }
                        map
                    }
                    Err(_) => {
                        if path.exists() {
                            tracing::warn!(
                                path = %path.display(),
                                error = %main_err,
                                "Meta file corrupt and no usable tmp; starting empty"
                            );
                        }
                        HashMap::new()
                    }
                }
            }
        };

        Self {
            path,
            entries: StdMutex::new(entries),
            save_lock: AsyncMutex::new(()),
        }
    }

    pub fn get(&self, path: &str) -> Option<FileMeta> {
        self.lock_entries().get(path).cloned()
    }

    pub fn set(&self, path: impl Into<String>, entry: FileMeta) {
        self.lock_entries().insert(path.into(), entry);
    }

    pub fn delete(&self, path: &str) -> bool {
        self.lock_entries().remove(path).is_some()
    }

    /// Remove every key under `prefix`, treated as a directory: the
    /// platform separator is appended when absent.
    pub fn delete_by_prefix(&self, prefix: &str) -> usize {
        let mut prefix = prefix.to_string();
        if !prefix.ends_with(MAIN_SEPARATOR) {
            prefix.push(MAIN_SEPARATOR);
        }
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        before - entries.len()
    }

    /// Copy of the current map, for change detection.
    pub fn snapshot(&self) -> HashMap<String, FileMeta> {
        self.lock_entries().clone()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Persist the current map: write `<meta>.tmp`, then rename over the
    /// main file. Concurrent saves queue on the save lock.
    pub async fn save(&self) -> Result<()> {
        let json = {
            let entries = self.lock_entries();
            serde_json::to_string(&*entries).map_err(|e| crate::error::RetrievalErr::MetaCorrupt {
                path: self.path.clone(),
                cause: e.to_string(),
            })?
        };

        let _guard = self.save_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, FileMeta>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn read_map(path: &Path) -> std::io::Result<HashMap<String, FileMeta>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(std::io::Error::other)
}
