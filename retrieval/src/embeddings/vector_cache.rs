//! Bounded LRU memoization of text encodings.
//!
//! Consulted before every embed request; hits bypass the worker pool.
//! One owning task mutates between awaits, so a plain mutex suffices and
//! hit paths stay O(1).

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use lru::LruCache;

use crate::types::Encoding;

pub struct VectorCache {
    inner: Mutex<LruCache<String, Arc<Encoding>>>,
}

impl VectorCache {
    /// Create a cache holding at most `capacity` encodings.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up an encoding, marking it most recently used.
    pub fn get(&self, text: &str) -> Option<Arc<Encoding>> {
        self.lock().get(text).cloned()
    }

    /// Insert an encoding, evicting the least recently used on overflow.
    pub fn put(&self, text: String, encoding: Arc<Encoding>) {
        self.lock().put(text, encoding);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Arc<Encoding>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
