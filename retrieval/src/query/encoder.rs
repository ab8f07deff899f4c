//! Query encoding facade.
//!
//! Produces the dense vector, late-interaction matrix, and pooled
//! projection for a query via the worker pool, memoized through the
//! vector cache.

use std::sync::Arc;

use crate::embeddings::VectorCache;
use crate::error::Result;
use crate::pool::EncoderPool;
use crate::types::Encoding;
use crate::types::is_unit_norm;
use crate::types::l2_normalize;

pub struct QueryEncoder {
    pool: EncoderPool,
    cache: Arc<VectorCache>,
    /// Late-interaction dimension the index was built with.
    expected_colbert_dim: usize,
}

impl QueryEncoder {
    pub fn new(pool: EncoderPool, cache: Arc<VectorCache>, expected_colbert_dim: usize) -> Self {
        Self {
            pool,
            cache,
            expected_colbert_dim,
        }
    }

    /// Encode a query, consulting the cache first. The pooled projection
    /// is re-normalized so stage-1 dot products are true cosines.
    pub async fn encode(&self, query: &str) -> Result<Arc<Encoding>> {
        if let Some(hit) = self.cache.get(query) {
            tracing::debug!(query_len = query.len(), "Query encoding cache hit");
            return Ok(hit);
        }

        let mut encoding = self.pool.encode_query(query).await?;

        if let Some(matrix) = &encoding.colbert
            && self.expected_colbert_dim != 0
            && matrix.dim != self.expected_colbert_dim
        {
            tracing::warn!(
                got = matrix.dim,
                expected = self.expected_colbert_dim,
                "Query colbert dimension differs from configuration"
            );
        }

        if let Some(pooled) = encoding.pooled.as_mut()
            && !is_unit_norm(pooled)
        {
            l2_normalize(pooled);
        }

        let encoding = Arc::new(encoding);
        self.cache.put(query.to_string(), Arc::clone(&encoding));
        Ok(encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrievalErr;
    use crate::pool::EncoderBackend;
    use crate::pool::PoolConfig;
    use crate::types::LateInteractionMatrix;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    struct CountingBackend {
        calls: Arc<AtomicUsize>,
    }

    impl EncoderBackend for CountingBackend {
        fn embed(&mut self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn encode_document(&mut self, text: &str) -> Result<Encoding> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Encoding {
                dense: vec![1.0, 0.0],
                colbert: LateInteractionMatrix::from_rows(&[vec![1.0, 0.0, 0.0, 0.0]]),
                // Deliberately unnormalized; the facade fixes it up.
                pooled: Some(vec![2.0, 0.0, 0.0]),
            })
        }
    }

    fn encoder_with(calls: Arc<AtomicUsize>, expected_dim: usize) -> QueryEncoder {
        let factory: crate::pool::BackendFactory = Arc::new(move |_slot| {
            Ok(Box::new(CountingBackend {
                calls: Arc::clone(&calls),
            }) as Box<dyn EncoderBackend>)
        });
        let pool = EncoderPool::new(
            factory,
            PoolConfig {
                workers: 1,
                ..Default::default()
            },
        )
        .unwrap();
        QueryEncoder::new(pool, Arc::new(VectorCache::new(8)), expected_dim)
    }

    #[tokio::test]
    async fn pooled_projection_is_normalized() {
        let encoder = encoder_with(Arc::new(AtomicUsize::new(0)), 4);
        let encoding = encoder.encode("find the parser").await.unwrap();
        assert!(is_unit_norm(encoding.pooled.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn cache_hits_bypass_the_pool() {
        let calls = Arc::new(AtomicUsize::new(0));
        let encoder = encoder_with(Arc::clone(&calls), 4);

        let first = encoder.encode("query").await.unwrap();
        let second = encoder.encode("query").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn dimension_mismatch_warns_but_proceeds() {
        // Expected dim 48 vs produced dim 4: the encoding still comes back.
        let encoder = encoder_with(Arc::new(AtomicUsize::new(0)), 48);
        let encoding = encoder.encode("query").await.unwrap();
        assert_eq!(encoding.colbert.as_ref().unwrap().dim, 4);
    }

    struct FailingBackend;

    impl EncoderBackend for FailingBackend {
        fn embed(&mut self, _text: &str) -> Result<Vec<f32>> {
            Err(RetrievalErr::WorkerFailed {
                cause: "model not loaded".to_string(),
            })
        }

        fn encode_document(&mut self, _text: &str) -> Result<Encoding> {
            Err(RetrievalErr::WorkerFailed {
                cause: "model not loaded".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn backend_failure_surfaces_and_is_not_cached() {
        let factory: crate::pool::BackendFactory =
            Arc::new(|_slot| Ok(Box::new(FailingBackend) as Box<dyn EncoderBackend>));
        let pool = EncoderPool::new(
            factory,
            PoolConfig {
                workers: 1,
                ..Default::default()
            },
        )
        .unwrap();
        let cache = Arc::new(VectorCache::new(8));
        let encoder = QueryEncoder::new(pool, Arc::clone(&cache), 4);

        assert!(encoder.encode("query").await.is_err());
        assert!(cache.is_empty());
    }
}
