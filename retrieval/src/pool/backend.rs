//! Encoder backend and the pool request protocol.

use std::sync::Arc;

use crate::error::Result;
use crate::types::Encoding;
use crate::types::LateInteractionMatrix;

/// One loaded model instance, owned by a single pool worker.
///
/// Methods take `&mut self` because the backend lives on its worker thread
/// and is never shared. Implementations may be heavyweight to construct;
/// the pool rebuilds them through the factory on restart.
pub trait EncoderBackend: Send {
    fn name(&self) -> &str {
        "encoder"
    }

    /// Dense embedding for one text.
    fn embed(&mut self, text: &str) -> Result<Vec<f32>>;

    /// Full encoding (dense, late-interaction, pooled) for one document.
    fn encode_document(&mut self, text: &str) -> Result<Encoding>;

    /// Full encodings for a batch of documents.
    fn encode_batch(&mut self, texts: &[String]) -> Result<Vec<Encoding>> {
        texts.iter().map(|text| self.encode_document(text)).collect()
    }

    /// Query encoding; the pooled projection must match the one used at
    /// indexing time.
    fn encode_query(&mut self, text: &str) -> Result<Encoding> {
        self.encode_document(text)
    }

    /// MaxSim scores of each document matrix against the query matrix.
    fn rerank(
        &mut self,
        query: &LateInteractionMatrix,
        docs: &[LateInteractionMatrix],
    ) -> Result<Vec<f32>> {
        Ok(docs.iter().map(|doc| query.maxsim(doc)).collect())
    }

    /// Resident set size reported with each reply, for memory-pressure
    /// restarts. Zero means unknown.
    fn rss_bytes(&self) -> u64 {
        0
    }
}

/// Builds a fresh backend for a worker slot; called at startup and on
/// every slot restart.
pub type BackendFactory = Arc<dyn Fn(usize) -> Result<Box<dyn EncoderBackend>> + Send + Sync>;

/// Tagged request dispatched to a worker.
#[derive(Debug, Clone)]
pub enum EncodeRequest {
    EmbedSingle(String),
    EmbedBatch(Vec<String>),
    EncodeQuery(String),
    Rerank {
        query: LateInteractionMatrix,
        docs: Vec<LateInteractionMatrix>,
    },
}

/// Reply payload, mirroring the request kind.
#[derive(Debug, Clone)]
pub enum EncodeReply {
    Vector(Vec<f32>),
    Encodings(Vec<Encoding>),
    Query(Encoding),
    Scores(Vec<f32>),
}
