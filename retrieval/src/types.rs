//! Core data types for the retrieval and ranking pipeline.

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// Tolerance for unit-norm checks on stored vectors.
pub const NORM_EPSILON: f32 = 1e-3;

/// Chunk kind assigned by the structure-aware splitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Class,
    Method,
    Interface,
    TypeAlias,
    Block,
    #[default]
    Other,
}

impl ChunkType {
    /// Definition-shaped chunks eligible for the structural boost.
    pub fn is_definition(self) -> bool {
        matches!(
            self,
            ChunkType::Function
                | ChunkType::Class
                | ChunkType::Method
                | ChunkType::Interface
                | ChunkType::TypeAlias
        )
    }
}

/// Quantized late-interaction matrix: one L2-normalized vector per token,
/// stored row-major as i8 with a shared dequantization scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateInteractionMatrix {
    pub data: Vec<i8>,
    pub dim: usize,
    pub scale: f32,
}

impl LateInteractionMatrix {
    /// An empty matrix; scores zero against anything.
    pub fn empty(dim: usize) -> Self {
        Self {
            data: Vec::new(),
            dim: dim.max(1),
            scale: 0.0,
        }
    }

    /// Quantize per-token float vectors. Rows are L2-normalized before
    /// quantization; `scale = max_abs / 127`. Returns None for no rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> Option<Self> {
        let dim = rows.first().map(Vec::len)?;
        if dim == 0 {
            return None;
        }
        let mut normalized: Vec<Vec<f32>> = Vec::with_capacity(rows.len());
        for row in rows {
            let mut row = row.clone();
            row.resize(dim, 0.0);
            l2_normalize(&mut row);
            normalized.push(row);
        }
        let max_abs = normalized
            .iter()
            .flat_map(|r| r.iter())
            .fold(0.0f32, |acc, v| acc.max(v.abs()));
        let scale = if max_abs > 0.0 {
            max_abs / 127.0
        } else {
            1.0 / 127.0
        };
        let data = normalized
            .iter()
            .flat_map(|r| {
                r.iter()
                    .map(|v| (v / scale).round().clamp(-127.0, 127.0) as i8)
            })
            .collect();
        Some(Self { data, dim, scale })
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn row(&self, index: usize) -> &[i8] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    /// MaxSim against a document matrix: for each query row take the
    /// maximum dequantized dot product over document rows, summed across
    /// query rows. Streams row-by-row; no f32 matrix is materialized.
    pub fn maxsim(&self, doc: &LateInteractionMatrix) -> f32 {
        if self.is_empty() || doc.is_empty() {
            return 0.0;
        }
        let dim = self.dim.min(doc.dim);
        let unit = self.scale * doc.scale;
        let mut total = 0.0f32;
        for q in 0..self.rows() {
            let q_row = self.row(q);
            let mut best = i32::MIN;
            for d in 0..doc.rows() {
                let d_row = doc.row(d);
                let mut acc = 0i32;
                for i in 0..dim {
                    acc += i32::from(q_row[i]) * i32::from(d_row[i]);
                }
                best = best.max(acc);
            }
            total += best as f32 * unit;
        }
        total
    }
}

/// Encoded text: dense vector, late-interaction matrix, pooled projection.
/// The same shape serves document indexing and query encoding.
#[derive(Debug, Clone, Default)]
pub struct Encoding {
    pub dense: Vec<f32>,
    pub colbert: Option<LateInteractionMatrix>,
    pub pooled: Option<Vec<f32>>,
}

/// Unit of indexing and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Stable id, deterministic from path and chunk index.
    pub id: String,
    /// Repo-relative POSIX-normalized path.
    pub path: String,
    pub chunk_index: i32,
    pub content: String,
    #[serde(default)]
    pub display_text: String,
    #[serde(default)]
    pub context_prev: String,
    #[serde(default)]
    pub context_next: String,
    /// 1-based inclusive line range; `end_line >= start_line`.
    pub start_line: i32,
    pub end_line: i32,
    #[serde(default)]
    pub chunk_type: ChunkType,
    /// Anchors are recall helpers, never primary candidates on ties.
    #[serde(default)]
    pub is_anchor: bool,
    #[serde(default)]
    pub hash: String,
    /// Dense embedding, L2-normalized at write time.
    #[serde(default)]
    pub vector: Vec<f32>,
    /// Canonical absent form is None; `[]` deserializes to None.
    #[serde(default, deserialize_with = "empty_matrix_as_none")]
    pub colbert: Option<LateInteractionMatrix>,
    /// Mean-pooled projection of `colbert`, unit-norm.
    #[serde(default)]
    pub pooled_colbert: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_token_ids: Option<Vec<i32>>,
}

impl ChunkRecord {
    /// Fusion key: the id, or `path:chunk_index` when the id is absent.
    pub fn fusion_key(&self) -> String {
        if self.id.is_empty() {
            format!("{}:{}", self.path, self.chunk_index)
        } else {
            self.id.clone()
        }
    }

    pub fn num_lines(&self) -> i32 {
        (self.end_line - self.start_line + 1).max(1)
    }

    /// Display text surrounded by its context windows.
    pub fn render_text(&self) -> String {
        let body = if self.display_text.is_empty() {
            &self.content
        } else {
            &self.display_text
        };
        format!("{}{}{} ", self.context_prev, body, self.context_next)
    }
}

fn empty_matrix_as_none<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<LateInteractionMatrix>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let matrix = Option::<LateInteractionMatrix>::deserialize(deserializer)?;
    Ok(matrix.filter(|m| !m.data.is_empty()))
}

/// Deterministic chunk id so fusion keys collide across re-indexes.
pub fn chunk_id(path: &str, chunk_index: i32) -> String {
    let digest = Sha256::digest(format!("{path}:{chunk_index}").as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Full SHA256 hex of chunk content.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn is_unit_norm(v: &[f32]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    (norm - 1.0).abs() <= NORM_EPSILON
}

/// Public query result shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub data: Vec<ResultItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub score: f32,
    pub metadata: ResultMetadata,
    pub generated_metadata: GeneratedMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub path: String,
    pub hash: String,
    pub is_anchor: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedMetadata {
    pub start_line: i32,
    pub num_lines: i32,
    #[serde(rename = "type")]
    pub kind: ChunkType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_chunk(id: &str, path: &str, chunk_index: i32) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            path: path.to_string(),
            chunk_index,
            content: format!("content of {path}:{chunk_index}"),
            display_text: String::new(),
            context_prev: String::new(),
            context_next: String::new(),
            start_line: 1,
            end_line: 3,
            chunk_type: ChunkType::Block,
            is_anchor: false,
            hash: String::new(),
            vector: Vec::new(),
            colbert: None,
            pooled_colbert: None,
            doc_token_ids: None,
        }
    }

    #[test]
    fn chunk_id_is_deterministic() {
        assert_eq!(chunk_id("src/a.rs", 0), chunk_id("src/a.rs", 0));
        assert_ne!(chunk_id("src/a.rs", 0), chunk_id("src/a.rs", 1));
        assert_ne!(chunk_id("src/a.rs", 0), chunk_id("src/b.rs", 0));
        assert_eq!(chunk_id("src/a.rs", 0).len(), 16);
    }

    #[test]
    fn fusion_key_falls_back_to_path_and_index() {
        let with_id = make_chunk("abc", "src/a.rs", 2);
        assert_eq!(with_id.fusion_key(), "abc");

        let without_id = make_chunk("", "src/a.rs", 2);
        assert_eq!(without_id.fusion_key(), "src/a.rs:2");
    }

    #[test]
    fn render_text_prefers_display_text_and_appends_space() {
        let mut chunk = make_chunk("x", "src/a.rs", 0);
        chunk.content = "raw".to_string();
        chunk.context_prev = "before\n".to_string();
        chunk.context_next = "\nafter".to_string();
        assert_eq!(chunk.render_text(), "before\nraw\nafter ");

        chunk.display_text = "rendered".to_string();
        assert_eq!(chunk.render_text(), "before\nrendered\nafter ");
    }

    #[test]
    fn num_lines_is_at_least_one() {
        let mut chunk = make_chunk("x", "src/a.rs", 0);
        chunk.start_line = 10;
        chunk.end_line = 12;
        assert_eq!(chunk.num_lines(), 3);

        chunk.end_line = 10;
        assert_eq!(chunk.num_lines(), 1);
    }

    #[test]
    fn quantized_rows_are_normalized_before_quantization() {
        let matrix =
            LateInteractionMatrix::from_rows(&[vec![3.0, 4.0, 0.0], vec![0.0, 0.0, 2.0]]).unwrap();
        assert_eq!(matrix.rows(), 2);

        // First row normalizes to (0.6, 0.8, 0.0); max_abs is 1.0 from row two.
        let scale = matrix.scale;
        let first: Vec<f32> = matrix.data[..3]
            .iter()
            .map(|v| f32::from(*v) * scale)
            .collect();
        assert!((first[0] - 0.6).abs() < 0.02);
        assert!((first[1] - 0.8).abs() < 0.02);
    }

    #[test]
    fn maxsim_of_identical_unit_rows_is_row_count() {
        let rows = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let query = LateInteractionMatrix::from_rows(&rows).unwrap();
        let doc = LateInteractionMatrix::from_rows(&rows).unwrap();

        // Each query row finds its identical doc row: score ~= 2.0.
        let score = query.maxsim(&doc);
        assert!((score - 2.0).abs() < 0.05, "score = {score}");
    }

    #[test]
    fn maxsim_with_empty_doc_is_zero() {
        let query = LateInteractionMatrix::from_rows(&[vec![1.0, 0.0]]).unwrap();
        let doc = LateInteractionMatrix::empty(2);
        assert_eq!(query.maxsim(&doc), 0.0);
    }

    #[test]
    fn empty_colbert_deserializes_to_none() {
        let json = serde_json::json!({
            "id": "a", "path": "src/a.rs", "chunk_index": 0,
            "content": "x", "start_line": 1, "end_line": 1,
            "colbert": { "data": [], "dim": 48, "scale": 0.0 }
        });
        let record: ChunkRecord = serde_json::from_value(json).unwrap();
        assert!(record.colbert.is_none());
    }

    #[test]
    fn l2_normalize_produces_unit_vectors() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!(is_unit_norm(&v));

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert!(!is_unit_norm(&zero));
    }
}
