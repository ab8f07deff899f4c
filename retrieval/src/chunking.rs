//! Chunker interface and plain line-window fallback.
//!
//! The structure-aware (tree-sitter) splitter is an external collaborator
//! behind [`Chunker`]; the fallback here splits on fixed line windows and
//! emits one file-level anchor stub per multi-window file for recall.

use std::sync::Arc;

use crate::types::ChunkType;

/// A chunk as produced by a splitter, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInput {
    pub content: String,
    pub display_text: String,
    pub context_prev: String,
    pub context_next: String,
    pub start_line: i32,
    pub end_line: i32,
    pub chunk_type: ChunkType,
    pub is_anchor: bool,
}

/// Splits file content into retrieval chunks.
pub trait Chunker: Send + Sync {
    fn chunk(&self, path: &str, content: &str) -> Vec<ChunkInput>;
}

pub type SharedChunker = Arc<dyn Chunker>;

/// Fallback splitter: fixed-height line windows with short context
/// overlaps from the neighboring windows.
pub struct LineChunker {
    pub window: usize,
    pub context_lines: usize,
}

impl Default for LineChunker {
    fn default() -> Self {
        Self {
            window: 40,
            context_lines: 2,
        }
    }
}

impl LineChunker {
    fn window_text(lines: &[&str], start: usize, end: usize) -> String {
        lines[start..end].join("\n")
    }
}

impl Chunker for LineChunker {
    fn chunk(&self, path: &str, content: &str) -> Vec<ChunkInput> {
        if content.trim().is_empty() {
            return Vec::new();
        }
        let lines: Vec<&str> = content.lines().collect();
        let window = self.window.max(1);
        let windows: Vec<(usize, usize)> = (0..lines.len())
            .step_by(window)
            .map(|start| (start, (start + window).min(lines.len())))
            .collect();

        let mut chunks = Vec::with_capacity(windows.len() + 1);

        // File-level anchor stub for files spanning several windows.
        if windows.len() > 1 {
            let head_end = lines.len().min(self.context_lines.max(1) * 2);
            let stub = format!("{path}\n{}", Self::window_text(&lines, 0, head_end));
            chunks.push(ChunkInput {
                content: stub.clone(),
                display_text: stub,
                context_prev: String::new(),
                context_next: String::new(),
                start_line: 1,
                end_line: head_end as i32,
                chunk_type: ChunkType::Other,
                is_anchor: true,
            });
        }

        for &(start, end) in &windows {
            let context_prev = if start == 0 {
                String::new()
            } else {
                let from = start.saturating_sub(self.context_lines);
                format!("{}\n", Self::window_text(&lines, from, start))
            };
            let context_next = if end >= lines.len() {
                String::new()
            } else {
                let to = (end + self.context_lines).min(lines.len());
                format!("\n{}", Self::window_text(&lines, end, to))
            };
            chunks.push(ChunkInput {
                content: Self::window_text(&lines, start, end),
                display_text: String::new(),
                context_prev,
                context_next,
                start_line: start as i32 + 1,
                end_line: end as i32,
                chunk_type: ChunkType::Block,
                is_anchor: false,
            });
        }

        chunks
    }
}
