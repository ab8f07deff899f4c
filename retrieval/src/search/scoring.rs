//! Score shaping: fusion blend, structural boosts, diversification.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::Candidate;
use crate::config::SearchTuning;
use crate::types::ChunkRecord;

/// `foo.test.ts`, `foo.spec.mjs`, `foo.test.cjsx`, and the rest of the
/// `.{test,spec}.{c,m,}{j,t}sx?` family.
static TEST_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(test|spec)\.[cm]?[jt]sx?$").expect("static pattern compiles"));

const TEST_SEGMENTS: [&str; 5] = ["__tests__", "test", "tests", "spec", "specs"];
const DOC_SUFFIXES: [&str; 5] = [".md", ".mdx", ".txt", ".json", ".lock"];

pub struct ScoreShaper {
    tuning: SearchTuning,
}

impl ScoreShaper {
    pub fn new(tuning: SearchTuning) -> Self {
        Self { tuning }
    }

    /// Blend `rerank + fused_weight * rrf`, then apply the multiplicative
    /// structural boosts when `apply_boosts` is set (reranked searches).
    pub fn shape(&self, mut candidates: Vec<Candidate>, apply_boosts: bool) -> Vec<Candidate> {
        for candidate in &mut candidates {
            let mut score =
                candidate.rerank_score + self.tuning.fused_weight * candidate.rrf_score;
            if apply_boosts {
                score *= self.multiplier(&candidate.record);
            }
            candidate.score = score;
        }
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }

    fn multiplier(&self, record: &ChunkRecord) -> f32 {
        let mut factor = 1.0;
        if record.is_anchor {
            factor *= self.tuning.anchor_penalty;
        } else if record.chunk_type.is_definition() {
            factor *= self.tuning.code_boost;
        }
        if is_test_path(&record.path) {
            factor *= self.tuning.test_penalty;
        }
        if is_doc_path(&record.path) {
            factor *= self.tuning.doc_penalty;
        }
        factor
    }

    /// Admit at most `max_per_file` candidates per path, stopping at
    /// `limit`. Input must already be sorted by descending score.
    pub fn diversify(&self, candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
        let max_per_file = self.tuning.max_per_file;
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut out = Vec::with_capacity(limit.min(candidates.len()));
        for candidate in candidates {
            if out.len() >= limit {
                break;
            }
            let count = counts.entry(candidate.record.path.clone()).or_insert(0);
            if *count < max_per_file {
                *count += 1;
                out.push(candidate);
            }
        }
        out
    }
}

/// Test-file heuristic: a test directory segment or a `.test.`/`.spec.`
/// JS/TS filename.
pub fn is_test_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    if normalized
        .split('/')
        .any(|segment| TEST_SEGMENTS.contains(&segment))
    {
        return true;
    }
    TEST_FILE_RE.is_match(&normalized)
}

/// Docs and data files: markdown, text, json, lockfiles, or anything
/// under a `docs/` directory.
pub fn is_doc_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/").to_lowercase();
    if DOC_SUFFIXES.iter().any(|s| normalized.ends_with(s)) {
        return true;
    }
    normalized.contains("/docs/") || normalized.starts_with("docs/")
}
