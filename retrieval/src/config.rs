//! Configuration for the retrieval core.
//!
//! Search tunables can be overridden per-process through `OSGREP_*`
//! environment variables; invalid or non-positive values fall back to the
//! defaults.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::error::RetrievalErr;

/// Main retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    /// Root for models, store data, grammars, and the meta file.
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,

    /// Extra ignore patterns applied on top of `.osgrepignore`.
    #[serde(default)]
    pub custom_ignore: Vec<String>,

    /// Encoder worker pool settings.
    #[serde(default)]
    pub pool: PoolSettings,

    /// Indexing settings.
    #[serde(default)]
    pub indexing: IndexingSettings,

    /// Embedding dimensions the index was built with.
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Search and ranking tunables.
    #[serde(default)]
    pub search: SearchTuning,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            custom_ignore: Vec::new(),
            pool: PoolSettings::default(),
            indexing: IndexingSettings::default(),
            embedding: EmbeddingSettings::default(),
            search: SearchTuning::default(),
        }
    }
}

fn default_home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".osgrep")
}

impl RetrievalConfig {
    /// Load configuration from config files.
    ///
    /// Search order (first found wins):
    /// 1. `{workdir}/.osgrep/retrieval.toml` (project-level)
    /// 2. `~/.osgrep/retrieval.toml` (global)
    /// 3. Default
    pub fn load(workdir: &Path) -> Result<Self> {
        let project_config = workdir.join(".osgrep/retrieval.toml");
        if project_config.exists() {
            return Self::from_file(&project_config);
        }

        if let Some(home) = dirs::home_dir() {
            let global_config = home.join(".osgrep/retrieval.toml");
            if global_config.exists() {
                return Self::from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| RetrievalErr::ConfigParseError {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })
    }

    /// Downloaded encoder weights (managed externally).
    pub fn models_dir(&self) -> PathBuf {
        self.home_dir.join("models")
    }

    /// Vector store files.
    pub fn data_dir(&self) -> PathBuf {
        self.home_dir.join("data")
    }

    /// Tree-sitter wasm grammars (used by the external chunker).
    pub fn grammars_dir(&self) -> PathBuf {
        self.home_dir.join("grammars")
    }

    /// Per-file metadata for change detection; sibling `.tmp` during writes.
    pub fn meta_path(&self) -> PathBuf {
        self.home_dir.join("meta.json")
    }

    /// Validate configuration values; non-positive knobs are fatal.
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.indexing.validate()?;
        self.search.validate()
    }
}

/// Encoder worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolSettings {
    /// Number of workers; 0 selects `clamp(logical_cpus - 1, 1, 4)`.
    #[serde(default)]
    pub workers: usize,

    /// Per-request deadline in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Resident-set ceiling per worker; exceeding it schedules a restart.
    #[serde(default = "default_max_worker_rss_bytes")]
    pub max_worker_rss_bytes: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 0,
            request_timeout_secs: default_request_timeout_secs(),
            max_worker_rss_bytes: default_max_worker_rss_bytes(),
        }
    }
}

impl PoolSettings {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(RetrievalErr::ConfigError {
                field: "pool.request_timeout_secs".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.max_worker_rss_bytes == 0 {
            return Err(RetrievalErr::ConfigError {
                field: "pool.max_worker_rss_bytes".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn default_request_timeout_secs() -> u64 {
    90
}
fn default_max_worker_rss_bytes() -> u64 {
    6 * 1024 * 1024 * 1024
}

/// Indexing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexingSettings {
    /// Chunks per embedding batch and per store upsert.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Capacity of the text-to-encoding LRU cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl IndexingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RetrievalErr::ConfigError {
                field: "indexing.batch_size".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.cache_capacity == 0 {
            return Err(RetrievalErr::ConfigError {
                field: "indexing.cache_capacity".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    64
}
fn default_cache_capacity() -> usize {
    1024
}

/// Embedding dimensions; zero disables the consistency check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingSettings {
    /// Dense vector dimension.
    #[serde(default)]
    pub dense_dim: usize,

    /// Per-token late-interaction dimension.
    #[serde(default)]
    pub colbert_dim: usize,

    /// Pooled projection dimension.
    #[serde(default = "default_pooled_dim")]
    pub pooled_dim: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            dense_dim: 0,
            colbert_dim: 0,
            pooled_dim: default_pooled_dim(),
        }
    }
}

fn default_pooled_dim() -> usize {
    48
}

/// Search and ranking tunables.
///
/// `from_env()` layers the `OSGREP_*` overrides on top of these values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchTuning {
    /// Floor for the pre-rerank candidate count; the effective value is
    /// `max(5 * final_limit, pre_k_floor)`.
    #[serde(default = "default_pre_k_floor")]
    pub pre_k_floor: usize,

    /// Fused candidates kept after RRF.
    #[serde(default = "default_stage1_k")]
    pub stage1_k: usize,

    /// Candidates surviving the pooled-cosine prefilter.
    #[serde(default = "default_stage2_k")]
    pub stage2_k: usize,

    /// Candidates scored by the late-interaction rerank.
    #[serde(default = "default_rerank_top")]
    pub rerank_top: usize,

    /// Weight of the RRF score in the final blend.
    #[serde(default = "default_fused_weight")]
    pub fused_weight: f32,

    /// Result diversification cap per file.
    #[serde(default = "default_max_per_file")]
    pub max_per_file: usize,

    /// RRF constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Multiplier for anchor chunks (breaks ties below non-anchors).
    #[serde(default = "default_anchor_penalty")]
    pub anchor_penalty: f32,

    /// Multiplier for definition-shaped chunks.
    #[serde(default = "default_code_boost")]
    pub code_boost: f32,

    /// Multiplier for test paths.
    #[serde(default = "default_test_penalty")]
    pub test_penalty: f32,

    /// Multiplier for docs and data paths.
    #[serde(default = "default_doc_penalty")]
    pub doc_penalty: f32,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            pre_k_floor: default_pre_k_floor(),
            stage1_k: default_stage1_k(),
            stage2_k: default_stage2_k(),
            rerank_top: default_rerank_top(),
            fused_weight: default_fused_weight(),
            max_per_file: default_max_per_file(),
            rrf_k: default_rrf_k(),
            anchor_penalty: default_anchor_penalty(),
            code_boost: default_code_boost(),
            test_penalty: default_test_penalty(),
            doc_penalty: default_doc_penalty(),
        }
    }
}

fn default_pre_k_floor() -> usize {
    500
}
fn default_stage1_k() -> usize {
    200
}
fn default_stage2_k() -> usize {
    40
}
fn default_rerank_top() -> usize {
    20
}
fn default_fused_weight() -> f32 {
    0.5
}
fn default_max_per_file() -> usize {
    3
}
fn default_rrf_k() -> f32 {
    60.0
}
fn default_anchor_penalty() -> f32 {
    0.99
}
fn default_code_boost() -> f32 {
    1.05
}
fn default_test_penalty() -> f32 {
    0.9
}
fn default_doc_penalty() -> f32 {
    0.85
}

pub const ENV_PRE_K: &str = "OSGREP_PRE_K";
pub const ENV_STAGE1_K: &str = "OSGREP_STAGE1_K";
pub const ENV_STAGE2_K: &str = "OSGREP_STAGE2_K";
pub const ENV_RERANK_TOP: &str = "OSGREP_RERANK_TOP";
pub const ENV_RERANK_BLEND: &str = "OSGREP_RERANK_BLEND";
pub const ENV_MAX_PER_FILE: &str = "OSGREP_MAX_PER_FILE";
pub const ENV_ANCHOR_PENALTY: &str = "OSGREP_ANCHOR_PENALTY";
pub const ENV_CODE_BOOST: &str = "OSGREP_CODE_BOOST";
pub const ENV_TEST_PENALTY: &str = "OSGREP_TEST_PENALTY";
pub const ENV_DOC_PENALTY: &str = "OSGREP_DOC_PENALTY";

impl SearchTuning {
    /// Defaults with the `OSGREP_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Layer the environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        self.pre_k_floor = usize_override(ENV_PRE_K, self.pre_k_floor);
        self.stage1_k = usize_override(ENV_STAGE1_K, self.stage1_k);
        self.stage2_k = usize_override(ENV_STAGE2_K, self.stage2_k);
        self.rerank_top = usize_override(ENV_RERANK_TOP, self.rerank_top);
        self.fused_weight = f32_override(ENV_RERANK_BLEND, self.fused_weight);
        self.max_per_file = usize_override(ENV_MAX_PER_FILE, self.max_per_file);
        self.anchor_penalty = f32_override(ENV_ANCHOR_PENALTY, self.anchor_penalty);
        self.code_boost = f32_override(ENV_CODE_BOOST, self.code_boost);
        self.test_penalty = f32_override(ENV_TEST_PENALTY, self.test_penalty);
        self.doc_penalty = f32_override(ENV_DOC_PENALTY, self.doc_penalty);
        self
    }

    /// Candidate count for the parallel dense and lexical searches.
    pub fn pre_rerank_k(&self, final_limit: usize) -> usize {
        (5 * final_limit).max(self.pre_k_floor)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("search.pre_k_floor", self.pre_k_floor),
            ("search.stage1_k", self.stage1_k),
            ("search.stage2_k", self.stage2_k),
            ("search.rerank_top", self.rerank_top),
            ("search.max_per_file", self.max_per_file),
        ] {
            if value == 0 {
                return Err(RetrievalErr::ConfigError {
                    field: field.to_string(),
                    cause: "must be positive".to_string(),
                });
            }
        }
        for (field, value) in [
            ("search.fused_weight", self.fused_weight),
            ("search.rrf_k", self.rrf_k),
            ("search.anchor_penalty", self.anchor_penalty),
            ("search.code_boost", self.code_boost),
            ("search.test_penalty", self.test_penalty),
            ("search.doc_penalty", self.doc_penalty),
        ] {
            if value <= 0.0 || !value.is_finite() {
                return Err(RetrievalErr::ConfigError {
                    field: field.to_string(),
                    cause: format!("must be positive, got {value}"),
                });
            }
        }
        Ok(())
    }
}

fn usize_override(name: &str, default: usize) -> usize {
    parse_positive_usize(std::env::var(name).ok().as_deref(), default)
}

fn f32_override(name: &str, default: f32) -> f32 {
    parse_positive_f32(std::env::var(name).ok().as_deref(), default)
}

/// Parse a positive integer override; anything else keeps the default.
fn parse_positive_usize(raw: Option<&str>, default: usize) -> usize {
    match raw.map(|s| s.trim().parse::<i64>()) {
        Some(Ok(value)) if value > 0 => value as usize,
        Some(_) => default,
        None => default,
    }
}

/// Parse a positive float override; anything else keeps the default.
fn parse_positive_f32(raw: Option<&str>, default: f32) -> f32 {
    match raw.map(|s| s.trim().parse::<f32>()) {
        Some(Ok(value)) if value > 0.0 && value.is_finite() => value,
        Some(_) => default,
        None => default,
    }
}
