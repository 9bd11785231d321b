use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub lexical: LexicalConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub cells: CellsConfig,
    #[serde(default)]
    pub skeleton: SkeletonConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub folder: PathBuf,
    #[serde(default = "default_evaluation_type")]
    pub evaluation_type: String,
    #[serde(default)]
    pub column_meaning_path: Option<PathBuf>,
}

fn default_evaluation_type() -> String {
    "dev".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_true")]
    pub in_memory: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            in_memory: true,
        }
    }
}

fn default_cache_capacity() -> usize {
    16
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplingConfig {
    #[serde(default = "default_sample_limit")]
    pub limit: usize,
    #[serde(default = "default_max_value_chars")]
    pub max_value_chars: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            limit: default_sample_limit(),
            max_value_chars: default_max_value_chars(),
        }
    }
}

fn default_sample_limit() -> usize {
    3
}
fn default_max_value_chars() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct LexicalConfig {
    #[serde(default = "default_max_ngram")]
    pub max_ngram: usize,
    #[serde(default = "default_lexical_k")]
    pub k: usize,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_question_batch")]
    pub batch_size: usize,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            max_ngram: default_max_ngram(),
            k: default_lexical_k(),
            threads: default_threads(),
            min_score: default_min_score(),
            top_n: default_top_n(),
            batch_size: default_question_batch(),
        }
    }
}

fn default_max_ngram() -> usize {
    8
}
fn default_lexical_k() -> usize {
    10
}
fn default_threads() -> usize {
    60
}
fn default_min_score() -> f64 {
    0.85
}
fn default_top_n() -> usize {
    20
}
fn default_question_batch() -> usize {
    20000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Root directory holding one content index per database.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_vector_path")]
    pub vector_path: PathBuf,
    #[serde(default = "default_extraction_timeout")]
    pub extraction_timeout_secs: u64,
    #[serde(default)]
    pub distance: DistanceMetric,
}

/// Distance used by the vector store. Lower is always closer.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// One minus cosine similarity.
    Cosine,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: None,
            vector_path: default_vector_path(),
            extraction_timeout_secs: default_extraction_timeout(),
            distance: DistanceMetric::default(),
        }
    }
}

fn default_vector_path() -> PathBuf {
    PathBuf::from("./data/vectors.sqlite")
}
fn default_extraction_timeout() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct CellsConfig {
    #[serde(default = "default_cell_threshold")]
    pub threshold: f32,
    #[serde(default = "default_cell_k")]
    pub k: usize,
    #[serde(default = "default_max_str_len")]
    pub max_str_len: usize,
    #[serde(default = "default_ingest_batch")]
    pub batch_size: usize,
}

impl Default for CellsConfig {
    fn default() -> Self {
        Self {
            threshold: default_cell_threshold(),
            k: default_cell_k(),
            max_str_len: default_max_str_len(),
            batch_size: default_ingest_batch(),
        }
    }
}

fn default_cell_threshold() -> f32 {
    0.8
}
fn default_cell_k() -> usize {
    5
}
fn default_max_str_len() -> usize {
    256
}
fn default_ingest_batch() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SkeletonConfig {
    #[serde(default = "default_skeleton_collection")]
    pub collection: String,
    #[serde(default = "default_skeleton_threshold")]
    pub threshold: f32,
    #[serde(default = "default_skeleton_k")]
    pub k: usize,
    #[serde(default = "default_ingest_batch")]
    pub batch_size: usize,
}

impl Default for SkeletonConfig {
    fn default() -> Self {
        Self {
            collection: default_skeleton_collection(),
            threshold: default_skeleton_threshold(),
            k: default_skeleton_k(),
            batch_size: default_ingest_batch(),
        }
    }
}

fn default_skeleton_collection() -> String {
    "train_skeleton".to_string()
}
fn default_skeleton_threshold() -> f32 {
    1.5
}
fn default_skeleton_k() -> usize {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// A config rooted at `folder` with every other section defaulted.
    pub fn for_dataset(folder: impl Into<PathBuf>, evaluation_type: &str) -> Self {
        Self {
            dataset: DatasetConfig {
                folder: folder.into(),
                evaluation_type: evaluation_type.to_string(),
                column_meaning_path: None,
            },
            db: DbConfig::default(),
            sampling: SamplingConfig::default(),
            lexical: LexicalConfig::default(),
            index: IndexConfig::default(),
            cells: CellsConfig::default(),
            skeleton: SkeletonConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.dataset.evaluation_type.as_str() {
        "dev" | "test" | "train" => {}
        other => anyhow::bail!(
            "dataset.evaluation_type must be dev, test, or train (got '{}')",
            other
        ),
    }

    if config.db.cache_capacity == 0 {
        anyhow::bail!("db.cache_capacity must be > 0");
    }

    if config.sampling.max_value_chars == 0 {
        anyhow::bail!("sampling.max_value_chars must be > 0");
    }

    if config.lexical.max_ngram == 0 {
        anyhow::bail!("lexical.max_ngram must be > 0");
    }
    if config.lexical.threads == 0 {
        anyhow::bail!("lexical.threads must be > 0");
    }
    if config.lexical.batch_size == 0 {
        anyhow::bail!("lexical.batch_size must be > 0");
    }
    if !(0.0..=1.0).contains(&config.lexical.min_score) {
        anyhow::bail!("lexical.min_score must be in [0.0, 1.0]");
    }

    if config.cells.batch_size == 0 {
        anyhow::bail!("cells.batch_size must be > 0");
    }
    if config.skeleton.batch_size == 0 {
        anyhow::bail!("skeleton.batch_size must be > 0");
    }

    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(())
}
