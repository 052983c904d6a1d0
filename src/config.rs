use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::Strategy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory where persisted index files live.
    pub index_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EncoderConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EncoderConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
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

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub semantic_top_k: usize,
    #[serde(default = "default_top_k")]
    pub keyword_top_k: usize,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default = "default_fuzzy_limit")]
    pub fuzzy_limit: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub weights: WeightsConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_top_k: default_top_k(),
            keyword_top_k: default_top_k(),
            fuzzy_threshold: default_fuzzy_threshold(),
            fuzzy_limit: default_fuzzy_limit(),
            max_results: default_max_results(),
            weights: WeightsConfig::default(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_fuzzy_threshold() -> f64 {
    0.70
}
fn default_fuzzy_limit() -> usize {
    5
}
fn default_max_results() -> usize {
    20
}

/// Per-strategy score weights applied during rank fusion.
#[derive(Debug, Deserialize, Clone)]
pub struct WeightsConfig {
    #[serde(default = "default_weight_exact")]
    pub exact: f64,
    #[serde(default = "default_weight_semantic")]
    pub semantic: f64,
    #[serde(default = "default_weight_keyword")]
    pub keyword: f64,
    #[serde(default = "default_weight_fuzzy")]
    pub fuzzy: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            exact: default_weight_exact(),
            semantic: default_weight_semantic(),
            keyword: default_weight_keyword(),
            fuzzy: default_weight_fuzzy(),
        }
    }
}

impl WeightsConfig {
    pub fn for_strategy(&self, strategy: Strategy) -> f64 {
        match strategy {
            Strategy::Exact => self.exact,
            Strategy::Semantic => self.semantic,
            Strategy::Keyword => self.keyword,
            Strategy::Fuzzy => self.fuzzy,
        }
    }
}

fn default_weight_exact() -> f64 {
    1.0
}
fn default_weight_semantic() -> f64 {
    0.8
}
fn default_weight_keyword() -> f64 {
    0.7
}
fn default_weight_fuzzy() -> f64 {
    0.6
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Number of background build workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bound on queued build jobs.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Sparse vectorizer vocabulary cap.
    #[serde(default = "default_sparse_max_features")]
    pub sparse_max_features: usize,
    /// Sparse vectorizer n-gram upper bound (1 = unigrams only).
    #[serde(default = "default_sparse_ngram_max")]
    pub sparse_ngram_max: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            sparse_max_features: default_sparse_max_features(),
            sparse_ngram_max: default_sparse_ngram_max(),
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_queue_depth() -> usize {
    32
}
fn default_sparse_max_features() -> usize {
    10_000
}
fn default_sparse_ngram_max() -> usize {
    2
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.search.max_results < 1 {
        anyhow::bail!("search.max_results must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.search.fuzzy_threshold) {
        anyhow::bail!("search.fuzzy_threshold must be in [0.0, 1.0]");
    }
    if config.search.fuzzy_limit < 1 {
        anyhow::bail!("search.fuzzy_limit must be >= 1");
    }

    let w = &config.search.weights;
    for (name, value) in [
        ("exact", w.exact),
        ("semantic", w.semantic),
        ("keyword", w.keyword),
        ("fuzzy", w.fuzzy),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("search.weights.{} must be in [0.0, 1.0]", name);
        }
    }

    if config.build.workers < 1 {
        anyhow::bail!("build.workers must be >= 1");
    }
    if config.build.sparse_ngram_max < 1 {
        anyhow::bail!("build.sparse_ngram_max must be >= 1");
    }

    match config.encoder.provider.as_str() {
        "disabled" | "hash" | "openai" | "local" => {}
        other => anyhow::bail!(
            "Unknown encoder provider: '{}'. Must be disabled, hash, openai, or local.",
            other
        ),
    }

    if config.encoder.is_enabled() && config.encoder.provider == "openai" {
        if config.encoder.dims.is_none() || config.encoder.dims == Some(0) {
            anyhow::bail!(
                "encoder.dims must be > 0 when provider is '{}'",
                config.encoder.provider
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            db: DbConfig {
                path: PathBuf::from("scout.db"),
            },
            storage: StorageConfig {
                index_dir: PathBuf::from("indexes"),
            },
            encoder: EncoderConfig::default(),
            search: SearchConfig::default(),
            build: BuildConfig::default(),
        }
    }

    #[test]
    fn test_default_weights() {
        let w = WeightsConfig::default();
        assert_eq!(w.for_strategy(Strategy::Exact), 1.0);
        assert_eq!(w.for_strategy(Strategy::Semantic), 0.8);
        assert_eq!(w.for_strategy(Strategy::Keyword), 0.7);
        assert_eq!(w.for_strategy(Strategy::Fuzzy), 0.6);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = base_config();
        config.search.fuzzy_threshold = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut config = base_config();
        config.encoder.provider = "quantum".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(validate(&base_config()).is_ok());
    }
}
