//! Runtime configuration for allergen-bridge.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! The decoding knobs that used to be literals at the call site (context
//! window, thread count, token budget, sampler) live here with their defaults.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "allergen-bridge", about = "On-device LLM allergen detection bridge")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json", global = true)]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one prompt through the model and print the boundary string.
    Infer(InferArgs),

    /// Run a labeled dataset through the model and print quality/efficiency.
    Bench(BenchArgs),

    /// Serve the bridge over local HTTP.
    Serve(ServeArgs),

    /// Summarize a benchmark records file, one summary per model.
    Report(ReportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InferArgs {
    /// Path to the GGUF model file.
    #[arg(short, long)]
    pub model: PathBuf,

    /// Raw prompt text, sent as-is.
    #[arg(long, conflicts_with = "ingredients", required_unless_present = "ingredients")]
    pub prompt: Option<String>,

    /// Ingredient list; wrapped in the standard allergen prompt.
    #[arg(long)]
    pub ingredients: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    /// Path to the GGUF model file.
    #[arg(short, long)]
    pub model: PathBuf,

    /// Dataset file: JSON array, JSON Lines, or `.csv` with a header row.
    #[arg(short, long)]
    pub dataset: PathBuf,

    /// Where to append per-item records (JSON Lines).
    #[arg(long)]
    pub records: Option<PathBuf>,

    /// Name recorded alongside each result; defaults to the model file stem.
    #[arg(long)]
    pub model_name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Default model used when a request does not name one.
    #[arg(short, long)]
    pub model: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    /// Records file written by `bench --records`.
    #[arg(short, long)]
    pub records: PathBuf,

    /// Also write the summaries as a CSV table, one row per model.
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("inference.{0} must be greater than zero")]
    Zero(&'static str),

    #[error("inference.max_tokens ({max_tokens}) must be smaller than inference.n_ctx ({n_ctx})")]
    BudgetExceedsContext { max_tokens: u32, n_ctx: u32 },

    #[error("labels.allowed must contain at least one label")]
    NoLabels,

    #[error("labels.allowed contains a blank label")]
    BlankLabel,

    #[error("labels.no_match_sentinel {0:?} collides with an allowed label")]
    SentinelIsLabel(String),

    #[error("labels.separator must not be empty")]
    EmptySeparator,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Decoding settings.
    pub inference: InferenceConfig,

    /// Model loading settings.
    pub model: ModelConfig,

    /// Label vocabulary and output formatting.
    pub labels: LabelConfig,

    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Sampling strategies the bridge recognizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Deterministic arg-max decoding.
    #[default]
    Greedy,
}

/// Decoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Context window in tokens.
    pub n_ctx: u32,

    /// Worker threads handed to the engine.
    pub n_threads: u32,

    /// Maximum number of sampled tokens per call.
    pub max_tokens: u32,

    /// Extra token slots reserved beyond the prompt's byte length.
    pub prompt_token_slack: usize,

    /// Sampling strategy.
    pub sampling: SamplingMode,

    /// Prepend the BOS token when tokenizing.
    pub add_bos: bool,

    /// Check the GGUF header before handing the file to the engine.
    pub verify_model_header: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            n_ctx: 512,
            n_threads: 4,
            max_tokens: 64,
            prompt_token_slack: 8,
            sampling: SamplingMode::Greedy,
            add_bos: true,
            verify_model_header: true,
        }
    }
}

/// Model-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of layers to offload to a GPU (0 = CPU only).
    pub n_gpu_layers: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { n_gpu_layers: 0 }
    }
}

/// Label vocabulary and result formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Labels the filter may emit.
    pub allowed: Vec<String>,

    /// Returned when no allowed label is found.
    pub no_match_sentinel: String,

    /// Joins multiple matched labels.
    pub separator: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            allowed: crate::labels::DEFAULT_ALLERGENS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            no_match_sentinel: crate::labels::NO_MATCH.to_string(),
            separator: ",".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:8080").
    pub listen: String,

    /// Model used when a request omits `model_path`.
    pub model_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            model_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine or the filter cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let inf = &self.inference;
        if inf.n_ctx == 0 {
            return Err(ConfigError::Zero("n_ctx"));
        }
        if inf.n_threads == 0 {
            return Err(ConfigError::Zero("n_threads"));
        }
        if inf.max_tokens == 0 {
            return Err(ConfigError::Zero("max_tokens"));
        }
        if inf.max_tokens >= inf.n_ctx {
            return Err(ConfigError::BudgetExceedsContext {
                max_tokens: inf.max_tokens,
                n_ctx: inf.n_ctx,
            });
        }

        let labels = &self.labels;
        if labels.allowed.is_empty() {
            return Err(ConfigError::NoLabels);
        }
        if labels.allowed.iter().any(|l| l.trim().is_empty()) {
            return Err(ConfigError::BlankLabel);
        }
        if labels
            .allowed
            .iter()
            .any(|l| l.eq_ignore_ascii_case(&labels.no_match_sentinel))
        {
            return Err(ConfigError::SentinelIsLabel(labels.no_match_sentinel.clone()));
        }
        if labels.separator.is_empty() {
            return Err(ConfigError::EmptySeparator);
        }
        Ok(())
    }
}
