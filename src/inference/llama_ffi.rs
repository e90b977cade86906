//! Engine seam over the llama.cpp lifecycle.
//!
//! The runner drives an engine through these traits:
//! backend init → model load → context → tokenize → decode → sample → free.
//! Handles release their native resources on `Drop`, so every exit path of a
//! run frees the sampler, the context and the model exactly once.
//!
//! [`crate::inference::llama_cpp`] implements the traits on top of the
//! `llama-cpp-2` crate; [`crate::inference::scripted`] is a deterministic
//! in-process engine for tests and for builds without llama.cpp.

use std::path::Path;

use thiserror::Error;

use crate::config::{Config, SamplingMode};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlamaError {
    #[error("Backend initialization failed: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoadFailed(String),

    #[error("Context creation failed: {0}")]
    ContextFailed(String),

    #[error("Tokenization failed: {0}")]
    TokenizeFailed(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),
}

/// Token ID type.
pub type TokenId = i32;

/// Model parameters (mirrors llama_model_params).
#[derive(Debug, Clone)]
pub struct ModelParams {
    /// Number of layers to offload to a GPU.
    pub n_gpu_layers: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self { n_gpu_layers: 0 }
    }
}

impl From<&Config> for ModelParams {
    fn from(config: &Config) -> Self {
        Self {
            n_gpu_layers: config.model.n_gpu_layers,
        }
    }
}

/// Context parameters (mirrors llama_context_params).
#[derive(Debug, Clone)]
pub struct ContextParams {
    /// Context size in tokens.
    pub n_ctx: u32,

    /// Number of threads for computation.
    pub n_threads: u32,

    /// Largest batch the context must accept in one decode.
    pub n_batch: u32,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 512,
            n_threads: 4,
            n_batch: 512,
        }
    }
}

impl From<&Config> for ContextParams {
    fn from(config: &Config) -> Self {
        Self {
            n_ctx: config.inference.n_ctx,
            n_threads: config.inference.n_threads,
            n_batch: config.inference.n_ctx,
        }
    }
}

/// A decode batch for sequence 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBatch {
    tokens: Vec<TokenId>,
    start_pos: i32,
    logits: Vec<bool>,
}

impl TokenBatch {
    /// The whole prompt at positions `0..n`, with logits requested only for
    /// the final position.
    pub fn prompt(tokens: &[TokenId]) -> Self {
        let mut logits = vec![false; tokens.len()];
        if let Some(last) = logits.last_mut() {
            *last = true;
        }
        Self {
            tokens: tokens.to_vec(),
            start_pos: 0,
            logits,
        }
    }

    /// One sampled token fed back at `pos`.
    pub fn single(token: TokenId, pos: i32) -> Self {
        Self {
            tokens: vec![token],
            start_pos: pos,
            logits: vec![true],
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// `(token, position, wants_logits)` for every entry.
    pub fn entries(&self) -> impl Iterator<Item = (TokenId, i32, bool)> + '_ {
        self.tokens
            .iter()
            .zip(&self.logits)
            .enumerate()
            .map(move |(i, (&t, &l))| (t, self.start_pos + i as i32, l))
    }

    /// Position one past the last entry.
    pub fn end_pos(&self) -> i32 {
        self.start_pos + self.tokens.len() as i32
    }
}

/// Process-wide engine runtime.
pub trait InferenceBackend: Send + Sync {
    type Model: ModelHandle;

    /// Initialize the runtime. Must be idempotent: only the first call does work.
    fn init(&self) -> Result<(), LlamaError>;

    /// Load a model file.
    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model, LlamaError>;

    /// Short engine name for logs.
    fn name(&self) -> &'static str;
}

/// A loaded model together with its vocabulary.
pub trait ModelHandle {
    type Context<'m>: ContextHandle
    where
        Self: 'm;

    /// Create an inference context borrowing this model.
    fn new_context(&self, params: &ContextParams) -> Result<Self::Context<'_>, LlamaError>;

    /// Vocabulary size.
    fn n_vocab(&self) -> usize;

    /// Tokenize text. Returns an error if the result would not fit `capacity`.
    fn tokenize(&self, text: &str, add_bos: bool, capacity: usize) -> Result<Vec<TokenId>, LlamaError>;

    /// Raw bytes of one token's text. May be a partial UTF-8 sequence.
    fn token_to_piece(&self, token: TokenId) -> Vec<u8>;

    /// Whether the token ends generation.
    fn is_eog(&self, token: TokenId) -> bool;
}

/// A live inference context.
pub trait ContextHandle {
    type Sampler;

    /// Run the model over a batch.
    fn decode(&mut self, batch: &TokenBatch) -> Result<(), LlamaError>;

    /// Build a sampler for the given strategy.
    fn new_sampler(&self, mode: SamplingMode) -> Self::Sampler;

    /// Sample from the logits of the last decoded position.
    fn sample(&mut self, sampler: &mut Self::Sampler) -> TokenId;
}
