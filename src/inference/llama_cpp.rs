//! llama.cpp engine through the `llama-cpp-2` crate.
//!
//! Enable with the `llamacpp` feature flag. llama.cpp permits one backend per
//! process, so the backend lives in a process-wide `OnceLock` and every
//! [`LlamaCppBackend`] shares it.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::OnceLock;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use tracing::{debug, info};

use crate::config::SamplingMode;
use crate::inference::llama_ffi::{
    ContextHandle, ContextParams, InferenceBackend, LlamaError, ModelHandle, ModelParams,
    TokenBatch, TokenId,
};

/// Bytes reserved for a single token piece.
const PIECE_BUFFER: usize = 128;

static LLAMA_BACKEND: OnceLock<Result<LlamaBackend, String>> = OnceLock::new();

fn global_backend() -> Result<&'static LlamaBackend, LlamaError> {
    let result = LLAMA_BACKEND.get_or_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
        backend.void_logs();
        info!("llama.cpp backend initialized");
        Ok(backend)
    });
    match result {
        Ok(backend) => Ok(backend),
        Err(e) => Err(LlamaError::BackendInit(e.clone())),
    }
}

/// Handle to the process-wide llama.cpp runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct LlamaCppBackend;

impl InferenceBackend for LlamaCppBackend {
    type Model = LlamaCppModel;

    fn init(&self) -> Result<(), LlamaError> {
        global_backend().map(|_| ())
    }

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<LlamaCppModel, LlamaError> {
        let backend = global_backend()?;
        let model_params = LlamaModelParams::default().with_n_gpu_layers(params.n_gpu_layers);
        let model = LlamaModel::load_from_file(backend, path, &model_params)
            .map_err(|e| LlamaError::ModelLoadFailed(e.to_string()))?;
        Ok(LlamaCppModel { model })
    }

    fn name(&self) -> &'static str {
        "llama.cpp"
    }
}

pub struct LlamaCppModel {
    model: LlamaModel,
}

impl ModelHandle for LlamaCppModel {
    type Context<'m> = LlamaCppContext<'m>;

    fn new_context(&self, params: &ContextParams) -> Result<LlamaCppContext<'_>, LlamaError> {
        let backend = global_backend()?;
        let n_threads = params.n_threads as i32;
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(params.n_ctx))
            .with_n_batch(params.n_batch)
            .with_n_threads(n_threads)
            .with_n_threads_batch(n_threads);
        let ctx = self
            .model
            .new_context(backend, ctx_params)
            .map_err(|e| LlamaError::ContextFailed(e.to_string()))?;
        debug!(n_ctx = params.n_ctx, n_threads, "llama.cpp context created");
        Ok(LlamaCppContext { ctx })
    }

    fn n_vocab(&self) -> usize {
        self.model.n_vocab().max(0) as usize
    }

    fn tokenize(&self, text: &str, add_bos: bool, capacity: usize) -> Result<Vec<TokenId>, LlamaError> {
        let add_bos = if add_bos { AddBos::Always } else { AddBos::Never };
        let tokens = self
            .model
            .str_to_token(text, add_bos)
            .map_err(|e| LlamaError::TokenizeFailed(e.to_string()))?;
        if tokens.len() > capacity {
            return Err(LlamaError::TokenizeFailed(format!(
                "{} tokens exceed buffer of {capacity}",
                tokens.len()
            )));
        }
        Ok(tokens.into_iter().map(|t| t.0).collect())
    }

    fn token_to_piece(&self, token: TokenId) -> Vec<u8> {
        self.model
            .token_to_piece_bytes(LlamaToken(token), PIECE_BUFFER, true, None)
            .unwrap_or_default()
    }

    fn is_eog(&self, token: TokenId) -> bool {
        self.model.is_eog_token(LlamaToken(token))
    }
}

pub struct LlamaCppContext<'m> {
    ctx: LlamaContext<'m>,
}

impl ContextHandle for LlamaCppContext<'_> {
    type Sampler = LlamaSampler;

    fn decode(&mut self, batch: &TokenBatch) -> Result<(), LlamaError> {
        let mut llama_batch = LlamaBatch::new(batch.len().max(1), 1);
        for (token, pos, logits) in batch.entries() {
            llama_batch
                .add(LlamaToken(token), pos, &[0], logits)
                .map_err(|e| LlamaError::DecodeFailed(e.to_string()))?;
        }
        self.ctx
            .decode(&mut llama_batch)
            .map_err(|e| LlamaError::DecodeFailed(e.to_string()))
    }

    fn new_sampler(&self, mode: SamplingMode) -> LlamaSampler {
        match mode {
            SamplingMode::Greedy => LlamaSampler::greedy(),
        }
    }

    fn sample(&mut self, sampler: &mut LlamaSampler) -> TokenId {
        // -1 selects the last position that produced logits.
        sampler.sample(&self.ctx, -1).0
    }
}
