//! Inference runner: one prompt in, filtered labels and telemetry out.
//!
//! A run drives the engine through its full lifecycle:
//! 1. Initialize the backend (once per process)
//! 2. Load the model and create a context
//! 3. Tokenize the prompt and prefill it as one batch
//! 4. Greedily sample up to the token budget, feeding each token back
//! 5. Filter the generated text against the allowed labels
//!
//! Engine handles are scoped locals; they drop in reverse order of
//! acquisition on every return path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bridge::BridgeResponse;
use crate::config::{Config, InferenceConfig};
use crate::inference::llama_ffi::{
    ContextHandle, ContextParams, InferenceBackend, LlamaError, ModelHandle, ModelParams,
    TokenBatch,
};
use crate::inference::model_loader;
use crate::inference::telemetry::{PhaseTimings, Timings};
use crate::labels::LabelFilter;

/// Terminal failures of a run. Each maps to a fixed boundary reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("backend initialization failed: {0}")]
    Backend(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("context initialization failed: {0}")]
    ContextInit(String),

    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("prompt decode failed: {0}")]
    Prefill(String),
}

impl InferenceError {
    /// Reason string carried after `ERROR|` on the boundary.
    pub fn reason(&self) -> &'static str {
        match self {
            InferenceError::Backend(_) => "Backend Init Failed",
            InferenceError::ModelLoad(_) => "Model Load Failed",
            InferenceError::ContextInit(_) => "Context Failed",
            InferenceError::Tokenize(_) => "Tokenize Failed",
            InferenceError::Prefill(_) => "Decode Failed",
        }
    }
}

/// One bridge call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub prompt: String,
    pub model_path: PathBuf,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            model_path: model_path.into(),
        }
    }
}

/// Why the sampling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfGeneration,
    TokenBudget,
    DecodeFailed,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
    /// Matched labels in filter order.
    pub labels: Vec<String>,

    /// Joined labels or the no-match sentinel.
    pub label_field: String,

    /// Text the model produced before filtering.
    pub raw_output: String,

    pub timings: Timings,
    pub stop_reason: StopReason,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
}

struct Generation {
    output: Vec<u8>,
    generated: usize,
    ttft: Option<Duration>,
    elapsed: Duration,
    stop_reason: StopReason,
}

/// Drives one engine through single-turn generation.
pub struct InferenceRunner<B> {
    backend: B,
    config: Arc<Config>,
    filter: LabelFilter,
}

impl<B: InferenceBackend> InferenceRunner<B> {
    pub fn new(backend: B, config: Arc<Config>) -> Self {
        let filter = LabelFilter::from_config(&config.labels);
        Self {
            backend,
            config,
            filter,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn filter(&self) -> &LabelFilter {
        &self.filter
    }

    /// Run a request. Every engine failure before generation is terminal.
    pub fn run(&self, request: &InferenceRequest) -> Result<InferenceResult, InferenceError> {
        let call_start = Instant::now();
        let cfg = &self.config.inference;
        let path = request.model_path.as_path();

        info!(
            engine = self.backend.name(),
            model = %path.display(),
            prompt_bytes = request.prompt.len(),
            "Starting inference"
        );

        self.backend
            .init()
            .map_err(|e| fail(InferenceError::Backend(e.to_string())))?;

        if cfg.verify_model_header {
            model_loader::inspect(path).map_err(|e| fail(InferenceError::ModelLoad(e.to_string())))?;
        }
        let model = self
            .backend
            .load_model(path, &ModelParams::from(&*self.config))
            .map_err(|e| fail(InferenceError::ModelLoad(e.to_string())))?;
        debug!(n_vocab = model.n_vocab(), "Vocabulary ready");

        let mut ctx = model
            .new_context(&ContextParams::from(&*self.config))
            .map_err(|e| fail(InferenceError::ContextInit(e.to_string())))?;

        let capacity = request.prompt.len() + cfg.prompt_token_slack;
        let tokens = model
            .tokenize(&request.prompt, cfg.add_bos, capacity)
            .map_err(|e| fail(InferenceError::Tokenize(e.to_string())))?;
        if tokens.is_empty() {
            return Err(fail(InferenceError::Tokenize(
                "prompt produced no tokens".to_string(),
            )));
        }

        let prefill_start = Instant::now();
        ctx.decode(&TokenBatch::prompt(&tokens))
            .map_err(|e: LlamaError| fail(InferenceError::Prefill(e.to_string())))?;
        let prefill = prefill_start.elapsed();

        let generation = generate(&model, &mut ctx, cfg, tokens.len(), call_start);

        let raw_output = String::from_utf8_lossy(&generation.output).into_owned();
        let labels = self.filter.matches(&raw_output);
        let label_field = self.filter.render(&labels);

        let timings = Timings::from_phases(&PhaseTimings {
            ttft: generation.ttft,
            prefill,
            generation: generation.elapsed,
            prompt_tokens: tokens.len(),
            generated_tokens: generation.generated,
        });

        info!(
            prompt_tokens = tokens.len(),
            generated = generation.generated,
            stop = ?generation.stop_reason,
            labels = %label_field,
            ttft_ms = timings.ttft_ms,
            otps = timings.otps,
            "Inference complete"
        );

        Ok(InferenceResult {
            labels,
            label_field,
            raw_output,
            timings,
            stop_reason: generation.stop_reason,
            prompt_tokens: tokens.len(),
            generated_tokens: generation.generated,
        })
    }

    /// Run a request and encode the outcome for the boundary. Never fails.
    pub fn respond(&self, request: &InferenceRequest) -> BridgeResponse {
        match self.run(request) {
            Ok(result) => BridgeResponse::Success {
                labels: result.label_field,
                timings: result.timings,
            },
            Err(e) => BridgeResponse::Failure {
                reason: e.reason().to_string(),
            },
        }
    }
}

fn fail(e: InferenceError) -> InferenceError {
    error!(reason = e.reason(), "{e}");
    e
}

/// Greedy sampling loop. A failed feed keeps what was generated so far.
fn generate<M, C>(
    model: &M,
    ctx: &mut C,
    cfg: &InferenceConfig,
    n_prompt: usize,
    call_start: Instant,
) -> Generation
where
    M: ModelHandle,
    C: ContextHandle,
{
    let mut sampler = ctx.new_sampler(cfg.sampling);
    let mut output = Vec::new();
    let mut generated = 0usize;
    let mut ttft = None;
    let mut pos = n_prompt as i32;
    let mut stop_reason = StopReason::TokenBudget;
    let budget = cfg.max_tokens as usize;

    let start = Instant::now();
    while generated < budget {
        let token = ctx.sample(&mut sampler);
        if model.is_eog(token) {
            stop_reason = StopReason::EndOfGeneration;
            break;
        }
        if ttft.is_none() {
            ttft = Some(call_start.elapsed());
        }
        output.extend_from_slice(&model.token_to_piece(token));
        generated += 1;

        // The final token's logits are never sampled.
        if generated == budget {
            break;
        }
        if let Err(e) = ctx.decode(&TokenBatch::single(token, pos)) {
            warn!(generated, "Generation stopped early: {e}");
            stop_reason = StopReason::DecodeFailed;
            break;
        }
        pos += 1;
    }

    Generation {
        output,
        generated,
        ttft,
        elapsed: start.elapsed(),
        stop_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::model_loader::ModelFileInfo;
    use crate::inference::scripted::{Script, ScriptedBackend};

    fn model_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("model.gguf");
        let header = ModelFileInfo {
            version: 3,
            tensor_count: 1,
            metadata_kv_count: 1,
            file_size: 0,
        }
        .header_bytes();
        std::fs::write(&path, header).unwrap();
        path
    }

    fn runner(script: Script) -> InferenceRunner<ScriptedBackend> {
        InferenceRunner::new(ScriptedBackend::new(script), Arc::new(Config::default()))
    }

    #[test]
    fn test_labels_from_generated_text() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(Script::reply("Peanut, Milk."));
        let result = runner
            .run(&InferenceRequest::new("ingredients: peanut butter", model_file(&dir)))
            .unwrap();
        assert_eq!(result.labels, vec!["milk", "peanut"]);
        assert_eq!(result.label_field, "milk,peanut");
        assert_eq!(result.stop_reason, StopReason::EndOfGeneration);
        assert_eq!(result.generated_tokens, 2);
        assert_eq!(result.prompt_tokens, 4);
    }

    #[test]
    fn test_error_reasons() {
        assert_eq!(InferenceError::ModelLoad(String::new()).reason(), "Model Load Failed");
        assert_eq!(InferenceError::ContextInit(String::new()).reason(), "Context Failed");
        assert_eq!(InferenceError::Tokenize(String::new()).reason(), "Tokenize Failed");
        assert_eq!(InferenceError::Prefill(String::new()).reason(), "Decode Failed");
    }

    #[test]
    fn test_header_check_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "not a model at all, just some text").unwrap();
        let err = runner(Script::default())
            .run(&InferenceRequest::new("milk", &path))
            .unwrap_err();
        assert!(matches!(err, InferenceError::ModelLoad(_)));
    }

    #[test]
    fn test_first_token_eog_leaves_ttft_unmeasured() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner(Script::reply(""))
            .run(&InferenceRequest::new("bread", model_file(&dir)))
            .unwrap();
        assert_eq!(result.generated_tokens, 0);
        assert_eq!(result.timings.ttft_ms, -1);
        assert_eq!(result.label_field, "EMPTY");
    }
}
