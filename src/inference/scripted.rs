//! Deterministic in-process engine.
//!
//! Plays back a fixed reply one whitespace-delimited piece per sampled token,
//! with optional failure injection at each lifecycle step. Every handle it
//! hands out is recorded in a [`ResourceLedger`] so callers can check that
//! models, contexts and samplers are released exactly once.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::debug;

use crate::config::SamplingMode;
use crate::inference::llama_ffi::{
    ContextHandle, ContextParams, InferenceBackend, LlamaError, ModelHandle, ModelParams,
    TokenBatch, TokenId,
};

pub const BOS_TOKEN: TokenId = 1;
pub const EOG_TOKEN: TokenId = 2;
/// Emitted once the reply is exhausted and EOG is disabled.
pub const FILLER_TOKEN: TokenId = 99;
const REPLY_BASE: TokenId = 100;
const PROMPT_BASE: TokenId = 10_000;

/// Counts of handle acquisitions and releases.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    backend_inits: AtomicUsize,
    models_loaded: AtomicUsize,
    models_freed: AtomicUsize,
    contexts_created: AtomicUsize,
    contexts_freed: AtomicUsize,
    samplers_created: AtomicUsize,
    samplers_freed: AtomicUsize,
    decode_calls: AtomicUsize,
}

/// Point-in-time copy of a [`ResourceLedger`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub backend_inits: usize,
    pub models_loaded: usize,
    pub models_freed: usize,
    pub contexts_created: usize,
    pub contexts_freed: usize,
    pub samplers_created: usize,
    pub samplers_freed: usize,
    pub decode_calls: usize,
}

impl LedgerSnapshot {
    /// Every acquired handle has been released.
    pub fn balanced(&self) -> bool {
        self.models_loaded == self.models_freed
            && self.contexts_created == self.contexts_freed
            && self.samplers_created == self.samplers_freed
    }
}

impl ResourceLedger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            backend_inits: self.backend_inits.load(Ordering::SeqCst),
            models_loaded: self.models_loaded.load(Ordering::SeqCst),
            models_freed: self.models_freed.load(Ordering::SeqCst),
            contexts_created: self.contexts_created.load(Ordering::SeqCst),
            contexts_freed: self.contexts_freed.load(Ordering::SeqCst),
            samplers_created: self.samplers_created.load(Ordering::SeqCst),
            samplers_freed: self.samplers_freed.load(Ordering::SeqCst),
            decode_calls: self.decode_calls.load(Ordering::SeqCst),
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// What the scripted engine generates and where it fails.
#[derive(Debug, Clone)]
pub struct Script {
    reply: String,
    emit_eog: bool,
    fail_backend: bool,
    fail_context: bool,
    fail_prefill: bool,
    fail_feed_at: Option<usize>,
    decode_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self::reply("EMPTY")
    }
}

impl Script {
    /// Generate `text`, then an end-of-generation token.
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: text.into(),
            emit_eog: true,
            fail_backend: false,
            fail_context: false,
            fail_prefill: false,
            fail_feed_at: None,
            decode_delay: Duration::ZERO,
        }
    }

    /// Never emit EOG; after the reply, keep producing filler tokens.
    pub fn without_eog(mut self) -> Self {
        self.emit_eog = false;
        self
    }

    pub fn fail_backend(mut self) -> Self {
        self.fail_backend = true;
        self
    }

    pub fn fail_context(mut self) -> Self {
        self.fail_context = true;
        self
    }

    pub fn fail_prefill(mut self) -> Self {
        self.fail_prefill = true;
        self
    }

    /// Fail the `n`th single-token decode after prefill (1-based).
    pub fn fail_feed_at(mut self, n: usize) -> Self {
        self.fail_feed_at = Some(n);
        self
    }

    /// Sleep this long inside every decode call.
    pub fn decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    fn pieces(&self) -> Vec<Vec<u8>> {
        self.reply
            .split_inclusive(' ')
            .map(|p| p.as_bytes().to_vec())
            .collect()
    }
}

/// Engine that replays a [`Script`].
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Script,
    ledger: Arc<ResourceLedger>,
    initialized: OnceLock<Result<(), LlamaError>>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            ledger: Arc::new(ResourceLedger::default()),
            initialized: OnceLock::new(),
        }
    }

    pub fn ledger(&self) -> Arc<ResourceLedger> {
        self.ledger.clone()
    }
}

impl InferenceBackend for ScriptedBackend {
    type Model = ScriptedModel;

    fn init(&self) -> Result<(), LlamaError> {
        self.initialized
            .get_or_init(|| {
                ResourceLedger::bump(&self.ledger.backend_inits);
                if self.script.fail_backend {
                    Err(LlamaError::BackendInit("scripted backend failure".to_string()))
                } else {
                    Ok(())
                }
            })
            .clone()
    }

    fn load_model(&self, path: &Path, _params: &ModelParams) -> Result<ScriptedModel, LlamaError> {
        let meta = std::fs::metadata(path)
            .map_err(|e| LlamaError::ModelLoadFailed(format!("{}: {e}", path.display())))?;
        if !meta.is_file() {
            return Err(LlamaError::ModelLoadFailed(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        ResourceLedger::bump(&self.ledger.models_loaded);
        debug!(path = %path.display(), "Scripted model loaded");
        Ok(ScriptedModel {
            script: self.script.clone(),
            pieces: self.script.pieces(),
            ledger: self.ledger.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct ScriptedModel {
    script: Script,
    pieces: Vec<Vec<u8>>,
    ledger: Arc<ResourceLedger>,
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        ResourceLedger::bump(&self.ledger.models_freed);
    }
}

impl ModelHandle for ScriptedModel {
    type Context<'m> = ScriptedContext<'m>;

    fn new_context(&self, params: &ContextParams) -> Result<ScriptedContext<'_>, LlamaError> {
        if self.script.fail_context {
            return Err(LlamaError::ContextFailed(format!(
                "cannot allocate {} token window",
                params.n_ctx
            )));
        }
        ResourceLedger::bump(&self.ledger.contexts_created);
        Ok(ScriptedContext {
            model: self,
            n_ctx: params.n_ctx as i32,
            pos: 0,
            cursor: 0,
            feeds: 0,
        })
    }

    fn n_vocab(&self) -> usize {
        (REPLY_BASE as usize) + self.pieces.len()
    }

    fn tokenize(&self, text: &str, add_bos: bool, capacity: usize) -> Result<Vec<TokenId>, LlamaError> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }
        let mut tokens = Vec::with_capacity(words.len() + 1);
        if add_bos {
            tokens.push(BOS_TOKEN);
        }
        tokens.extend((0..words.len()).map(|i| PROMPT_BASE + i as TokenId));
        if tokens.len() > capacity {
            return Err(LlamaError::TokenizeFailed(format!(
                "{} tokens exceed buffer of {capacity}",
                tokens.len()
            )));
        }
        Ok(tokens)
    }

    fn token_to_piece(&self, token: TokenId) -> Vec<u8> {
        if token == FILLER_TOKEN {
            return b".".to_vec();
        }
        usize::try_from(token - REPLY_BASE)
            .ok()
            .and_then(|i| self.pieces.get(i))
            .cloned()
            .unwrap_or_default()
    }

    fn is_eog(&self, token: TokenId) -> bool {
        token == EOG_TOKEN
    }
}

pub struct ScriptedContext<'m> {
    model: &'m ScriptedModel,
    n_ctx: i32,
    pos: i32,
    cursor: usize,
    feeds: usize,
}

impl Drop for ScriptedContext<'_> {
    fn drop(&mut self) {
        ResourceLedger::bump(&self.model.ledger.contexts_freed);
    }
}

pub struct ScriptedSampler {
    pub mode: SamplingMode,
    ledger: Arc<ResourceLedger>,
}

impl Drop for ScriptedSampler {
    fn drop(&mut self) {
        ResourceLedger::bump(&self.ledger.samplers_freed);
    }
}

impl ContextHandle for ScriptedContext<'_> {
    type Sampler = ScriptedSampler;

    fn decode(&mut self, batch: &TokenBatch) -> Result<(), LlamaError> {
        ResourceLedger::bump(&self.model.ledger.decode_calls);
        let script = &self.model.script;
        if !script.decode_delay.is_zero() {
            std::thread::sleep(script.decode_delay);
        }

        let prefill = self.pos == 0;
        if prefill && script.fail_prefill {
            return Err(LlamaError::DecodeFailed("scripted prefill failure".to_string()));
        }
        if !prefill {
            self.feeds += 1;
            if script.fail_feed_at == Some(self.feeds) {
                return Err(LlamaError::DecodeFailed(format!(
                    "scripted failure on feed {}",
                    self.feeds
                )));
            }
        }
        if batch.end_pos() > self.n_ctx {
            return Err(LlamaError::DecodeFailed(format!(
                "position {} exceeds context window {}",
                batch.end_pos(),
                self.n_ctx
            )));
        }
        self.pos = batch.end_pos();
        Ok(())
    }

    fn new_sampler(&self, mode: SamplingMode) -> ScriptedSampler {
        ResourceLedger::bump(&self.model.ledger.samplers_created);
        ScriptedSampler {
            mode,
            ledger: self.model.ledger.clone(),
        }
    }

    fn sample(&mut self, _sampler: &mut ScriptedSampler) -> TokenId {
        if self.cursor < self.model.pieces.len() {
            self.cursor += 1;
            REPLY_BASE + (self.cursor - 1) as TokenId
        } else if self.model.script.emit_eog {
            EOG_TOKEN
        } else {
            FILLER_TOKEN
        }
    }
}
