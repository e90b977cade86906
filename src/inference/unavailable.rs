//! Engine used when the crate is built without llama.cpp.
//!
//! Initialization always fails, so every call through the C ABI, the CLI or
//! the HTTP bridge reports `ERROR|Backend Init Failed` instead of an answer
//! no model produced.

use std::path::Path;

use tracing::error;

use crate::config::SamplingMode;
use crate::inference::llama_ffi::{
    ContextHandle, ContextParams, InferenceBackend, LlamaError, ModelHandle, ModelParams,
    TokenBatch, TokenId,
};

const REASON: &str = "built without the `llamacpp` feature";

#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

/// Never constructed.
pub enum NoModel {}

/// Never constructed.
pub enum NoContext {}

impl InferenceBackend for UnavailableBackend {
    type Model = NoModel;

    fn init(&self) -> Result<(), LlamaError> {
        error!("No inference engine: {REASON}");
        Err(LlamaError::BackendInit(REASON.to_string()))
    }

    fn load_model(&self, _path: &Path, _params: &ModelParams) -> Result<NoModel, LlamaError> {
        Err(LlamaError::BackendInit(REASON.to_string()))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

impl ModelHandle for NoModel {
    type Context<'m> = NoContext;

    fn new_context(&self, _params: &ContextParams) -> Result<NoContext, LlamaError> {
        match *self {}
    }

    fn n_vocab(&self) -> usize {
        match *self {}
    }

    fn tokenize(&self, _text: &str, _add_bos: bool, _capacity: usize) -> Result<Vec<TokenId>, LlamaError> {
        match *self {}
    }

    fn token_to_piece(&self, _token: TokenId) -> Vec<u8> {
        match *self {}
    }

    fn is_eog(&self, _token: TokenId) -> bool {
        match *self {}
    }
}

impl ContextHandle for NoContext {
    type Sampler = ();

    fn decode(&mut self, _batch: &TokenBatch) -> Result<(), LlamaError> {
        match *self {}
    }

    fn new_sampler(&self, _mode: SamplingMode) {
        match *self {}
    }

    fn sample(&mut self, _sampler: &mut ()) -> TokenId {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::inference::runner::{InferenceRequest, InferenceRunner};

    #[test]
    fn test_every_run_fails_at_init() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let runner = InferenceRunner::new(UnavailableBackend, Arc::new(Config::default()));
        let out = runner
            .respond(&InferenceRequest::new("Ingredients: peanut butter", file.path()))
            .to_string();
        assert_eq!(out, "ERROR|Backend Init Failed");
    }
}
