//! Prometheus metrics for the HTTP bridge.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::inference::runner::{InferenceError, InferenceResult};

/// Counters and histograms exposed on `/metrics`.
pub struct BridgeMetrics {
    registry: Registry,
    requests: IntCounterVec,
    ttft_ms: Histogram,
    generated_tokens: IntCounter,
}

fn outcome(result: &Result<InferenceResult, InferenceError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(InferenceError::Backend(_)) => "backend_init",
        Err(InferenceError::ModelLoad(_)) => "model_load",
        Err(InferenceError::ContextInit(_)) => "context_init",
        Err(InferenceError::Tokenize(_)) => "tokenize",
        Err(InferenceError::Prefill(_)) => "prefill",
    }
}

impl BridgeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("allergen_bridge_requests_total", "Inference requests by outcome"),
            &["outcome"],
        )?;
        let ttft_ms = Histogram::with_opts(
            HistogramOpts::new("allergen_bridge_ttft_ms", "Time to first token in milliseconds")
                .buckets(vec![50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]),
        )?;
        let generated_tokens = IntCounter::new(
            "allergen_bridge_generated_tokens_total",
            "Tokens produced across all requests",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(ttft_ms.clone()))?;
        registry.register(Box::new(generated_tokens.clone()))?;

        Ok(Self {
            registry,
            requests,
            ttft_ms,
            generated_tokens,
        })
    }

    /// Record one finished request.
    pub fn observe(&self, result: &Result<InferenceResult, InferenceError>) {
        self.requests.with_label_values(&[outcome(result)]).inc();
        if let Ok(r) = result {
            self.generated_tokens.inc_by(r.generated_tokens as u64);
            if r.timings.ttft_ms >= 0 {
                self.ttft_ms.observe(r.timings.ttft_ms as f64);
            }
        }
    }

    /// Prometheus text exposition.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
