//! LLM inference.
//!
//! - [`runner`]: Single-turn inference orchestrator
//! - [`llama_ffi`]: Engine seam over the llama.cpp lifecycle
//! - [`llama_cpp`]: llama.cpp engine (feature `llamacpp`)
//! - [`scripted`]: Deterministic in-process engine for tests
//! - [`unavailable`]: Engine that refuses to run (builds without `llamacpp`)
//! - [`model_loader`]: GGUF model file pre-flight
//! - [`telemetry`]: Phase timings and derived throughput metrics

#[cfg(feature = "llamacpp")]
pub mod llama_cpp;
pub mod llama_ffi;
pub mod model_loader;
pub mod runner;
pub mod scripted;
pub mod telemetry;
pub mod unavailable;

/// Engine used by the binary and the C ABI.
#[cfg(feature = "llamacpp")]
pub type DefaultBackend = llama_cpp::LlamaCppBackend;

/// Engine used by the binary and the C ABI.
#[cfg(not(feature = "llamacpp"))]
pub type DefaultBackend = unavailable::UnavailableBackend;
