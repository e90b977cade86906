//! allergen-bridge: on-device LLM allergen detection.
//!
//! Runs a single-turn prompt through a local llama.cpp model, filters the
//! generated text down to a fixed allergen vocabulary, and reports generation
//! telemetry alongside the labels:
//!   prompt → tokenize → prefill → greedy decode → label filter → `labels|metrics`
//!
//! The same runner is reachable from a C ABI ([`ffi`]), the CLI, and a local
//! HTTP API ([`server`]).

pub mod bridge;
pub mod config;
pub mod eval;
pub mod ffi;
pub mod inference;
pub mod labels;
pub mod prompt;
pub mod server;
