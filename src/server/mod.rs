//! Local HTTP bridge.
//!
//! - [`api`]: Request/response types and route handlers
//! - [`metrics`]: Prometheus counters for inference outcomes and latency

pub mod api;
pub mod metrics;
