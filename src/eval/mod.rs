//! Offline evaluation.
//!
//! - [`dataset`]: Labeled food dataset loading (JSON, JSON Lines, CSV)
//! - [`memory`]: Process memory snapshots for benchmark records
//! - [`quality`]: Multi-label quality metrics
//! - [`bench`]: Dataset benchmark runner and record summaries

pub mod bench;
pub mod dataset;
pub mod memory;
pub mod quality;
