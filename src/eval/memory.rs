//! Process memory snapshot taken after each benchmark item.
//!
//! Read from procfs on Linux and Android: resident set and data segment from
//! `/proc/self/status`, proportional set size from `/proc/self/smaps_rollup`.
//! Anything that cannot be read is reported as -1, the same marker the
//! generation telemetry uses.

use serde::{Deserialize, Serialize};

use crate::inference::telemetry::UNMEASURED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    /// Resident set size (`VmRSS`), KiB.
    pub rss_kb: i64,

    /// Heap and data segment (`VmData`), KiB. Includes native allocations
    /// made by the engine.
    pub native_heap_kb: i64,

    /// Proportional set size (`Pss`), KiB.
    pub pss_kb: i64,
}

impl Default for MemorySample {
    fn default() -> Self {
        Self {
            rss_kb: UNMEASURED,
            native_heap_kb: UNMEASURED,
            pss_kb: UNMEASURED,
        }
    }
}

/// Value of a `Key:   1234 kB` line, in KiB.
fn kb_field(text: &str, key: &str) -> Option<i64> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim() == key)
        .and_then(|(_, v)| v.split_whitespace().next())
        .and_then(|n| n.parse().ok())
}

impl MemorySample {
    /// Build a sample from the text of `/proc/self/status` and
    /// `/proc/self/smaps_rollup`.
    pub fn parse(status: &str, smaps_rollup: &str) -> Self {
        Self {
            rss_kb: kb_field(status, "VmRSS").unwrap_or(UNMEASURED),
            native_heap_kb: kb_field(status, "VmData").unwrap_or(UNMEASURED),
            pss_kb: kb_field(smaps_rollup, "Pss").unwrap_or(UNMEASURED),
        }
    }

    /// Current process memory. All fields are -1 where procfs is absent.
    pub fn current() -> Self {
        let status = std::fs::read_to_string("/proc/self/status").unwrap_or_default();
        let rollup = std::fs::read_to_string("/proc/self/smaps_rollup").unwrap_or_default();
        Self::parse(&status, &rollup)
    }
}
