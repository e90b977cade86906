//! Generation telemetry.
//!
//! The runner records raw phase durations; [`Timings::from_phases`] turns them
//! into the four integer metrics carried on the boundary string. `-1` marks a
//! metric that could not be measured.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const UNMEASURED: i64 = -1;

/// Raw measurements from one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Call start → first non-EOG token. `None` if none was produced.
    pub ttft: Option<Duration>,

    /// Prompt decode (prefill) wall time.
    pub prefill: Duration,

    /// Sampling loop wall time.
    pub generation: Duration,

    /// Tokens submitted during prefill.
    pub prompt_tokens: usize,

    /// Tokens appended to the output.
    pub generated_tokens: usize,
}

/// Metrics reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    /// Time to first token, ms.
    pub ttft_ms: i64,

    /// Input (prefill) tokens per second.
    pub itps: i64,

    /// Output tokens per second.
    pub otps: i64,

    /// Output elapsed time, ms.
    pub oet_ms: i64,
}

impl Default for Timings {
    fn default() -> Self {
        Self::unmeasured()
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// `count` per second over `elapsed_ms`, or -1 for a zero-length phase.
fn rate(count: usize, elapsed_ms: i64) -> i64 {
    if elapsed_ms > 0 {
        (count as i64).saturating_mul(1000) / elapsed_ms
    } else {
        UNMEASURED
    }
}

impl Timings {
    pub const fn unmeasured() -> Self {
        Self {
            ttft_ms: UNMEASURED,
            itps: UNMEASURED,
            otps: UNMEASURED,
            oet_ms: UNMEASURED,
        }
    }

    pub fn from_phases(phases: &PhaseTimings) -> Self {
        let prefill_ms = millis(phases.prefill);
        let gen_ms = millis(phases.generation);
        Self {
            ttft_ms: phases.ttft.map(millis).unwrap_or(UNMEASURED),
            itps: rate(phases.prompt_tokens, prefill_ms),
            otps: rate(phases.generated_tokens, gen_ms),
            oet_ms: gen_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_tokens_in_100ms() {
        let t = Timings::from_phases(&PhaseTimings {
            ttft: Some(Duration::from_millis(340)),
            prefill: Duration::from_millis(200),
            generation: Duration::from_millis(100),
            prompt_tokens: 10,
            generated_tokens: 5,
        });
        assert_eq!(t.ttft_ms, 340);
        assert_eq!(t.itps, 50);
        assert_eq!(t.otps, 50);
        assert_eq!(t.oet_ms, 100);
    }

    #[test]
    fn test_zero_length_phases_unmeasured() {
        let t = Timings::from_phases(&PhaseTimings {
            ttft: None,
            prefill: Duration::from_micros(300),
            generation: Duration::ZERO,
            prompt_tokens: 10,
            generated_tokens: 0,
        });
        assert_eq!(t.ttft_ms, UNMEASURED);
        assert_eq!(t.itps, UNMEASURED);
        assert_eq!(t.otps, UNMEASURED);
        assert_eq!(t.oet_ms, 0);
    }

    #[test]
    fn test_integer_division_truncates() {
        let t = Timings::from_phases(&PhaseTimings {
            ttft: Some(Duration::from_millis(12)),
            prefill: Duration::from_millis(3),
            generation: Duration::from_millis(7),
            prompt_tokens: 10,
            generated_tokens: 3,
        });
        assert_eq!(t.itps, 3333);
        assert_eq!(t.otps, 428);
    }
}
