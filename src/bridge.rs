//! Boundary wire format.
//!
//! Success: `<LABELS_OR_SENTINEL>|TTFT_MS=<int>;ITPS=<int>;OTPS=<int>;OET_MS=<int>`
//! Failure: `ERROR|<reason>` with no metrics suffix.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::inference::telemetry::{Timings, UNMEASURED};

pub const ERROR_TAG: &str = "ERROR";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("empty boundary string")]
    Empty,

    #[error("error tag without a reason")]
    MissingReason,
}

/// Everything the boundary call can return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BridgeResponse {
    Success { labels: String, timings: Timings },
    Failure { reason: String },
}

impl BridgeResponse {
    pub fn failure(reason: impl Into<String>) -> Self {
        BridgeResponse::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BridgeResponse::Success { .. })
    }

    /// Label field, or `None` for a failure.
    pub fn labels(&self) -> Option<&str> {
        match self {
            BridgeResponse::Success { labels, .. } => Some(labels),
            BridgeResponse::Failure { .. } => None,
        }
    }
}

impl fmt::Display for BridgeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeResponse::Success { labels, timings } => write!(
                f,
                "{labels}|TTFT_MS={};ITPS={};OTPS={};OET_MS={}",
                timings.ttft_ms, timings.itps, timings.otps, timings.oet_ms
            ),
            BridgeResponse::Failure { reason } => write!(f, "{ERROR_TAG}|{reason}"),
        }
    }
}

/// Reads one `KEY=value` field out of the metrics suffix; absent or
/// malformed values read as unmeasured.
fn metric(suffix: &str, key: &str) -> i64 {
    suffix
        .split(';')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| k.trim() == key)
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(UNMEASURED)
}

impl FromStr for BridgeResponse {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(WireError::Empty);
        }
        if let Some(reason) = s.strip_prefix(ERROR_TAG).and_then(|r| r.strip_prefix('|')) {
            if reason.is_empty() {
                return Err(WireError::MissingReason);
            }
            return Ok(BridgeResponse::failure(reason));
        }

        let (labels, timings) = match s.split_once('|') {
            Some((labels, suffix)) => (
                labels,
                Timings {
                    ttft_ms: metric(suffix, "TTFT_MS"),
                    itps: metric(suffix, "ITPS"),
                    otps: metric(suffix, "OTPS"),
                    oet_ms: metric(suffix, "OET_MS"),
                },
            ),
            None => (s, Timings::unmeasured()),
        };
        Ok(BridgeResponse::Success {
            labels: labels.to_string(),
            timings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_format() {
        let resp = BridgeResponse::Success {
            labels: "peanut".to_string(),
            timings: Timings {
                ttft_ms: 250,
                itps: 40,
                otps: 50,
                oet_ms: 100,
            },
        };
        assert_eq!(resp.to_string(), "peanut|TTFT_MS=250;ITPS=40;OTPS=50;OET_MS=100");
    }

    #[test]
    fn test_failure_has_no_metrics() {
        let resp = BridgeResponse::failure("Model Load Failed");
        assert_eq!(resp.to_string(), "ERROR|Model Load Failed");
    }

    #[test]
    fn test_parse_rendered() {
        let line = "egg,milk|TTFT_MS=-1;ITPS=120;OTPS=-1;OET_MS=0";
        let parsed: BridgeResponse = line.parse().unwrap();
        assert_eq!(parsed.labels(), Some("egg,milk"));
        assert_eq!(parsed.to_string(), line);
    }

    #[test]
    fn test_parse_tolerates_missing_fields() {
        let parsed: BridgeResponse = "EMPTY|TTFT_MS=12;OTPS=abc".parse().unwrap();
        match parsed {
            BridgeResponse::Success { labels, timings } => {
                assert_eq!(labels, "EMPTY");
                assert_eq!(timings.ttft_ms, 12);
                assert_eq!(timings.itps, UNMEASURED);
                assert_eq!(timings.otps, UNMEASURED);
            }
            other => panic!("unexpected {other:?}"),
        }

        let bare: BridgeResponse = "soy".parse().unwrap();
        assert_eq!(bare.labels(), Some("soy"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "ERROR|Tokenize Failed".parse::<BridgeResponse>(),
            Ok(BridgeResponse::failure("Tokenize Failed"))
        );
        assert_eq!("ERROR|".parse::<BridgeResponse>(), Err(WireError::MissingReason));
        assert_eq!("".parse::<BridgeResponse>(), Err(WireError::Empty));
    }
}
