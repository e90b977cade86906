//! Dataset benchmark.
//!
//! Each item is wrapped in the standard prompt, sent through the runner, and
//! recorded with its latency and telemetry. Records can be appended to a JSON
//! Lines file and summarized later, grouped by model, as JSON or as a CSV
//! table with one row per model.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::bridge::BridgeResponse;
use crate::eval::dataset::FoodItem;
use crate::eval::memory::MemorySample;
use crate::eval::quality::{evaluate, QualityReport};
use crate::inference::llama_ffi::InferenceBackend;
use crate::inference::runner::{InferenceRequest, InferenceRunner};
use crate::inference::telemetry::UNMEASURED;
use crate::labels::LabelFilter;
use crate::prompt::build_prompt;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("records line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Outcome of one dataset item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub model_name: String,
    pub data_id: String,
    pub food_name: String,
    pub ingredients: String,
    pub raw_allergens: String,
    pub mapped_allergens: String,
    /// Label field as returned, or the sentinel when the call failed.
    pub predicted_allergens: String,
    /// Failure reason, if the call returned `ERROR|…`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    pub ttft_ms: i64,
    pub itps: i64,
    pub otps: i64,
    pub oet_ms: i64,

    /// Process memory right after the call, KiB.
    #[serde(default = "unmeasured")]
    pub rss_kb: i64,
    #[serde(default = "unmeasured")]
    pub native_heap_kb: i64,
    #[serde(default = "unmeasured")]
    pub pss_kb: i64,

    pub timestamp_ms: u64,
}

fn unmeasured() -> i64 {
    UNMEASURED
}

/// Mean of the strictly positive values of each efficiency metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EfficiencySummary {
    pub avg_latency_ms: f64,
    pub avg_ttft_ms: f64,
    pub avg_itps: f64,
    pub avg_otps: f64,
    pub avg_oet_ms: f64,
    /// Average latency plus average output time.
    pub avg_total_ms: f64,
    pub avg_rss_kb: f64,
    pub avg_native_heap_kb: f64,
    pub avg_pss_kb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub model_name: String,
    pub items: usize,
    pub errors: usize,
    pub quality: QualityReport,
    pub efficiency: EfficiencySummary,
}

fn positive_mean(values: impl Iterator<Item = i64>) -> f64 {
    let (sum, n) = values
        .filter(|&v| v > 0)
        .fold((0f64, 0usize), |(s, n), v| (s + v as f64, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

impl EfficiencySummary {
    pub fn from_records(records: &[BenchmarkRecord]) -> Self {
        let avg_latency_ms = positive_mean(records.iter().map(|r| r.latency_ms as i64));
        let avg_oet_ms = positive_mean(records.iter().map(|r| r.oet_ms));
        Self {
            avg_latency_ms,
            avg_ttft_ms: positive_mean(records.iter().map(|r| r.ttft_ms)),
            avg_itps: positive_mean(records.iter().map(|r| r.itps)),
            avg_otps: positive_mean(records.iter().map(|r| r.otps)),
            avg_oet_ms,
            avg_total_ms: avg_latency_ms + avg_oet_ms,
            avg_rss_kb: positive_mean(records.iter().map(|r| r.rss_kb)),
            avg_native_heap_kb: positive_mean(records.iter().map(|r| r.native_heap_kb)),
            avg_pss_kb: positive_mean(records.iter().map(|r| r.pss_kb)),
        }
    }
}

impl BenchmarkSummary {
    /// Summarize records that all belong to one model.
    pub fn from_records(model_name: &str, records: &[BenchmarkRecord], filter: &LabelFilter) -> Self {
        let pairs: Vec<(Vec<String>, Vec<String>)> = records
            .iter()
            .map(|r| (filter.parse(&r.mapped_allergens), filter.parse(&r.predicted_allergens)))
            .collect();
        Self {
            model_name: model_name.to_string(),
            items: records.len(),
            errors: records.iter().filter(|r| r.error.is_some()).count(),
            quality: evaluate(&pairs, filter.labels()),
            efficiency: EfficiencySummary::from_records(records),
        }
    }
}

/// One summary per model name, in name order.
pub fn summarize_by_model(records: &[BenchmarkRecord], filter: &LabelFilter) -> Vec<BenchmarkSummary> {
    let mut grouped: BTreeMap<&str, Vec<BenchmarkRecord>> = BTreeMap::new();
    for r in records {
        grouped.entry(r.model_name.as_str()).or_default().push(r.clone());
    }
    grouped
        .into_iter()
        .map(|(name, recs)| BenchmarkSummary::from_records(name, &recs, filter))
        .collect()
}

/// Column order of the per-model summary table.
pub const SUMMARY_CSV_HEADER: [&str; 20] = [
    "Model",
    "Precision(%)",
    "Recall(%)",
    "MicroF1",
    "MacroF1",
    "ExactMatch(%)",
    "HammingLoss",
    "FNR(%)",
    "HallucinationRate(%)",
    "OverPredictionRate(%)",
    "AbstentionRate(%)",
    "LatencyMs",
    "TTFTms",
    "ITPS",
    "OTPS",
    "OETms",
    "TotalTimeMs",
    "RssKB",
    "NativeHeapKB",
    "PSSKB",
];

impl BenchmarkSummary {
    /// One table row, aligned with [`SUMMARY_CSV_HEADER`]. Rates are percentages.
    pub fn csv_row(&self) -> Vec<String> {
        let q = &self.quality;
        let e = &self.efficiency;
        let mut row = vec![self.model_name.clone()];
        row.extend(
            [
                q.precision * 100.0,
                q.recall * 100.0,
                q.micro_f1,
                q.macro_f1,
                q.exact_match_rate * 100.0,
                q.hamming_loss,
                q.fnr * 100.0,
                q.hallucination_rate * 100.0,
                q.over_prediction_rate * 100.0,
                q.abstention_rate * 100.0,
                e.avg_latency_ms,
                e.avg_ttft_ms,
                e.avg_itps,
                e.avg_otps,
                e.avg_oet_ms,
                e.avg_total_ms,
                e.avg_rss_kb,
                e.avg_native_heap_kb,
                e.avg_pss_kb,
            ]
            .iter()
            .map(|v| v.to_string()),
        );
        row
    }
}

/// Write per-model summaries as CSV, header first.
pub fn write_summary_csv<W: io::Write>(summaries: &[BenchmarkSummary], writer: W) -> Result<(), BenchError> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(SUMMARY_CSV_HEADER)?;
    for summary in summaries {
        out.write_record(summary.csv_row())?;
    }
    out.flush()?;
    Ok(())
}

/// Read a JSON Lines record file.
pub fn load_records(path: &Path) -> Result<Vec<BenchmarkRecord>, BenchError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .map_err(|source| BenchError::Line { line: i + 1, source })?;
        records.push(record);
    }
    Ok(records)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Runs a dataset through one model.
pub struct BenchmarkRunner<'a, B> {
    runner: &'a InferenceRunner<B>,
    model_path: PathBuf,
    model_name: String,
    sink: Option<BufWriter<File>>,
}

impl<'a, B: InferenceBackend> BenchmarkRunner<'a, B> {
    pub fn new(runner: &'a InferenceRunner<B>, model_path: impl Into<PathBuf>) -> Self {
        let model_path = model_path.into();
        let model_name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        Self {
            runner,
            model_path,
            model_name,
            sink: None,
        }
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    /// Append every record to `path` as JSON Lines.
    pub fn with_records(mut self, path: &Path) -> Result<Self, BenchError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.sink = Some(BufWriter::new(file));
        Ok(self)
    }

    /// Run one item.
    pub fn run_item(&self, item: &FoodItem) -> BenchmarkRecord {
        let filter = self.runner.filter();
        let prompt = build_prompt(&item.ingredients, filter);
        let request = InferenceRequest::new(prompt, &self.model_path);

        let start = Instant::now();
        let response = self.runner.respond(&request);
        let latency_ms = (start.elapsed().as_millis() as u64).max(1);
        let memory = MemorySample::current();

        let (predicted, error, timings) = match response {
            BridgeResponse::Success { labels, timings } => (labels, None, timings),
            BridgeResponse::Failure { reason } => {
                warn!(item = %item.id, reason = %reason, "Benchmark item failed");
                (filter.sentinel().to_string(), Some(reason), Default::default())
            }
        };

        BenchmarkRecord {
            model_name: self.model_name.clone(),
            data_id: item.id.clone(),
            food_name: item.name.clone(),
            ingredients: item.ingredients.clone(),
            raw_allergens: item.allergens_raw.clone(),
            mapped_allergens: item.allergens_mapped.clone(),
            predicted_allergens: predicted,
            error,
            latency_ms,
            ttft_ms: timings.ttft_ms,
            itps: timings.itps,
            otps: timings.otps,
            oet_ms: timings.oet_ms,
            rss_kb: memory.rss_kb,
            native_heap_kb: memory.native_heap_kb,
            pss_kb: memory.pss_kb,
            timestamp_ms: now_ms(),
        }
    }

    /// Run every item, writing records as they complete.
    pub fn run(&mut self, items: &[FoodItem]) -> Result<(Vec<BenchmarkRecord>, BenchmarkSummary), BenchError> {
        let mut records = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let record = self.run_item(item);
            if let Some(sink) = self.sink.as_mut() {
                serde_json::to_writer(&mut *sink, &record)?;
                sink.write_all(b"\n")?;
            }
            info!(
                item = i + 1,
                total = items.len(),
                food = %record.food_name,
                predicted = %record.predicted_allergens,
                latency_ms = record.latency_ms,
                "Benchmark item done"
            );
            records.push(record);
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.flush()?;
        }

        let summary = BenchmarkSummary::from_records(&self.model_name, &records, self.runner.filter());
        info!(
            model = %summary.model_name,
            items = summary.items,
            errors = summary.errors,
            micro_f1 = summary.quality.micro_f1,
            "Benchmark complete"
        );
        Ok((records, summary))
    }
}
