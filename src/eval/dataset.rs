//! Labeled food dataset.
//!
//! Accepts a JSON array of items, JSON Lines (one item per line, blank lines
//! ignored), or CSV with a header row naming the item fields. Files ending in
//! `.csv` are read as CSV.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::labels::LabelFilter;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid dataset JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid dataset CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// One food entry with its annotated allergens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoodItem {
    pub id: String,
    pub name: String,
    pub ingredients: String,

    /// Allergen statement as printed on the product.
    #[serde(default)]
    pub allergens_raw: String,

    /// Comma list of allowed labels the product contains.
    #[serde(default)]
    pub allergens_mapped: String,
}

impl FoodItem {
    /// Annotated labels, normalized the way predictions are.
    pub fn ground_truth(&self, filter: &LabelFilter) -> Vec<String> {
        filter.parse(&self.allergens_mapped)
    }
}

/// Parse dataset text.
pub fn parse_dataset(text: &str) -> Result<Vec<FoodItem>, DatasetError> {
    if text.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(text)?);
    }
    text.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l).map_err(|source| DatasetError::Line { line: i + 1, source })
        })
        .collect()
}

/// Parse CSV dataset text. Columns are matched by header name; the allergen
/// columns may be omitted.
pub fn parse_csv_dataset(text: &str) -> Result<Vec<FoodItem>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let items = reader.deserialize().collect::<Result<Vec<FoodItem>, _>>()?;
    Ok(items)
}

/// Load a dataset file.
pub fn load_dataset(path: &Path) -> Result<Vec<FoodItem>, DatasetError> {
    let text = std::fs::read_to_string(path)?;
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let items = if is_csv {
        parse_csv_dataset(&text)?
    } else {
        parse_dataset(&text)?
    };
    info!(path = %path.display(), items = items.len(), "Dataset loaded");
    Ok(items)
}
