//! Multi-label quality metrics.
//!
//! Computed over `(ground truth, prediction)` label-set pairs. Micro scores
//! pool counts across samples; macro F1 averages per-label F1 over the whole
//! allowed set, so labels that never occur contribute 0.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::labels::AllowedLabelSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub samples: usize,
    pub precision: f64,
    pub recall: f64,
    pub micro_f1: f64,
    pub macro_f1: f64,
    /// False-negative rate: fn / (tp + fn).
    pub fnr: f64,
    /// Share of predicted labels that are wrong: fp / (tp + fp).
    pub hallucination_rate: f64,
    /// False positives per sample.
    pub over_prediction_rate: f64,
    /// Share of samples with an empty prediction.
    pub abstention_rate: f64,
    pub exact_match_rate: f64,
    /// Mean symmetric difference size per sample.
    pub hamming_loss: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    tp: usize,
    fp: usize,
    fn_: usize,
}

impl Counts {
    fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Score predictions against ground truth.
pub fn evaluate<T, P>(pairs: &[(T, P)], labels: &AllowedLabelSet) -> QualityReport
where
    T: AsRef<[String]>,
    P: AsRef<[String]>,
{
    let mut total = Counts::default();
    let mut per_label: BTreeMap<&str, Counts> =
        labels.iter().map(|l| (l, Counts::default())).collect();
    let mut exact = 0usize;
    let mut abstained = 0usize;
    let mut hamming = 0usize;

    for (truth, predicted) in pairs {
        let truth: BTreeSet<&str> = truth.as_ref().iter().map(String::as_str).collect();
        let predicted: BTreeSet<&str> = predicted.as_ref().iter().map(String::as_str).collect();

        let correct = truth.intersection(&predicted).count();
        total.tp += correct;
        total.fp += predicted.len() - correct;
        total.fn_ += truth.len() - correct;

        if predicted.is_empty() {
            abstained += 1;
        }
        if truth == predicted {
            exact += 1;
        }
        hamming += truth.union(&predicted).count() - correct;

        for (label, counts) in per_label.iter_mut() {
            match (truth.contains(label), predicted.contains(label)) {
                (true, true) => counts.tp += 1,
                (false, true) => counts.fp += 1,
                (true, false) => counts.fn_ += 1,
                (false, false) => {}
            }
        }
    }

    let n = pairs.len();
    let macro_f1 = if per_label.is_empty() {
        0.0
    } else {
        per_label.values().map(Counts::f1).sum::<f64>() / per_label.len() as f64
    };

    QualityReport {
        samples: n,
        precision: ratio(total.tp, total.tp + total.fp),
        recall: ratio(total.tp, total.tp + total.fn_),
        micro_f1: total.f1(),
        macro_f1,
        fnr: ratio(total.fn_, total.tp + total.fn_),
        hallucination_rate: ratio(total.fp, total.tp + total.fp),
        over_prediction_rate: ratio(total.fp, n),
        abstention_rate: ratio(abstained, n),
        exact_match_rate: ratio(exact, n),
        hamming_loss: ratio(hamming, n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_perfect_predictions() {
        let pairs = vec![(v(&["milk", "egg"]), v(&["egg", "milk"])), (v(&[]), v(&[]))];
        let r = evaluate(&pairs, &AllowedLabelSet::allergens());
        assert_eq!(r.precision, 1.0);
        assert_eq!(r.recall, 1.0);
        assert_eq!(r.micro_f1, 1.0);
        assert_eq!(r.exact_match_rate, 1.0);
        assert_eq!(r.hamming_loss, 0.0);
        assert_eq!(r.abstention_rate, 0.5);
    }

    #[test]
    fn test_mixed_counts() {
        // tp=1 (milk), fp=1 (soy), fn=1 (wheat); second sample abstains with fn=1 (egg).
        let pairs = vec![
            (v(&["milk", "wheat"]), v(&["milk", "soy"])),
            (v(&["egg"]), v(&[])),
        ];
        let r = evaluate(&pairs, &AllowedLabelSet::allergens());
        assert_eq!(r.samples, 2);
        assert!((r.precision - 0.5).abs() < 1e-9);
        assert!((r.recall - 1.0 / 3.0).abs() < 1e-9);
        assert!((r.micro_f1 - 2.0 / 5.0).abs() < 1e-9);
        assert!((r.fnr - 2.0 / 3.0).abs() < 1e-9);
        assert!((r.hallucination_rate - 0.5).abs() < 1e-9);
        assert!((r.over_prediction_rate - 0.5).abs() < 1e-9);
        assert!((r.abstention_rate - 0.5).abs() < 1e-9);
        assert_eq!(r.exact_match_rate, 0.0);
        // |{milk,wheat,soy}| - 1 = 2, plus |{egg}| - 0 = 1.
        assert!((r.hamming_loss - 1.5).abs() < 1e-9);
        // Only milk has F1 = 1; eight other labels score 0.
        assert!((r.macro_f1 - 1.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input_is_all_zero() {
        let pairs: Vec<(Vec<String>, Vec<String>)> = Vec::new();
        assert_eq!(evaluate(&pairs, &AllowedLabelSet::allergens()), QualityReport::default());
    }
}
