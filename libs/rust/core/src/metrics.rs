//! Classification metrics for the evaluation split.

use serde::Serialize;

use crate::error::{invalid_param, Result};

/// `counts[actual][predicted]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn from_predictions(actual: &[usize], predicted: &[usize], num_classes: usize) -> Result<Self> {
        if actual.len() != predicted.len() {
            return Err(invalid_param(format!("{} labels but {} predictions", actual.len(), predicted.len())));
        }
        let mut counts = vec![vec![0; num_classes]; num_classes];
        for (&a, &p) in actual.iter().zip(predicted) {
            if a >= num_classes || p >= num_classes {
                return Err(invalid_param(format!("class pair ({a}, {p}) outside 0..{num_classes}")));
            }
            counts[a][p] += 1;
        }
        Ok(Self { counts })
    }

    pub fn num_classes(&self) -> usize { self.counts.len() }
    pub fn total(&self) -> usize { self.counts.iter().flatten().sum() }
    fn correct(&self) -> usize { (0..self.num_classes()).map(|c| self.counts[c][c]).sum() }

    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.correct() as f64 / n as f64,
        }
    }

    fn column_sum(&self, class: usize) -> usize { self.counts.iter().map(|row| row[class]).sum() }
    fn row_sum(&self, class: usize) -> usize { self.counts[class].iter().sum() }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub class: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub per_class: Vec<ClassMetrics>,
    pub macro_f1: f64,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    /// Undefined ratios (no predictions or no support for a class) are reported as 0.
    pub fn new(actual: &[usize], predicted: &[usize], num_classes: usize) -> Result<Self> {
        let confusion = ConfusionMatrix::from_predictions(actual, predicted, num_classes)?;
        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|c| {
                let tp = confusion.counts[c][c] as f64;
                let precision = ratio(tp, confusion.column_sum(c) as f64);
                let recall = ratio(tp, confusion.row_sum(c) as f64);
                let f1 = ratio(2.0 * precision * recall, precision + recall);
                ClassMetrics { class: c, precision, recall, f1, support: confusion.row_sum(c) }
            })
            .collect();
        let macro_f1 = if per_class.is_empty() { 0.0 } else { per_class.iter().map(|m| m.f1).sum::<f64>() / per_class.len() as f64 };
        Ok(Self { accuracy: confusion.accuracy(), per_class, macro_f1, confusion })
    }
}

fn ratio(num: f64, den: f64) -> f64 { if den > 0.0 { num / den } else { 0.0 } }
