//! Batch loss functions used as swarm fitness.

use ndarray::{ArrayView1, ArrayView2};

/// Pure mapping from a logits batch and its labels to a scalar; lower is better.
pub trait LossFunction: Sync {
    fn loss(&self, logits: ArrayView2<'_, f64>, labels: &[usize]) -> f64;
}

impl<F> LossFunction for F
where
    F: Fn(ArrayView2<'_, f64>, &[usize]) -> f64 + Sync,
{
    fn loss(&self, logits: ArrayView2<'_, f64>, labels: &[usize]) -> f64 { self(logits, labels) }
}

/// Mean softmax cross-entropy. A label outside the logit width scores `+inf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl LossFunction for CrossEntropyLoss {
    fn loss(&self, logits: ArrayView2<'_, f64>, labels: &[usize]) -> f64 {
        if labels.is_empty() { return 0.0; }
        let total: f64 = logits
            .rows()
            .into_iter()
            .zip(labels)
            .map(|(row, &label)| if label < row.len() { log_sum_exp(row) - row[label] } else { f64::INFINITY })
            .sum();
        total / labels.len() as f64
    }
}

fn log_sum_exp(row: ArrayView1<'_, f64>) -> f64 {
    let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() { return max; }
    max + row.iter().map(|&x| (x - max).exp()).sum::<f64>().ln()
}

pub fn softmax(v: &mut [f64]) {
    if v.is_empty() { return; }
    let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for x in v.iter_mut() { *x = (*x - max).exp(); sum += *x; }
    if sum > 0.0 { for x in v.iter_mut() { *x /= sum; } }
}
