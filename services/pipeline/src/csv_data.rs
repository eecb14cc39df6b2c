//! Minimal numeric CSV reader: every column is a feature except the last, which is the class label.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use ndarray::Array2;
use swarmtune_core::Dataset;

pub fn load_dataset(path: &Path) -> Result<Dataset> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_dataset(&text).with_context(|| format!("parsing {}", path.display()))
}

/// A first line that does not parse as numbers is treated as a header and skipped.
pub fn parse_dataset(text: &str) -> Result<Dataset> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()).peekable();
    if let Some((_, first)) = lines.peek() {
        if parse_row(first).is_err() { lines.next(); }
    }

    let mut values = Vec::new();
    let mut labels = Vec::new();
    let mut width: Option<usize> = None;
    for (idx, line) in lines {
        let row = parse_row(line).with_context(|| format!("line {}", idx + 1))?;
        let (label, features) = row.split_last().ok_or_else(|| anyhow!("line {}: empty row", idx + 1))?;
        match width {
            None => width = Some(features.len()),
            Some(w) if w != features.len() => bail!("line {}: expected {} features, found {}", idx + 1, w, features.len()),
            _ => {}
        }
        if label.fract() != 0.0 || *label < 0.0 { bail!("line {}: label {} is not a class index", idx + 1, label); }
        labels.push(*label as usize);
        values.extend_from_slice(features);
    }
    let width = width.unwrap_or(0);
    let features = Array2::from_shape_vec((labels.len(), width), values)?;
    Ok(Dataset::new(features, labels)?)
}

fn parse_row(line: &str) -> Result<Vec<f64>> {
    line.split(',').map(|cell| cell.trim().parse::<f64>().with_context(|| format!("bad number {cell:?}"))).collect()
}
