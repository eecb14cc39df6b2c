//! Labelled matrices and the batch source consumed by pretraining and fitness scoring.

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{invalid_config, invalid_param, Result};

/// Column-standardized features with one integer class label per row.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub features: Array2<f64>,
    pub labels: Vec<usize>,
}

impl Dataset {
    pub fn new(features: Array2<f64>, labels: Vec<usize>) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(invalid_config(format!("{} feature rows but {} labels", features.nrows(), labels.len())));
        }
        Ok(Self { features, labels })
    }

    pub fn len(&self) -> usize { self.labels.len() }
    pub fn is_empty(&self) -> bool { self.labels.is_empty() }
    pub fn num_features(&self) -> usize { self.features.ncols() }

    /// Keep only the given columns, in the given order.
    pub fn select_features(&self, indices: &[usize]) -> Result<Self> {
        Ok(Self { features: select_columns(self.features.view(), indices)?, labels: self.labels.clone() })
    }
}

pub fn select_columns(x: ArrayView2<'_, f64>, indices: &[usize]) -> Result<Array2<f64>> {
    if let Some(bad) = indices.iter().find(|&&i| i >= x.ncols()) {
        return Err(invalid_config(format!("feature index {bad} out of range for {} columns", x.ncols())));
    }
    Ok(x.select(Axis(1), indices))
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub features: Array2<f64>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize { self.labels.len() }
    pub fn is_empty(&self) -> bool { self.labels.is_empty() }
}

/// Anything that can hand out an ordered sequence of fixed-size batches.
///
/// Implementations must be `Sync` so candidate scoring can fan out across workers.
pub trait DataSource: Sync {
    fn batches(&self) -> &[Batch];

    fn num_batches(&self) -> usize { self.batches().len() }

    fn num_features(&self) -> Option<usize> { self.batches().first().map(|b| b.features.ncols()) }

    /// All batch features stacked back into one matrix.
    fn stacked_features(&self) -> Option<Array2<f64>> {
        let views: Vec<_> = self.batches().iter().map(|b| b.features.view()).collect();
        if views.is_empty() { return None; }
        concatenate(Axis(0), &views).ok()
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryDataSource {
    batches: Vec<Batch>,
    batch_size: usize,
}

impl InMemoryDataSource {
    /// Chunk the dataset in row order. The final batch may be short.
    pub fn new(data: &Dataset, batch_size: usize) -> Result<Self> {
        if batch_size == 0 { return Err(invalid_param("batch_size must be >= 1")); }
        let order: Vec<usize> = (0..data.len()).collect();
        Ok(Self::from_order(data, &order, batch_size))
    }

    /// Chunk the dataset after a row permutation drawn from `rng`.
    pub fn shuffled<R: Rng + ?Sized>(data: &Dataset, batch_size: usize, rng: &mut R) -> Result<Self> {
        if batch_size == 0 { return Err(invalid_param("batch_size must be >= 1")); }
        let mut order: Vec<usize> = (0..data.len()).collect();
        order.shuffle(rng);
        Ok(Self::from_order(data, &order, batch_size))
    }

    fn from_order(data: &Dataset, order: &[usize], batch_size: usize) -> Self {
        let batches = order
            .chunks(batch_size)
            .map(|rows| Batch {
                features: data.features.select(Axis(0), rows),
                labels: rows.iter().map(|&r| data.labels[r]).collect(),
            })
            .collect();
        Self { batches, batch_size }
    }

    pub fn batch_size(&self) -> usize { self.batch_size }
}

impl DataSource for InMemoryDataSource {
    fn batches(&self) -> &[Batch] { &self.batches }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn toy() -> Dataset {
        Dataset::new(array![[0.0, 1.0, 2.0], [3.0, 4.0, 5.0], [6.0, 7.0, 8.0], [9.0, 10.0, 11.0], [12.0, 13.0, 14.0]], vec![0, 1, 0, 1, 0]).unwrap()
    }

    #[test]
    fn chunks_keep_row_order_and_short_tail() {
        let src = InMemoryDataSource::new(&toy(), 2).unwrap();
        assert_eq!(src.num_batches(), 3);
        assert_eq!(src.batches()[2].len(), 1);
        assert_eq!(src.batches()[1].features[[0, 0]], 6.0);
        assert_eq!(src.stacked_features().unwrap(), toy().features);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        let src = InMemoryDataSource::shuffled(&toy(), 2, &mut rng).unwrap();
        let mut firsts: Vec<f64> = src.stacked_features().unwrap().column(0).to_vec();
        firsts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(firsts, vec![0.0, 3.0, 6.0, 9.0, 12.0]);
        for b in src.batches() {
            for (row, &label) in b.features.rows().into_iter().zip(&b.labels) {
                assert_eq!(label, ((row[0] / 3.0) as usize) % 2);
            }
        }
    }

    #[test]
    fn select_features_rejects_out_of_range() {
        assert!(toy().select_features(&[0, 3]).is_err());
        let sliced = toy().select_features(&[2, 0]).unwrap();
        assert_eq!(sliced.features.row(0).to_vec(), vec![2.0, 0.0]);
    }

    #[test]
    fn label_count_must_match_rows() {
        assert!(Dataset::new(Array2::zeros((3, 2)), vec![0, 1]).is_err());
    }

    #[test]
    fn zero_batch_size_rejected() {
        assert!(InMemoryDataSource::new(&toy(), 0).is_err());
    }
}
