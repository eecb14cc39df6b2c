//! Deep belief network: greedily pretrained RBM blocks followed by a linear head.

use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::StackConfig;
use crate::dataset::DataSource;
use crate::error::{invalid_config, invalid_param, Result, SwarmTuneError};
use crate::loss::softmax;
use crate::params::{ParamLayout, ParamSlot, ParameterVector};
use crate::rbm::RbmBlock;

/// Fully connected classification head, `logits = x · W + b`.
#[derive(Debug, Clone)]
pub struct LinearHead {
    /// Input × classes.
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl LinearHead {
    /// Uniform init in ±1/sqrt(fan_in).
    pub fn new<R: Rng + ?Sized>(input: usize, classes: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (input as f64).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        Self { weights: Array2::random_using((input, classes), dist, rng), bias: Array1::random_using(classes, dist, rng) }
    }

    pub fn forward(&self, x: ArrayView2<'_, f64>) -> Array2<f64> { x.dot(&self.weights) + &self.bias }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerCurve {
    pub layer: usize,
    /// Mean per-row squared reconstruction error, one entry per epoch.
    pub reconstruction_errors: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PretrainReport {
    pub layers: Vec<LayerCurve>,
}

#[derive(Debug, Clone)]
pub struct LayerStack {
    input_dim: usize,
    blocks: Vec<RbmBlock>,
    head: LinearHead,
    layout: ParamLayout,
}

impl LayerStack {
    pub fn new<R: Rng + ?Sized>(input_dim: usize, hidden_dims: &[usize], output_dim: usize, gibbs_steps: usize, rng: &mut R) -> Result<Self> {
        if input_dim == 0 { return Err(invalid_config("input_dim must be positive")); }
        if output_dim == 0 { return Err(invalid_config("output_dim must be positive")); }
        if hidden_dims.is_empty() { return Err(invalid_config("at least one hidden layer is required")); }
        if let Some(pos) = hidden_dims.iter().position(|&h| h == 0) {
            return Err(invalid_config(format!("hidden_dims[{pos}] must be positive")));
        }

        let mut blocks = Vec::with_capacity(hidden_dims.len());
        let mut prev = input_dim;
        for &h in hidden_dims {
            blocks.push(RbmBlock::new(prev, h, gibbs_steps, rng)?);
            prev = h;
        }
        let head = LinearHead::new(prev, output_dim, rng);
        let layout = build_layout(&blocks, &head);
        debug!(input_dim, ?hidden_dims, output_dim, params = layout.len(), "layer stack built");
        Ok(Self { input_dim, blocks, head, layout })
    }

    pub fn from_config(input_dim: usize, cfg: &StackConfig) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        Self::new(input_dim, &cfg.hidden_dims, cfg.output_dim, cfg.gibbs_steps, &mut rng)
    }

    pub fn input_dim(&self) -> usize { self.input_dim }
    pub fn output_dim(&self) -> usize { self.head.bias.len() }
    pub fn blocks(&self) -> &[RbmBlock] { &self.blocks }
    pub fn head(&self) -> &LinearHead { &self.head }
    pub fn layout(&self) -> &ParamLayout { &self.layout }
    pub fn num_params(&self) -> usize { self.layout.len() }

    /// Fails unless `width` matches the stack's input dimension.
    pub fn ensure_input_dim(&self, width: usize) -> Result<()> {
        if width != self.input_dim {
            return Err(invalid_config(format!("stack expects {} input features, got {width}", self.input_dim)));
        }
        Ok(())
    }

    /// Greedy layer-wise CD-k pretraining.
    ///
    /// Block `i` trains on hidden probabilities of the frozen blocks `0..i`; that
    /// propagated dataset is computed once per block. Rows are reshuffled every
    /// epoch and re-chunked to the source's batch size.
    #[instrument(skip_all, fields(blocks = self.blocks.len(), epochs = epochs, learning_rate = learning_rate))]
    pub fn pretrain<R: Rng + ?Sized>(&mut self, data: &dyn DataSource, epochs: usize, learning_rate: f64, rng: &mut R) -> Result<PretrainReport> {
        if epochs == 0 { return Err(invalid_param("epochs must be >= 1")); }
        if !(learning_rate > 0.0) { return Err(invalid_param(format!("learning_rate must be > 0, got {learning_rate}"))); }
        if data.batches().iter().all(|b| b.is_empty()) { return Err(SwarmTuneError::EmptyDataSource); }
        for batch in data.batches() { self.ensure_input_dim(batch.features.ncols())?; }

        let batch_size = data.batches().iter().map(|b| b.len()).max().unwrap_or(1);
        let n_blocks = self.blocks.len();
        let mut report = PretrainReport::default();
        for layer in 0..n_blocks {
            let propagated: Vec<Array2<f64>> = data
                .batches()
                .iter()
                .map(|b| self.blocks[..layer].iter().fold(b.features.clone(), |v, block| block.hidden_probs(v.view())))
                .collect();
            let views: Vec<_> = propagated.iter().map(|m| m.view()).collect();
            let rows = concatenate(Axis(0), &views).map_err(|e| invalid_config(e.to_string()))?;
            let block = &mut self.blocks[layer];
            let mut curve = LayerCurve { layer, reconstruction_errors: Vec::with_capacity(epochs) };
            for epoch in 1..=epochs {
                let batches = shuffled_chunks(rows.view(), batch_size, &mut *rng);
                let total: f64 = batches.iter().map(|v| block.train_batch(v.view(), learning_rate, &mut *rng)).sum();
                let err = total / batches.len() as f64;
                info!(layer = layer + 1, of = n_blocks, epoch, reconstruction_error = err, "pretraining epoch");
                curve.reconstruction_errors.push(err);
            }
            report.layers.push(curve);
        }
        Ok(report)
    }

    /// Deterministic hidden representation after the last block.
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.ensure_input_dim(x.ncols())?;
        Ok(self.blocks.iter().fold(x.to_owned(), |v, block| block.hidden_probs(v.view())))
    }

    /// Class logits; propagates probabilities (never samples) through every block.
    pub fn forward(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let hidden = self.transform(x)?;
        Ok(self.head.forward(hidden.view()))
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Vec<usize>> {
        let logits = self.forward(x)?;
        Ok(logits.rows().into_iter().map(|row| argmax(row)).collect())
    }

    /// Row-wise softmax of the logits.
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let mut logits = self.forward(x)?;
        for mut row in logits.rows_mut() {
            if let Some(slice) = row.as_slice_mut() { softmax(slice); }
        }
        Ok(logits)
    }

    pub fn flatten(&self) -> ParameterVector {
        let mut out = Vec::with_capacity(self.layout.len());
        for seg in self.layout.segments() {
            out.extend(self.slot_view(seg.slot).iter().copied());
        }
        Array1::from(out)
    }

    pub fn unflatten(&mut self, params: ArrayView1<'_, f64>) -> Result<()> {
        if params.len() != self.layout.len() {
            return Err(invalid_config(format!("parameter vector has length {}, stack needs {}", params.len(), self.layout.len())));
        }
        let segments = self.layout.segments().to_vec();
        for seg in segments {
            let src = params.slice(ndarray::s![seg.range()]);
            for (dst, &val) in self.slot_view_mut(seg.slot).iter_mut().zip(src.iter()) {
                *dst = val;
            }
        }
        Ok(())
    }

    fn slot_view(&self, slot: ParamSlot) -> ArrayViewD<'_, f64> {
        match slot {
            ParamSlot::BlockWeights(i) => self.blocks[i].weights.view().into_dyn(),
            ParamSlot::BlockVisibleBias(i) => self.blocks[i].visible_bias.view().into_dyn(),
            ParamSlot::BlockHiddenBias(i) => self.blocks[i].hidden_bias.view().into_dyn(),
            ParamSlot::HeadWeights => self.head.weights.view().into_dyn(),
            ParamSlot::HeadBias => self.head.bias.view().into_dyn(),
        }
    }

    fn slot_view_mut(&mut self, slot: ParamSlot) -> ArrayViewMutD<'_, f64> {
        match slot {
            ParamSlot::BlockWeights(i) => self.blocks[i].weights.view_mut().into_dyn(),
            ParamSlot::BlockVisibleBias(i) => self.blocks[i].visible_bias.view_mut().into_dyn(),
            ParamSlot::BlockHiddenBias(i) => self.blocks[i].hidden_bias.view_mut().into_dyn(),
            ParamSlot::HeadWeights => self.head.weights.view_mut().into_dyn(),
            ParamSlot::HeadBias => self.head.bias.view_mut().into_dyn(),
        }
    }
}

fn build_layout(blocks: &[RbmBlock], head: &LinearHead) -> ParamLayout {
    let mut layout = ParamLayout::default();
    for (i, b) in blocks.iter().enumerate() {
        layout.push(ParamSlot::BlockWeights(i), b.weights.len());
        layout.push(ParamSlot::BlockVisibleBias(i), b.visible_bias.len());
        layout.push(ParamSlot::BlockHiddenBias(i), b.hidden_bias.len());
    }
    layout.push(ParamSlot::HeadWeights, head.weights.len());
    layout.push(ParamSlot::HeadBias, head.bias.len());
    layout
}

/// Row permutation of `rows` cut into chunks of at most `batch_size`.
fn shuffled_chunks<R: Rng + ?Sized>(rows: ArrayView2<'_, f64>, batch_size: usize, rng: &mut R) -> Vec<Array2<f64>> {
    let mut order: Vec<usize> = (0..rows.nrows()).collect();
    order.shuffle(rng);
    order.chunks(batch_size.max(1)).map(|idx| rows.select(Axis(0), idx)).collect()
}

fn argmax(row: ArrayView1<'_, f64>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &val)| if val > best.1 { (i, val) } else { best })
        .0
}
