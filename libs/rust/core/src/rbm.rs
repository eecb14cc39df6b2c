//! Bernoulli–Bernoulli restricted Boltzmann machine block trained with CD-k.
//!
//! All updates are closed-form and applied in place; there is no gradient tape.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;

use crate::error::{invalid_config, Result};

const INIT_STD: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct RbmBlock {
    /// Visible × hidden.
    pub weights: Array2<f64>,
    pub visible_bias: Array1<f64>,
    pub hidden_bias: Array1<f64>,
    gibbs_steps: usize,
}

/// Statistics of one contrastive-divergence pass over a batch.
#[derive(Debug, Clone)]
pub struct CdSample {
    pub positive: Array2<f64>,
    pub negative: Array2<f64>,
    pub v0: Array2<f64>,
    pub vk: Array2<f64>,
    pub h0_prob: Array2<f64>,
    pub hk_prob: Array2<f64>,
}

impl RbmBlock {
    pub fn new<R: Rng + ?Sized>(visible: usize, hidden: usize, gibbs_steps: usize, rng: &mut R) -> Result<Self> {
        if visible == 0 || hidden == 0 {
            return Err(invalid_config(format!("block dimensions must be positive, got {visible}x{hidden}")));
        }
        if gibbs_steps == 0 { return Err(invalid_config("gibbs_steps must be >= 1")); }
        let normal = Normal::new(0.0, INIT_STD).map_err(|e| invalid_config(e.to_string()))?;
        Ok(Self {
            weights: Array2::random_using((visible, hidden), normal, rng),
            visible_bias: Array1::zeros(visible),
            hidden_bias: Array1::zeros(hidden),
            gibbs_steps,
        })
    }

    pub fn visible_dim(&self) -> usize { self.weights.nrows() }
    pub fn hidden_dim(&self) -> usize { self.weights.ncols() }
    pub fn gibbs_steps(&self) -> usize { self.gibbs_steps }

    /// p(h = 1 | v)
    pub fn hidden_probs(&self, v: ArrayView2<'_, f64>) -> Array2<f64> {
        (v.dot(&self.weights) + &self.hidden_bias).mapv_into(sigmoid)
    }

    /// p(v = 1 | h)
    pub fn visible_probs(&self, h: ArrayView2<'_, f64>) -> Array2<f64> {
        (h.dot(&self.weights.t()) + &self.visible_bias).mapv_into(sigmoid)
    }

    pub fn sample_hidden<R: Rng + ?Sized>(&self, v: ArrayView2<'_, f64>, rng: &mut R) -> (Array2<f64>, Array2<f64>) {
        let prob = self.hidden_probs(v);
        let sample = bernoulli(&prob, rng);
        (prob, sample)
    }

    pub fn sample_visible<R: Rng + ?Sized>(&self, h: ArrayView2<'_, f64>, rng: &mut R) -> (Array2<f64>, Array2<f64>) {
        let prob = self.visible_probs(h);
        let sample = bernoulli(&prob, rng);
        (prob, sample)
    }

    /// Positive phase from `v0`, then `k` rounds of h → v → h Gibbs sampling seeded from the sampled `h0`.
    pub fn contrastive_divergence<R: Rng + ?Sized>(&self, v0: ArrayView2<'_, f64>, rng: &mut R) -> CdSample {
        let (h0_prob, h0_sample) = self.sample_hidden(v0, rng);
        let positive = v0.t().dot(&h0_prob);

        let mut hk = h0_sample;
        let mut vk = v0.to_owned();
        let mut hk_prob = h0_prob.clone();
        for _ in 0..self.gibbs_steps {
            let (_, v_sample) = self.sample_visible(hk.view(), rng);
            vk = v_sample;
            let (prob, sample) = self.sample_hidden(vk.view(), rng);
            hk_prob = prob;
            hk = sample;
        }
        let negative = vk.t().dot(&hk_prob);
        CdSample { positive, negative, v0: v0.to_owned(), vk, h0_prob, hk_prob }
    }

    /// Apply the CD update for one batch and return its mean squared reconstruction error.
    pub fn apply_update(&mut self, cd: &CdSample, learning_rate: f64) -> f64 {
        let batch = cd.v0.nrows().max(1) as f64;
        self.weights.scaled_add(learning_rate / batch, &(&cd.positive - &cd.negative));
        let dv = &cd.v0 - &cd.vk;
        if let Some(mean) = dv.mean_axis(Axis(0)) { self.visible_bias.scaled_add(learning_rate, &mean); }
        if let Some(mean) = (&cd.h0_prob - &cd.hk_prob).mean_axis(Axis(0)) { self.hidden_bias.scaled_add(learning_rate, &mean); }
        dv.mapv(|e| e * e).sum_axis(Axis(1)).mean().unwrap_or(0.0)
    }

    /// One CD-k step on `v0`: sample, update, report reconstruction error.
    pub fn train_batch<R: Rng + ?Sized>(&mut self, v0: ArrayView2<'_, f64>, learning_rate: f64, rng: &mut R) -> f64 {
        let cd = self.contrastive_divergence(v0, rng);
        self.apply_update(&cd, learning_rate)
    }

    pub fn num_params(&self) -> usize { self.weights.len() + self.visible_bias.len() + self.hidden_bias.len() }
}

pub(crate) fn sigmoid(x: f64) -> f64 { 1.0 / (1.0 + (-x).exp()) }

fn bernoulli<R: Rng + ?Sized>(prob: &Array2<f64>, rng: &mut R) -> Array2<f64> {
    prob.mapv(|p| if rng.gen::<f64>() < p { 1.0 } else { 0.0 })
}
