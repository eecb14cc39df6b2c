//! Sparse feature-weighted fuzzy c-means.
//!
//! Alternates center, feature-weight and membership updates. Features whose
//! within-cluster dispersion is large receive a small inverse-dispersion
//! importance, which is then soft-thresholded by `lambda` so that noisy
//! features drop to exactly zero weight.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::ClusteringConfig;
use crate::error::{invalid_config, invalid_param, Result, SwarmTuneError};

const CENTER_EPS: f64 = 1e-10;
const DISPERSION_EPS: f64 = 1e-10;
const DISTANCE_FLOOR: f64 = 1e-10;

#[derive(Debug, Clone, Serialize)]
pub struct FitSummary {
    pub iterations: usize,
    pub converged: bool,
    /// Frobenius norm of the last membership change.
    pub final_delta: f64,
}

#[derive(Debug, Clone)]
struct Fitted {
    memberships: Array2<f64>,
    centers: Array2<f64>,
    weights: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct WeightedFuzzyClusterer {
    cfg: ClusteringConfig,
    fitted: Option<Fitted>,
}

impl WeightedFuzzyClusterer {
    pub fn new(cfg: ClusteringConfig) -> Result<Self> {
        if cfg.n_clusters == 0 { return Err(invalid_param("n_clusters must be >= 1")); }
        if !(cfg.m > 1.0) { return Err(invalid_param(format!("fuzziness m must be > 1, got {}", cfg.m))); }
        if !(cfg.epsilon > 0.0) { return Err(invalid_param("epsilon must be > 0")); }
        if cfg.max_iter == 0 { return Err(invalid_param("max_iter must be >= 1")); }
        if cfg.lambda < 0.0 { return Err(invalid_param("lambda must be >= 0")); }
        Ok(Self { cfg, fitted: None })
    }

    pub fn config(&self) -> &ClusteringConfig { &self.cfg }

    pub fn is_fitted(&self) -> bool { self.fitted.is_some() }

    /// Fit with an RNG seeded from `cfg.seed`.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>) -> Result<FitSummary> {
        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        self.fit_with_rng(x, &mut rng)
    }

    /// The RNG only drives the initial membership matrix.
    #[instrument(skip_all, fields(rows = x.nrows(), cols = x.ncols(), clusters = self.cfg.n_clusters))]
    pub fn fit_with_rng<R: Rng + ?Sized>(&mut self, x: ArrayView2<'_, f64>, rng: &mut R) -> Result<FitSummary> {
        let (n, d) = x.dim();
        let c = self.cfg.n_clusters;
        if n == 0 || d == 0 { return Err(invalid_param("cannot fit on an empty matrix")); }
        if n < c { return Err(invalid_param(format!("{n} samples cannot form {c} clusters"))); }

        let mut u = random_memberships(n, c, rng);
        let mut w = Array1::from_elem(d, 1.0 / d as f64);
        let mut v = Array2::zeros((c, d));
        let mut summary = FitSummary { iterations: 0, converged: false, final_delta: f64::INFINITY };

        for iter in 1..=self.cfg.max_iter {
            let um = u.mapv(|p| p.powf(self.cfg.m));
            v = update_centers(x, &um);
            let dispersion = feature_dispersion(x, &um, &v);
            w = soft_threshold_weights(&dispersion, self.cfg.lambda);
            let d2 = weighted_sq_distances(x, &v, &w);
            let next = memberships_from_distances(&d2, self.cfg.m);
            let delta = (&next - &u).mapv(|e| e * e).sum().sqrt();
            u = next;
            summary.iterations = iter;
            summary.final_delta = delta;
            debug!(iter, delta, "fuzzy c-means iteration");
            if delta < self.cfg.epsilon {
                summary.converged = true;
                break;
            }
        }

        debug!(?summary, weights = ?w.to_vec(), "clusterer fitted");
        self.fitted = Some(Fitted { memberships: u, centers: v, weights: w });
        Ok(summary)
    }

    /// Hard assignment to the nearest center under the fitted feature weights.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Vec<usize>> {
        let f = self.fitted_for(x, "predict")?;
        let d2 = weighted_sq_distances(x, &f.centers, &f.weights);
        Ok(d2.rows().into_iter().map(|row| argmin(row)).collect())
    }

    /// Soft memberships of new rows against the fitted centers.
    pub fn predict_memberships(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let f = self.fitted_for(x, "predict_memberships")?;
        Ok(memberships_from_distances(&weighted_sq_distances(x, &f.centers, &f.weights), self.cfg.m))
    }

    /// Indices whose weight exceeds `threshold`; all indices when none do.
    pub fn get_selected_features(&self, threshold: f64) -> Result<Vec<usize>> {
        let w = &self.fitted.as_ref().ok_or(SwarmTuneError::NotFitted("get_selected_features"))?.weights;
        let selected: Vec<usize> = w.iter().enumerate().filter(|(_, &wk)| wk > threshold).map(|(k, _)| k).collect();
        if selected.is_empty() {
            warn!(threshold, features = w.len(), "no feature weight above threshold, keeping all features");
            return Ok((0..w.len()).collect());
        }
        Ok(selected)
    }

    pub fn weights(&self) -> Result<ArrayView1<'_, f64>> {
        Ok(self.fitted.as_ref().ok_or(SwarmTuneError::NotFitted("weights"))?.weights.view())
    }

    pub fn centers(&self) -> Result<ArrayView2<'_, f64>> {
        Ok(self.fitted.as_ref().ok_or(SwarmTuneError::NotFitted("centers"))?.centers.view())
    }

    /// Membership matrix of the training rows at the final iteration.
    pub fn memberships(&self) -> Result<ArrayView2<'_, f64>> {
        Ok(self.fitted.as_ref().ok_or(SwarmTuneError::NotFitted("memberships"))?.memberships.view())
    }

    fn fitted_for(&self, x: ArrayView2<'_, f64>, op: &'static str) -> Result<&Fitted> {
        let f = self.fitted.as_ref().ok_or(SwarmTuneError::NotFitted(op))?;
        if x.ncols() != f.weights.len() {
            return Err(invalid_config(format!("{op}: expected {} features, got {}", f.weights.len(), x.ncols())));
        }
        Ok(f)
    }
}

fn random_memberships<R: Rng + ?Sized>(n: usize, c: usize, rng: &mut R) -> Array2<f64> {
    let mut u = Array2::from_shape_simple_fn((n, c), || rng.gen::<f64>());
    for mut row in u.rows_mut() {
        let s = row.sum();
        if s > 0.0 { row /= s; } else { row.fill(1.0 / c as f64); }
    }
    u
}

fn update_centers(x: ArrayView2<'_, f64>, um: &Array2<f64>) -> Array2<f64> {
    let numerator = um.t().dot(&x);
    let denominator = (um.sum_axis(Axis(0)) + CENTER_EPS).insert_axis(Axis(1));
    numerator / &denominator
}

fn feature_dispersion(x: ArrayView2<'_, f64>, um: &Array2<f64>, v: &Array2<f64>) -> Array1<f64> {
    let mut r = Array1::zeros(x.ncols());
    for (xi, umi) in x.rows().into_iter().zip(um.rows()) {
        for (vc, &weight) in v.rows().into_iter().zip(umi.iter()) {
            for ((rk, &xk), &vk) in r.iter_mut().zip(xi.iter()).zip(vc.iter()) {
                let diff = xk - vk;
                *rk += weight * diff * diff;
            }
        }
    }
    r
}

/// Inverse dispersion, soft-thresholded and normalised. Resets to uniform when everything is thresholded away.
fn soft_threshold_weights(dispersion: &Array1<f64>, lambda: f64) -> Array1<f64> {
    let raw = dispersion.mapv(|r| (1.0 / (r + DISPERSION_EPS) - lambda).max(0.0));
    let total = raw.sum();
    if total == 0.0 {
        return Array1::from_elem(raw.len(), 1.0 / raw.len() as f64);
    }
    raw / total
}

fn weighted_sq_distances(x: ArrayView2<'_, f64>, v: &Array2<f64>, w: &Array1<f64>) -> Array2<f64> {
    let mut d2 = Array2::zeros((x.nrows(), v.nrows()));
    for (xi, mut out) in x.rows().into_iter().zip(d2.rows_mut()) {
        for (vc, slot) in v.rows().into_iter().zip(out.iter_mut()) {
            let dist: f64 = xi.iter().zip(vc.iter()).zip(w.iter()).map(|((&a, &b), &wk)| wk * (a - b) * (a - b)).sum();
            *slot = dist.max(DISTANCE_FLOOR);
        }
    }
    d2
}

fn memberships_from_distances(d2: &Array2<f64>, m: f64) -> Array2<f64> {
    let exponent = 1.0 / (m - 1.0);
    let mut u = Array2::zeros(d2.dim());
    for (di, mut ui) in d2.rows().into_iter().zip(u.rows_mut()) {
        for (c, slot) in ui.iter_mut().enumerate() {
            let s: f64 = di.iter().map(|&dj| (di[c] / dj).powf(exponent)).sum();
            *slot = 1.0 / s;
        }
    }
    u
}

fn argmin(row: ArrayView1<'_, f64>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &val)| if val < best.1 { (i, val) } else { best })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_blobs() -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(3);
        Array2::from_shape_fn((40, 2), |(i, _)| {
            let center = if i < 20 { -2.0 } else { 2.0 };
            center + rng.gen_range(-0.3..0.3)
        })
    }

    fn cfg(n_clusters: usize) -> ClusteringConfig { ClusteringConfig { n_clusters, lambda: 0.0, ..Default::default() } }

    #[test]
    fn membership_rows_and_weights_are_distributions() {
        let x = two_blobs();
        let mut fcm = WeightedFuzzyClusterer::new(cfg(2)).unwrap();
        fcm.fit(x.view()).unwrap();
        for row in fcm.memberships().unwrap().rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
            assert!(row.iter().all(|&p| p >= 0.0));
        }
        let w = fcm.weights().unwrap();
        assert!(w.iter().all(|&wk| wk >= 0.0));
        assert!((w.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn separated_blobs_are_split() {
        let x = two_blobs();
        let mut fcm = WeightedFuzzyClusterer::new(cfg(2)).unwrap();
        let summary = fcm.fit(x.view()).unwrap();
        assert!(summary.converged, "{summary:?}");
        let labels = fcm.predict(x.view()).unwrap();
        assert!(labels[..20].iter().all(|&l| l == labels[0]));
        assert!(labels[20..].iter().all(|&l| l == labels[20]));
        assert_ne!(labels[0], labels[20]);
    }

    #[test]
    fn predicted_memberships_favour_nearest_center() {
        let x = two_blobs();
        let mut fcm = WeightedFuzzyClusterer::new(cfg(2)).unwrap();
        fcm.fit(x.view()).unwrap();
        let probe = array![[-2.0, -2.0], [2.0, 2.0]];
        let u = fcm.predict_memberships(probe.view()).unwrap();
        let hard = fcm.predict(probe.view()).unwrap();
        for (row, &label) in u.rows().into_iter().zip(&hard) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
            assert!(row[label] > 0.9);
        }
    }

    #[test]
    fn huge_lambda_resets_weights_to_uniform() {
        let x = two_blobs();
        let mut fcm = WeightedFuzzyClusterer::new(ClusteringConfig { lambda: 1e12, ..cfg(2) }).unwrap();
        fcm.fit(x.view()).unwrap();
        assert_eq!(fcm.weights().unwrap().to_vec(), vec![0.5, 0.5]);
        // every weight equals the threshold, so selection falls back to all features
        assert_eq!(fcm.get_selected_features(0.5).unwrap(), vec![0, 1]);
    }

    #[test]
    fn accessors_require_fit() {
        let fcm = WeightedFuzzyClusterer::new(cfg(2)).unwrap();
        assert!(matches!(fcm.predict(two_blobs().view()), Err(SwarmTuneError::NotFitted(_))));
        assert!(matches!(fcm.get_selected_features(0.1), Err(SwarmTuneError::NotFitted(_))));
    }

    #[test]
    fn fuzziness_of_one_is_rejected() {
        let err = WeightedFuzzyClusterer::new(ClusteringConfig { m: 1.0, ..Default::default() }).unwrap_err();
        assert!(matches!(err, SwarmTuneError::InvalidParameter(_)));
    }

    #[test]
    fn predict_checks_width() {
        let mut fcm = WeightedFuzzyClusterer::new(cfg(2)).unwrap();
        fcm.fit(two_blobs().view()).unwrap();
        assert!(matches!(fcm.predict(Array2::zeros((2, 3)).view()), Err(SwarmTuneError::InvalidConfiguration(_))));
    }

    #[test]
    fn same_seed_same_fit() {
        let x = two_blobs();
        let mut a = WeightedFuzzyClusterer::new(cfg(2)).unwrap();
        let mut b = WeightedFuzzyClusterer::new(cfg(2)).unwrap();
        a.fit(x.view()).unwrap();
        b.fit(x.view()).unwrap();
        assert_eq!(a.memberships().unwrap(), b.memberships().unwrap());
    }
}
