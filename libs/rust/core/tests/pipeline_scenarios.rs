use ndarray::{Array2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use swarmtune_core::{ClusteringConfig, DataSource, Dataset, InMemoryDataSource, LayerStack, Pipeline, PipelineConfig, WeightedFuzzyClusterer};

fn standardize(mut x: Array2<f64>) -> Array2<f64> {
    for mut col in x.columns_mut() {
        let mean = col.mean().unwrap_or(0.0);
        let std = col.std(0.0).max(1e-12);
        col.mapv_inplace(|v| (v - mean) / std);
    }
    x
}

/// 2 informative dims around three far-apart centers, then 3 wide-noise dims.
fn informative_and_noise(n: usize, seed: u64) -> (Array2<f64>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers = [(-5.0, -5.0), (5.0, -5.0), (0.0, 5.0)];
    let informative = Normal::new(0.0, 1.0).unwrap();
    let wide = Normal::new(0.0, 10.0).unwrap();
    let mut x = Array2::zeros((n, 5));
    let mut labels = Vec::with_capacity(n);
    for (i, mut row) in x.rows_mut().into_iter().enumerate() {
        let c = i % 3;
        row[0] = centers[c].0 + rng.sample(informative);
        row[1] = centers[c].1 + rng.sample(informative);
        for k in 2..5 { row[k] = rng.sample(wide); }
        labels.push(c);
    }
    (standardize(x), labels)
}

fn bimodal() -> Dataset {
    let x = Array2::from_shape_fn((100, 6), |(i, j)| if (i < 50) == (j < 3) { 1.0 } else { 0.0 });
    Dataset::new(x, (0..100).map(|i| usize::from(i >= 50)).collect()).unwrap()
}

#[test]
fn informative_features_outweigh_noise() {
    let (x, _) = informative_and_noise(200, 7);
    let cfg = ClusteringConfig { n_clusters: 3, m: 2.0, lambda: 0.001, max_iter: 50, ..Default::default() };
    let mut fcm = WeightedFuzzyClusterer::new(cfg).unwrap();
    fcm.fit(x.view()).unwrap();
    let w = fcm.weights().unwrap();
    let informative = (w[0] + w[1]) / 2.0;
    let noise = (w[2] + w[3] + w[4]) / 3.0;
    assert!(informative > noise, "weights {:?}", w.to_vec());
    assert!(!fcm.get_selected_features(0.01).unwrap().is_empty());
}

#[test]
fn pretraining_reduces_reconstruction_error_on_bimodal_data() {
    let data = bimodal();
    let seeds = 10u64;
    let mut improved = 0;
    for seed in 0..seeds {
        let mut rng = StdRng::seed_from_u64(seed);
        let source = InMemoryDataSource::shuffled(&data, 10, &mut rng).unwrap();
        let mut stack = LayerStack::new(6, &[4], 2, 1, &mut rng).unwrap();
        let report = stack.pretrain(&source, 5, 0.5, &mut rng).unwrap();
        let curve = &report.layers[0].reconstruction_errors;
        assert_eq!(curve.len(), 5);
        if curve[4] < curve[0] { improved += 1; }
    }
    assert!(improved * 10 >= seeds * 8, "only {improved}/{seeds} seeds improved");
}

#[test]
fn pretrained_stack_emits_finite_logits() {
    let data = bimodal();
    let mut rng = StdRng::seed_from_u64(21);
    let source = InMemoryDataSource::new(&data, 16).unwrap();
    let mut stack = LayerStack::new(6, &[4, 2], 2, 1, &mut rng).unwrap();
    stack.pretrain(&source, 3, 0.05, &mut rng).unwrap();
    let batch = &source.batches()[0];
    let logits = stack.forward(batch.features.view()).unwrap();
    assert_eq!(logits.dim(), (16, 2));
    assert!(logits.iter().all(|v| v.is_finite()));
}

#[test]
fn full_pipeline_produces_consistent_report() {
    let (x, labels) = informative_and_noise(90, 3);
    let two_class: Vec<usize> = labels.iter().map(|&c| usize::from(c == 2)).collect();
    let train = Dataset::new(x.slice_axis(Axis(0), (0..60).into()).to_owned(), two_class[..60].to_vec()).unwrap();
    let test = Dataset::new(x.slice_axis(Axis(0), (60..90).into()).to_owned(), two_class[60..].to_vec()).unwrap();

    let cfg = PipelineConfig::from_yaml_str(
        "stack:\n  hidden_dims: [6, 3]\npretrain:\n  epochs: 3\noptimizer:\n  population_size: 6\n  generations: 5\n",
    )
    .unwrap();
    let report = Pipeline::new(cfg).unwrap().run(&train, &test).unwrap();

    assert_eq!(report.optimizer_curve.len(), 5);
    assert!(report.optimizer_curve.windows(2).all(|w| w[1] <= w[0]));
    assert_eq!(report.evaluation.confusion.total(), 30);
    let n_sel = report.selected_features.len();
    let expected_params = (n_sel * 6 + n_sel + 6) + (6 * 3 + 6 + 3) + (3 * 2 + 2);
    assert_eq!(report.final_params.len(), expected_params);
    assert_eq!(report.pretraining.layers.len(), 2);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["run_id"].as_str().map(str::len), Some(36));
    assert!(json["evaluation"]["per_class"].is_array());
}

#[test]
fn noise_only_data_still_selects_features() {
    let mut rng = StdRng::seed_from_u64(5);
    let x = standardize(Array2::random_using((60, 4), Normal::new(0.0, 1.0).unwrap(), &mut rng));
    let cfg = ClusteringConfig { lambda: 1e6, ..Default::default() };
    let mut fcm = WeightedFuzzyClusterer::new(cfg).unwrap();
    fcm.fit(x.view()).unwrap();
    assert_eq!(fcm.get_selected_features(0.5).unwrap(), vec![0, 1, 2, 3]);
}
