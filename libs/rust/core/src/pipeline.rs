//! End-to-end orchestration: feature selection → layer-wise pretraining →
//! swarm fine-tuning → held-out evaluation.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::clustering::{FitSummary, WeightedFuzzyClusterer};
use crate::config::PipelineConfig;
use crate::dataset::{DataSource, Dataset, InMemoryDataSource};
use crate::error::{invalid_config, Result, SwarmTuneError};
use crate::loss::{CrossEntropyLoss, LossFunction};
use crate::metrics::ClassificationReport;
use crate::optimizer::PopulationSearchOptimizer;
use crate::stack::{LayerStack, PretrainReport};

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub config: PipelineConfig,
    pub clustering: FitSummary,
    pub feature_weights: Vec<f64>,
    pub selected_features: Vec<usize>,
    pub pretraining: PretrainReport,
    /// Best fitness after each generation.
    pub optimizer_curve: Vec<f64>,
    pub test_loss: Option<f64>,
    pub evaluation: ClassificationReport,
    pub final_params: Vec<f64>,
    pub completed_at: DateTime<Utc>,
}

pub struct Pipeline {
    cfg: PipelineConfig,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &PipelineConfig { &self.cfg }

    /// Fit everything on `train` and score the tuned stack on `test`.
    pub fn run(&self, train: &Dataset, test: &Dataset) -> Result<PipelineReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id, train_rows = train.len(), test_rows = test.len());
        let _guard = span.enter();
        self.check_inputs(train, test)?;

        let mut clusterer = WeightedFuzzyClusterer::new(self.cfg.clustering.clone())?;
        let clustering = clusterer.fit(train.features.view())?;
        let feature_weights = clusterer.weights()?.to_vec();
        let selected_features = clusterer.get_selected_features(self.cfg.selection.threshold)?;
        info!(selected = selected_features.len(), total = train.num_features(), "features selected");

        let train_sel = train.select_features(&selected_features)?;
        let test_sel = test.select_features(&selected_features)?;
        let batch_size = self.cfg.data.batch_size;
        let train_source = if self.cfg.data.shuffle_train {
            let mut rng = StdRng::seed_from_u64(self.cfg.data.seed);
            InMemoryDataSource::shuffled(&train_sel, batch_size, &mut rng)?
        } else {
            InMemoryDataSource::new(&train_sel, batch_size)?
        };
        let test_source = InMemoryDataSource::new(&test_sel, batch_size)?;

        let mut stack = LayerStack::from_config(selected_features.len(), &self.cfg.stack)?;
        let mut pretrain_rng = StdRng::seed_from_u64(self.cfg.stack.seed.wrapping_add(1));
        let pretraining = stack.pretrain(&train_source, self.cfg.pretrain.epochs, self.cfg.pretrain.learning_rate, &mut pretrain_rng)?;

        let mut optimizer = PopulationSearchOptimizer::new(stack, self.cfg.optimizer.clone())?;
        let optimizer_curve = optimizer.run(&train_source, &CrossEntropyLoss, self.cfg.optimizer.generations)?;
        let stack = optimizer.into_stack();

        let (predicted, test_loss) = evaluate(&stack, &test_source)?;
        let evaluation = ClassificationReport::new(&test.labels, &predicted, stack.output_dim())?;
        info!(accuracy = evaluation.accuracy, macro_f1 = evaluation.macro_f1, ?test_loss, "pipeline finished");

        Ok(PipelineReport {
            run_id,
            config: self.cfg.clone(),
            clustering,
            feature_weights,
            selected_features,
            pretraining,
            optimizer_curve,
            test_loss,
            evaluation,
            final_params: stack.flatten().to_vec(),
            completed_at: Utc::now(),
        })
    }

    fn check_inputs(&self, train: &Dataset, test: &Dataset) -> Result<()> {
        if train.is_empty() { return Err(SwarmTuneError::EmptyDataSource); }
        if test.num_features() != train.num_features() {
            return Err(invalid_config(format!("train has {} features, test has {}", train.num_features(), test.num_features())));
        }
        let classes = self.cfg.stack.output_dim;
        if let Some(bad) = train.labels.iter().chain(&test.labels).find(|&&l| l >= classes) {
            return Err(invalid_config(format!("label {bad} outside 0..{classes}")));
        }
        Ok(())
    }
}

/// Predictions in source order plus the batch-averaged loss, `None` when the source is empty.
fn evaluate(stack: &LayerStack, source: &dyn DataSource) -> Result<(Vec<usize>, Option<f64>)> {
    let mut predicted = Vec::new();
    let mut total = 0.0;
    for batch in source.batches() {
        let logits = stack.forward(batch.features.view())?;
        total += CrossEntropyLoss.loss(logits.view(), &batch.labels);
        predicted.extend(stack.predict(batch.features.view())?);
    }
    let loss = (source.num_batches() > 0).then(|| total / source.num_batches() as f64);
    Ok((predicted, loss))
}
