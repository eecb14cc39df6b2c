//! Layered pipeline configuration.
//!
//! Precedence (lowest → highest): built-in defaults, optional config file
//! (YAML/TOML/JSON by extension), `SWARMTUNE__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{invalid_param, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusteringConfig {
    pub n_clusters: usize,
    /// Fuzziness exponent, must be > 1.
    pub m: f64,
    pub epsilon: f64,
    pub max_iter: usize,
    /// Soft-threshold applied to raw feature importances.
    pub lambda: f64,
    pub seed: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self { Self { n_clusters: 2, m: 2.0, epsilon: 1e-5, max_iter: 50, lambda: 0.05, seed: 42 } }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectionConfig {
    pub threshold: f64,
}

impl Default for SelectionConfig { fn default() -> Self { Self { threshold: 0.01 } } }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StackConfig {
    pub hidden_dims: Vec<usize>,
    pub output_dim: usize,
    /// Gibbs sampling rounds per contrastive-divergence update.
    pub gibbs_steps: usize,
    pub seed: u64,
}

impl Default for StackConfig {
    fn default() -> Self { Self { hidden_dims: vec![16, 8], output_dim: 2, gibbs_steps: 1, seed: 42 } }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PretrainConfig {
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for PretrainConfig { fn default() -> Self { Self { epochs: 10, learning_rate: 0.05 } } }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    pub population_size: usize,
    pub prob_foraging: f64,
    pub prob_flight: f64,
    /// Half-width of the uniform noise used to seed the population.
    pub perturbation_range: f64,
    pub generations: usize,
    /// Evaluate candidates on the rayon pool, one private stack per worker.
    pub parallel_evaluation: bool,
    /// Optional clamp applied after each position update. `None` keeps the search unbounded.
    pub position_bounds: Option<(f64, f64)>,
    pub seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population_size: 10,
            prob_foraging: 0.8,
            prob_flight: 0.1,
            perturbation_range: 0.5,
            generations: 15,
            parallel_evaluation: false,
            position_bounds: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    pub batch_size: usize,
    pub shuffle_train: bool,
    pub seed: u64,
}

impl Default for DataConfig { fn default() -> Self { Self { batch_size: 16, shuffle_train: true, seed: 42 } } }

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub clustering: ClusteringConfig,
    pub selection: SelectionConfig,
    pub stack: StackConfig,
    pub pretrain: PretrainConfig,
    pub optimizer: OptimizerConfig,
    pub data: DataConfig,
}

impl PipelineConfig {
    /// Load defaults, then `path` (if it exists), then `SWARMTUNE__*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&PipelineConfig::default())?);
        if let Some(p) = path {
            builder = builder.add_source(config::File::from(p).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SWARMTUNE")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("stack.hidden_dims"),
        );
        let cfg: PipelineConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        tracing::debug!(?path, "pipeline config loaded");
        Ok(cfg)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: PipelineConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.clustering;
        if c.n_clusters == 0 { return Err(invalid_param("clustering.n_clusters must be >= 1")); }
        if !(c.m > 1.0) { return Err(invalid_param(format!("clustering.m must be > 1, got {}", c.m))); }
        if !(c.epsilon > 0.0) { return Err(invalid_param("clustering.epsilon must be > 0")); }
        if c.max_iter == 0 { return Err(invalid_param("clustering.max_iter must be >= 1")); }
        if c.lambda < 0.0 { return Err(invalid_param("clustering.lambda must be >= 0")); }
        if self.stack.hidden_dims.is_empty() || self.stack.hidden_dims.contains(&0) {
            return Err(invalid_param(format!("stack.hidden_dims must be non-empty and positive, got {:?}", self.stack.hidden_dims)));
        }
        if self.stack.output_dim == 0 { return Err(invalid_param("stack.output_dim must be >= 1")); }
        if self.stack.gibbs_steps == 0 { return Err(invalid_param("stack.gibbs_steps must be >= 1")); }
        if self.pretrain.epochs == 0 { return Err(invalid_param("pretrain.epochs must be >= 1")); }
        if !(self.pretrain.learning_rate > 0.0) { return Err(invalid_param("pretrain.learning_rate must be > 0")); }
        if self.data.batch_size == 0 { return Err(invalid_param("data.batch_size must be >= 1")); }
        self.optimizer.validate()
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.population_size < 2 {
            return Err(invalid_param(format!("optimizer.population_size must be >= 2, got {}", self.population_size)));
        }
        for (name, p) in [("prob_foraging", self.prob_foraging), ("prob_flight", self.prob_flight)] {
            if !(0.0..=1.0).contains(&p) { return Err(invalid_param(format!("optimizer.{name} must be in [0, 1], got {p}"))); }
        }
        if !(self.perturbation_range >= 0.0) { return Err(invalid_param("optimizer.perturbation_range must be >= 0")); }
        if let Some((lo, hi)) = self.position_bounds {
            if !(lo < hi) { return Err(invalid_param(format!("optimizer.position_bounds inverted: ({lo}, {hi})"))); }
        }
        Ok(())
    }
}
