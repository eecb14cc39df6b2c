//! Core library for SwarmTune: sparse weighted fuzzy c-means feature selection,
//! a greedily pretrained RBM layer stack, and gradient-free Taylor bird-swarm
//! fine-tuning of the stack's flattened parameters.

use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub mod clustering;
pub mod config;
pub mod dataset;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod optimizer;
pub mod params;
pub mod pipeline;
pub mod rbm;
pub mod stack;

pub use clustering::{FitSummary, WeightedFuzzyClusterer};
pub use config::{ClusteringConfig, DataConfig, OptimizerConfig, PipelineConfig, PretrainConfig, SelectionConfig, StackConfig};
pub use dataset::{Batch, DataSource, Dataset, InMemoryDataSource};
pub use error::{Result, SwarmTuneError};
pub use loss::{CrossEntropyLoss, LossFunction};
pub use metrics::{ClassificationReport, ConfusionMatrix};
pub use optimizer::PopulationSearchOptimizer;
pub use params::{ParamLayout, ParamSlot, ParameterVector};
pub use pipeline::{Pipeline, PipelineReport};
pub use rbm::RbmBlock;
pub use stack::{LayerStack, LinearHead, PretrainReport};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Install the global fmt subscriber once. `RUST_LOG` drives filtering (default `info`);
/// `SWARMTUNE_JSON_LOG=1|true` switches to flattened JSON events.
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("SWARMTUNE_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry
                .with(fmt::layer().json().flatten_event(true).with_current_span(true).with_span_list(false))
                .try_init()?;
        } else {
            registry.with(fmt::layer().with_target(true).with_thread_ids(false).with_line_number(true)).try_init()?;
        }
        Ok(())
    })?;
    info!(service, "tracing initialized");
    Ok(())
}
