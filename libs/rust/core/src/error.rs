//! Error taxonomy shared by the clusterer, layer stack and swarm optimizer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmTuneError {
    /// A hyperparameter is outside its valid domain (e.g. `m <= 1`, zero epochs).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A fitted-state accessor was called before `fit`.
    #[error("{0} called before fit")]
    NotFitted(&'static str),
    /// Dimensions disagree between stages or between a model and its input.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("data source yielded zero batches")]
    EmptyDataSource,
    #[error("config load failed: {0}")]
    Config(#[from] config::ConfigError),
    #[error("config parse failed: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
    #[error("tracing init failed: {0}")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),
}

pub type Result<T> = std::result::Result<T, SwarmTuneError>;

pub(crate) fn invalid_param(msg: impl Into<String>) -> SwarmTuneError { SwarmTuneError::InvalidParameter(msg.into()) }

pub(crate) fn invalid_config(msg: impl Into<String>) -> SwarmTuneError { SwarmTuneError::InvalidConfiguration(msg.into()) }
