use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use swarmtune_core::{init_tracing, Pipeline, PipelineConfig};
use tracing::info;

mod csv_data;

#[derive(Parser, Debug)]
#[command(name = "swarmtune-pipeline")]
#[command(about = "Feature selection, RBM pretraining and swarm fine-tuning on CSV data")]
struct Args {
    /// Pipeline config file (YAML/TOML/JSON); missing file falls back to defaults
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Training CSV, last column is the integer class label
    #[arg(long)]
    train: PathBuf,

    /// Evaluation CSV, same layout as --train
    #[arg(long)]
    test: PathBuf,

    /// Write the JSON report here instead of stdout
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Score swarm candidates on the rayon pool
    #[arg(long)]
    parallel: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing("swarmtune-pipeline")?;

    let mut cfg = PipelineConfig::load(args.config.as_deref()).context("loading pipeline config")?;
    if args.parallel { cfg.optimizer.parallel_evaluation = true; }
    info!(?cfg, "config_loaded");

    let train = csv_data::load_dataset(&args.train)?;
    let test = csv_data::load_dataset(&args.test)?;
    info!(train_rows = train.len(), test_rows = test.len(), features = train.num_features(), "data_loaded");

    let report = Pipeline::new(cfg)?.run(&train, &test)?;
    let json = serde_json::to_string_pretty(&report)?;
    match args.output {
        Some(path) => std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?,
        None => println!("{json}"),
    }
    info!(run_id = %report.run_id, accuracy = report.evaluation.accuracy, "shutdown");
    Ok(())
}
