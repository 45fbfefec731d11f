//! Lesion AUC CLI
//!
//! Entry point for training the skin-lesion malignancy classifier with the
//! Burn framework.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use lesion_auc::backend::{select_device, CpuTrainingBackend};
use lesion_auc::utils::logging::{init_logging, LogConfig, LogLevel};
use lesion_auc::{run_training, BackboneKind, RunConfig};

/// Skin-lesion malignancy classifier training
#[derive(Parser, Debug)]
#[command(name = "lesion_auc")]
#[command(version)]
#[command(about = "Fine-tune a lesion malignancy classifier with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Explicit log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a classifier and keep the best model by validation ROC-AUC
    Train {
        /// JSON run configuration (paths, columns, seed); flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Backbone architecture [default: resnet]
        #[arg(short, long, value_enum)]
        model_type: Option<BackboneKind>,

        /// Number of training epochs [default: 20]
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Initial learning rate [default: 0.0005]
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Batch size [default: 32]
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Output directory for the checkpoint, history and charts
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config.level = LogLevel::parse(level);
    }

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            config,
            model_type,
            epochs,
            learning_rate,
            batch_size,
            output_dir,
        } => {
            let mut run_config = match &config {
                Some(path) => RunConfig::from_json_file(path)
                    .with_context(|| format!("failed to read run configuration {:?}", path))?,
                None => RunConfig::default(),
            };

            if let Some(model_type) = model_type {
                run_config.model_type = model_type;
            }
            if let Some(epochs) = epochs {
                run_config.n_epochs = epochs;
            }
            if let Some(learning_rate) = learning_rate {
                run_config.learning_rate = learning_rate;
            }
            if let Some(batch_size) = batch_size {
                run_config.batch_size = batch_size;
            }
            if let Some(output_dir) = output_dir {
                run_config.output_dir = output_dir;
            }

            run_config
                .validate()
                .context("invalid run configuration")?;
            cmd_train(&run_config)?;
        }
    }

    Ok(())
}

fn cmd_train(config: &RunConfig) -> Result<()> {
    let device = select_device();
    info!("Training {} on {}", config.model_type, device);

    let history = match device {
        #[cfg(feature = "cuda")]
        lesion_auc::backend::Device::Cuda(id) => run_training::<lesion_auc::backend::GpuTrainingBackend>(
            config,
            burn_cuda::CudaDevice::new(id),
        ),
        _ => run_training::<CpuTrainingBackend>(config, Default::default()),
    }
    .context("training run failed")?;

    if history.checkpoint.is_none() {
        println!(
            "{} No epoch reached a validation AUC above 0; no model was saved.",
            "Note:".yellow()
        );
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        format!(
            r#"
 ==================================================================
    Lesion AUC v{}
    Skin-lesion malignancy classification with Burn + Rust
 ==================================================================
  "#,
            lesion_auc::VERSION
        )
        .green()
    );
}
