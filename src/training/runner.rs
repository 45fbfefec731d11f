//! Run orchestration.
//!
//! Loads the tables, builds the batch sources and the model, then drives a
//! fixed number of epochs while the scheduler and checkpoint controller
//! react to validation ROC-AUC.

use std::fs;
use std::path::PathBuf;

use burn::{
    optim::AdamConfig,
    tensor::backend::AutodiffBackend,
};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use super::checkpoint::CheckpointController;
use super::engine::{run_epoch, EpochMetrics};
use super::scheduler::{PlateauConfig, PlateauScheduler};
use crate::config::RunConfig;
use crate::dataset::{AugmentationPipeline, BatchSource, CatalogSchema, LabelPolicy, SampleCatalog};
use crate::model::{LesionClassifier, ModelConfig};
use crate::utils::charts::render_history_charts;
use crate::utils::error::{LesionError, Result};
use crate::utils::logging::TrainingLogger;

/// Everything a finished run reports back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
    pub best_val_auc: f64,
    pub best_epoch: Option<usize>,
    /// Burn record of the best model, if any epoch beat an AUC of 0
    pub checkpoint: Option<PathBuf>,
}

impl TrainingHistory {
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Train a lesion classifier as described by `config`.
///
/// # Type Parameters
/// * `B` - The autodiff backend to use (e.g., `Autodiff<NdArray>` or `Autodiff<Cuda>`)
pub fn run_training<B: AutodiffBackend>(config: &RunConfig, device: B::Device) -> Result<TrainingHistory> {
    config.validate()?;
    fs::create_dir_all(&config.output_dir)?;

    println!("{}", "Loading Data...".cyan());
    let schema = CatalogSchema {
        image_column: config.image_column.clone(),
        label_column: config.label_column.clone(),
        image_extension: config.image_extension.clone(),
    };
    let catalog = SampleCatalog::from_csv(
        &config.train_csv,
        &config.train_image_dir,
        &schema,
        LabelPolicy::Required,
    )?;
    let (train, valid) = catalog.split(config.validation_fraction)?;

    if train.is_empty() || valid.is_empty() {
        return Err(LesionError::Config(format!(
            "{} rows cannot be split into non-empty train and validation sets at fraction {}",
            catalog.len(),
            config.validation_fraction
        )));
    }

    let (train_pos, train_neg) = train.label_counts();
    let (valid_pos, valid_neg) = valid.label_counts();
    println!(
        "There are {} images in train set and {} in dev set.",
        train.len(),
        valid.len()
    );
    tracing::info!(
        "Train: {} malignant / {} benign | Validation: {} malignant / {} benign",
        train_pos,
        train_neg,
        valid_pos,
        valid_neg
    );

    if let (Some(test_csv), Some(test_dir)) = (&config.test_csv, &config.test_image_dir) {
        let test = SampleCatalog::from_csv(test_csv, test_dir, &schema, LabelPolicy::Optional)?;
        tracing::info!("Loaded {} test rows (evaluation not run)", test.len());
    }

    let crop = config.image_size as u32;
    let mut train_source = BatchSource::new(
        train,
        AugmentationPipeline::training().with_crop_size(crop),
        config.batch_size,
        true,
        config.seed,
    )?;
    let mut valid_source = BatchSource::new(
        valid,
        AugmentationPipeline::evaluation().with_crop_size(crop),
        config.batch_size,
        true,
        config.seed.wrapping_add(1),
    )?;

    println!("{}", "Creating Model...".cyan());
    let model_config = ModelConfig::new(config.model_type)
        .with_num_outputs(config.num_outputs)
        .with_width_scale(config.width_scale)
        .with_pretrained_weights(config.pretrained_weights.clone());
    let mut model = LesionClassifier::<B>::assemble(&model_config, &device)?;

    let mut optimizer = AdamConfig::new().init();
    let mut scheduler = PlateauScheduler::new(PlateauConfig::default(), config.learning_rate);
    let mut checkpoint = CheckpointController::new(
        config.output_dir.join("best_model"),
        config.model_type,
    );

    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Backbone:         {}", config.model_type);
    println!("  Epochs:           {}", config.n_epochs);
    println!("  Batch size:       {}", config.batch_size);
    println!("  Learning rate:    {}", config.learning_rate);
    println!("  Device:           {:?}", device);
    println!();

    let mut logger = TrainingLogger::new(config.n_epochs);
    let mut history = Vec::with_capacity(config.n_epochs);

    for epoch in 0..config.n_epochs {
        logger.start_epoch(epoch);
        let learning_rate = scheduler.get_lr();

        let (trained, metrics) = run_epoch(
            epoch + 1,
            model,
            &mut optimizer,
            learning_rate,
            &mut train_source,
            &mut valid_source,
            &device,
        )?;
        model = trained;

        println!(
            "{} Epoch {}: Training loss = {:.4}, Validation loss = {:.4}",
            "→".cyan(),
            metrics.epoch,
            metrics.train_loss,
            metrics.val_loss
        );
        println!(
            "  Train auc = {:.4}, Validation auc = {:.4}, lr = {}",
            metrics.train_auc, metrics.val_auc, learning_rate
        );
        logger.end_epoch(metrics.val_auc, learning_rate);

        if let Some(new_lr) = scheduler.step(metrics.val_auc) {
            logger.log_lr_reduced(learning_rate, new_lr);
        }

        let saved = checkpoint.observe(metrics.epoch, metrics.val_auc, learning_rate, |path| {
            model.save_checkpoint(path)
        })?;
        if saved {
            println!("  {}", "model saved".green());
        }

        history.push(metrics);
    }

    let history = TrainingHistory {
        epochs: history,
        best_val_auc: checkpoint.best_auc(),
        best_epoch: checkpoint.best_epoch(),
        checkpoint: checkpoint.best_epoch().map(|_| config.checkpoint_path()),
    };
    history.save(&config.history_path())?;
    render_history_charts(&history.epochs, &config.output_dir)?;

    logger.log_complete(history.best_val_auc);
    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Best validation AUC: {:.4}", history.best_val_auc);
    if let Some(path) = &history.checkpoint {
        println!("  Best model: {:?}", path);
    }

    Ok(history)
}
