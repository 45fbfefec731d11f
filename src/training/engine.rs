//! Epoch engine.
//!
//! One epoch runs a training pass, then a validation pass, then reduces the
//! accumulated losses and predictions to `EpochMetrics`. Optimizer,
//! scheduler and checkpoint state live with the caller.

use std::fmt;

use burn::{
    module::AutodiffModule,
    nn::loss::BinaryCrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer},
    tensor::{
        activation::sigmoid,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::auc::{AucAccumulator, Split};
use crate::dataset::{BatchSource, LesionBatch};
use crate::model::LesionClassifier;
use crate::utils::error::{LesionError, Result};

/// Ordered stages of one epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochPhase {
    TrainPass,
    ValidatePass,
    MetricAggregation,
    Done,
}

impl fmt::Display for EpochPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochPhase::TrainPass => write!(f, "train-pass"),
            EpochPhase::ValidatePass => write!(f, "validate-pass"),
            EpochPhase::MetricAggregation => write!(f, "metric-aggregation"),
            EpochPhase::Done => write!(f, "done"),
        }
    }
}

/// Per-epoch summary appended to the run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub train_auc: f64,
    pub val_auc: f64,
    /// Learning rate the epoch was trained with
    pub learning_rate: f64,
}

/// Running sums for one pass over a split
#[derive(Debug)]
pub struct PassStats {
    loss_sum: f64,
    samples: usize,
    auc: AucAccumulator,
}

impl PassStats {
    pub fn new(split: Split) -> Self {
        Self {
            loss_sum: 0.0,
            samples: 0,
            auc: AucAccumulator::new(split),
        }
    }

    /// Record one batch given its mean loss
    pub fn record(&mut self, mean_loss: f64, probabilities: &[f32], labels: &[u8]) -> Result<()> {
        self.auc.add(probabilities, labels)?;
        self.loss_sum += mean_loss * labels.len() as f64;
        self.samples += labels.len();
        Ok(())
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Sample-weighted mean loss and ROC-AUC
    pub fn finish(&self) -> Result<(f64, f64)> {
        if self.samples == 0 {
            return Err(LesionError::Training(format!(
                "{} pass saw no samples",
                self.auc.split()
            )));
        }
        let loss = self.loss_sum / self.samples as f64;
        let auc = self.auc.finalize()?;
        Ok((loss, auc))
    }
}

fn pass_progress(len: usize, split: Split) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  {prefix:>10} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_prefix(split.to_string());
    bar
}

/// Binary cross-entropy on the malignancy logit plus host-side probabilities
fn score_batch<B: Backend>(
    model: &LesionClassifier<B>,
    batch: &LesionBatch<B>,
) -> Result<(Tensor<B, 1>, Vec<f32>)> {
    let logits = model.forward_logits(batch.images.clone());
    let loss = BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(&logits.device())
        .forward(logits.clone(), batch.targets.clone());

    let probabilities = sigmoid(logits)
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| LesionError::Training(format!("failed to read predictions: {:?}", e)))?;

    Ok((loss, probabilities))
}

/// One optimization step per batch over the training split
pub fn train_pass<B, O>(
    mut model: LesionClassifier<B>,
    optimizer: &mut O,
    learning_rate: f64,
    source: &mut BatchSource,
    device: &B::Device,
) -> Result<(LesionClassifier<B>, PassStats)>
where
    B: AutodiffBackend,
    O: Optimizer<LesionClassifier<B>, B>,
{
    let mut stats = PassStats::new(Split::Train);
    let progress = pass_progress(source.num_batches(), Split::Train);

    for batch in source.iterate::<B>(device) {
        let batch = batch?;
        let (loss, probabilities) = score_batch(&model, &batch)?;

        let loss_value: f64 = loss.clone().into_scalar().elem();
        stats.record(loss_value, &probabilities, &batch.labels)?;

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(learning_rate, model, grads);

        progress.set_message(format!("loss {:.4}", loss_value));
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok((model, stats))
}

/// Forward-only pass; nothing is updated
pub fn validate_pass<B: Backend>(
    model: &LesionClassifier<B>,
    source: &mut BatchSource,
    device: &B::Device,
) -> Result<PassStats> {
    let mut stats = PassStats::new(Split::Validation);
    let progress = pass_progress(source.num_batches(), Split::Validation);

    for batch in source.iterate::<B>(device) {
        let batch = batch?;
        let (loss, probabilities) = score_batch(model, &batch)?;

        let loss_value: f64 = loss.into_scalar().elem();
        stats.record(loss_value, &probabilities, &batch.labels)?;
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(stats)
}

/// Run one full epoch and return the updated model with its metrics
pub fn run_epoch<B, O>(
    epoch: usize,
    model: LesionClassifier<B>,
    optimizer: &mut O,
    learning_rate: f64,
    train_source: &mut BatchSource,
    valid_source: &mut BatchSource,
    device: &B::Device,
) -> Result<(LesionClassifier<B>, EpochMetrics)>
where
    B: AutodiffBackend,
    O: Optimizer<LesionClassifier<B>, B>,
{
    debug!(epoch, phase = %EpochPhase::TrainPass, "entering phase");
    let (model, train_stats) = train_pass(model, optimizer, learning_rate, train_source, device)?;

    debug!(epoch, phase = %EpochPhase::ValidatePass, "entering phase");
    let valid_model = model.valid();
    let valid_stats = validate_pass::<B::InnerBackend>(&valid_model, valid_source, device)?;

    debug!(epoch, phase = %EpochPhase::MetricAggregation, "entering phase");
    let (train_loss, train_auc) = train_stats.finish()?;
    let (val_loss, val_auc) = valid_stats.finish()?;

    debug!(
        epoch,
        phase = %EpochPhase::Done,
        train_samples = train_stats.samples(),
        val_samples = valid_stats.samples(),
        "epoch finished"
    );

    Ok((
        model,
        EpochMetrics {
            epoch,
            train_loss,
            val_loss,
            train_auc,
            val_auc,
            learning_rate,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_stats_weighted_loss() {
        let mut stats = PassStats::new(Split::Train);
        stats.record(1.0, &[0.9, 0.1], &[1, 0]).unwrap();
        stats.record(4.0, &[0.6], &[1]).unwrap();

        let (loss, auc) = stats.finish().unwrap();
        assert!((loss - 2.0).abs() < 1e-12);
        assert_eq!(auc, 1.0);
        assert_eq!(stats.samples(), 3);
    }

    #[test]
    fn test_empty_pass_is_error() {
        let stats = PassStats::new(Split::Validation);
        assert!(matches!(stats.finish(), Err(LesionError::Training(_))));
    }

    #[test]
    fn test_single_class_pass_is_degenerate() {
        let mut stats = PassStats::new(Split::Validation);
        stats.record(0.3, &[0.2, 0.4], &[0, 0]).unwrap();
        assert!(matches!(
            stats.finish(),
            Err(LesionError::DegenerateMetric {
                split: Split::Validation,
                ..
            })
        ));
    }
}
