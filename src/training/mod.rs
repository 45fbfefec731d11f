//! Training module
//!
//! This module provides:
//! - The per-epoch train/validate engine
//! - Streaming ROC-AUC accumulation
//! - Reduce-on-plateau learning rate scheduling
//! - Best-model checkpoint gating
//! - The run orchestrator tying them together

pub mod auc;
pub mod checkpoint;
pub mod engine;
pub mod runner;
pub mod scheduler;

pub use auc::{AucAccumulator, Split};
pub use checkpoint::{improves, CheckpointController, CheckpointInfo};
pub use engine::{run_epoch, train_pass, validate_pass, EpochMetrics, EpochPhase, PassStats};
pub use runner::{run_training, TrainingHistory};
pub use scheduler::{PlateauConfig, PlateauScheduler};
