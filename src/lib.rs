//! # Lesion AUC
//!
//! A Rust training harness for binary skin-lesion malignancy classification,
//! built on the Burn framework.
//!
//! ## Features
//!
//! - **Transfer learning** on ResNet-18 or EfficientNet-B4 with a frozen backbone prefix
//! - **ROC-AUC driven training**: plateau LR scheduling and best-model checkpointing
//! - **Augmentation**: center crop, random perspective, random flips
//! - **CSV input** with leading-rows validation split
//!
//! ## Modules
//!
//! - `dataset`: Sample catalog, augmentation pipeline and batch source
//! - `model`: Backbones and the freeze policy
//! - `training`: Epoch engine, AUC accumulation, scheduler, checkpointing, orchestration
//! - `config`: Run configuration
//! - `backend`: Device selection
//! - `utils`: Logging, charts and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lesion_auc::backend::CpuTrainingBackend;
//! use lesion_auc::{run_training, RunConfig};
//!
//! let config = RunConfig::from_json_file("run.json".as_ref())?;
//! let history = run_training::<CpuTrainingBackend>(&config, Default::default())?;
//! println!("best AUC {:.4}", history.best_val_auc);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::RunConfig;
pub use dataset::{AugmentationPipeline, BatchSource, LesionBatch, SampleCatalog};
pub use model::{BackboneKind, LesionClassifier, ModelConfig};
pub use training::{
    run_training, AucAccumulator, CheckpointController, EpochMetrics, PlateauScheduler,
    TrainingHistory,
};
pub use utils::error::{LesionError, Result};

/// Side length of the square network input
pub const IMAGE_SIZE: usize = 224;

/// Width of the classification head
pub const DEFAULT_NUM_OUTPUTS: usize = 9;

/// Per-channel ImageNet mean (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel ImageNet standard deviation (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
