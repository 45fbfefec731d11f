//! Dataset module for lesion image handling
//!
//! This module provides functionality for:
//! - Loading labeled and unlabeled sample tables from CSV
//! - Splitting the labeled table into train and validation partitions
//! - Deterministic and randomized image preprocessing
//! - Lazy, shuffled batch production for Burn

pub mod augmentation;
pub mod batcher;
pub mod catalog;

// Re-export main types for convenience
pub use augmentation::{AugmentationConfig, AugmentationPipeline};
pub use batcher::{num_batches, BatchIter, BatchSource, LesionBatch, LesionBatcher, LesionItem};
pub use catalog::{CatalogSchema, FieldValue, LabelPolicy, Sample, SampleCatalog};
