//! Run configuration.
//!
//! Every path and hyperparameter of a training run lives here. The binary
//! builds a `RunConfig` from an optional JSON file plus CLI overrides and
//! validates it before any data is touched.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::BackboneKind;
use crate::utils::error::{LesionError, Result};
use crate::{DEFAULT_NUM_OUTPUTS, IMAGE_SIZE};

/// Configuration for one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Backbone to fine-tune
    pub model_type: BackboneKind,
    /// Number of epochs
    pub n_epochs: usize,
    /// Initial learning rate
    pub learning_rate: f64,
    /// Batch size for both splits
    pub batch_size: usize,
    /// Leading fraction of the training table used for validation
    pub validation_fraction: f64,

    /// Labeled training table
    pub train_csv: PathBuf,
    /// Directory holding the training images
    pub train_image_dir: PathBuf,
    /// Unlabeled test table (loaded and counted only)
    pub test_csv: Option<PathBuf>,
    /// Directory holding the test images
    pub test_image_dir: Option<PathBuf>,

    /// Column holding the image reference
    pub image_column: String,
    /// Column holding the 0/1 label
    pub label_column: String,
    /// Extension appended to references that carry none
    pub image_extension: String,

    /// Destination for the checkpoint, history and charts
    pub output_dir: PathBuf,
    /// Seed for shuffling and augmentation
    pub seed: u64,

    /// Side length of the square network input
    pub image_size: usize,
    /// Channel width multiplier for the backbone
    pub width_scale: f64,
    /// Width of the classification head
    pub num_outputs: usize,
    /// Burn record with pretrained backbone weights
    pub pretrained_weights: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model_type: BackboneKind::ResNet,
            n_epochs: 20,
            learning_rate: 0.0005,
            batch_size: 32,
            validation_fraction: 0.2,
            train_csv: PathBuf::from("data/train.csv"),
            train_image_dir: PathBuf::from("data/train"),
            test_csv: None,
            test_image_dir: None,
            image_column: "image_name".to_string(),
            label_column: "target".to_string(),
            image_extension: "jpg".to_string(),
            output_dir: PathBuf::from("output"),
            seed: 42,
            image_size: IMAGE_SIZE,
            width_scale: 1.0,
            num_outputs: DEFAULT_NUM_OUTPUTS,
            pretrained_weights: None,
        }
    }
}

impl RunConfig {
    /// Load a configuration from JSON; missing keys take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject values that would make the run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.n_epochs == 0 {
            return Err(LesionError::Config(
                "number of epochs must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(LesionError::Config("batch size must be positive".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(LesionError::Config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        // NaN fails both comparisons
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(LesionError::Config(format!(
                "validation fraction must lie in (0, 1), got {}",
                self.validation_fraction
            )));
        }
        if self.num_outputs == 0 {
            return Err(LesionError::Config(
                "classification head needs at least one output".to_string(),
            ));
        }
        if self.image_size == 0 {
            return Err(LesionError::Config("image size must be positive".to_string()));
        }
        if !(self.width_scale.is_finite() && self.width_scale > 0.0) {
            return Err(LesionError::Config(format!(
                "width scale must be positive, got {}",
                self.width_scale
            )));
        }
        if self.test_csv.is_some() != self.test_image_dir.is_some() {
            return Err(LesionError::Config(
                "test_csv and test_image_dir must be given together".to_string(),
            ));
        }
        Ok(())
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join("best_model.mpk")
    }

    pub fn history_path(&self) -> PathBuf {
        self.output_dir.join("history.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert_eq!(config.n_epochs, 20);
        assert_eq!(config.batch_size, 32);
        assert!((config.learning_rate - 0.0005).abs() < 1e-12);
        assert_eq!(config.num_outputs, 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        for fraction in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            let config = RunConfig {
                validation_fraction: fraction,
                ..RunConfig::default()
            };
            assert!(config.validate().unwrap_err().is_config());
        }
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = RunConfig {
            batch_size: 0,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{ "model_type": "efficientnet", "train_csv": "/data/isic/train.csv" }"#,
        )
        .unwrap();

        let config = RunConfig::from_json_file(&path).unwrap();
        assert_eq!(config.model_type, BackboneKind::EfficientNet);
        assert_eq!(config.train_csv, PathBuf::from("/data/isic/train.csv"));
        assert_eq!(config.n_epochs, 20);
        assert_eq!(config.image_column, "image_name");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        let config = RunConfig {
            seed: 7,
            ..RunConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = RunConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.seed, 7);
    }
}
