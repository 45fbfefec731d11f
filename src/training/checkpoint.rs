//! Best-model checkpointing.
//!
//! `CheckpointController` owns the best validation ROC-AUC seen so far and
//! decides when the model snapshot gets overwritten. Next to the Burn record
//! it writes a small JSON sidecar describing the saved epoch.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::BackboneKind;
use crate::utils::error::Result;

/// Metadata written next to the best model record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// 1-based epoch of the snapshot
    pub epoch: usize,
    pub val_auc: f64,
    pub learning_rate: f64,
    pub backbone: BackboneKind,
    pub timestamp: String,
}

impl CheckpointInfo {
    pub fn new(epoch: usize, val_auc: f64, learning_rate: f64, backbone: BackboneKind) -> Self {
        use chrono::Utc;

        Self {
            epoch,
            val_auc,
            learning_rate,
            backbone,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Strict improvement gate: ties never replace the saved model
pub fn improves(best_auc: f64, candidate: f64) -> bool {
    candidate > best_auc
}

/// Keeps exactly one snapshot: the epoch with the highest validation AUC
#[derive(Debug)]
pub struct CheckpointController {
    record_path: PathBuf,
    backbone: BackboneKind,
    best_auc: f64,
    best_epoch: Option<usize>,
}

impl CheckpointController {
    /// `record_path` is handed to the save callback as-is; the sidecar goes
    /// next to it with a `.json` extension.
    pub fn new(record_path: PathBuf, backbone: BackboneKind) -> Self {
        Self {
            record_path,
            backbone,
            best_auc: 0.0,
            best_epoch: None,
        }
    }

    pub fn best_auc(&self) -> f64 {
        self.best_auc
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.record_path.with_extension("json")
    }

    /// Save through `save` if `val_auc` beats the best so far.
    ///
    /// Returns whether a snapshot was written. The best value only moves
    /// after the save succeeded.
    pub fn observe<F>(&mut self, epoch: usize, val_auc: f64, learning_rate: f64, save: F) -> Result<bool>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        if !improves(self.best_auc, val_auc) {
            return Ok(false);
        }

        if let Some(parent) = self.record_path.parent() {
            fs::create_dir_all(parent)?;
        }
        save(&self.record_path)?;
        CheckpointInfo::new(epoch, val_auc, learning_rate, self.backbone)
            .save(&self.sidecar_path())?;

        info!(
            "Validation AUC improved {:.4} -> {:.4}, model saved to {:?}",
            self.best_auc, val_auc, self.record_path
        );
        self.best_auc = val_auc;
        self.best_epoch = Some(epoch);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::LesionError;
    use tempfile::TempDir;

    #[test]
    fn test_gate_is_strict() {
        assert!(improves(0.0, 0.5));
        assert!(!improves(0.72, 0.72));
        assert!(!improves(0.8, 0.7));
    }

    #[test]
    fn test_saves_only_on_strict_improvement() {
        let dir = TempDir::new().unwrap();
        let mut controller =
            CheckpointController::new(dir.path().join("best_model"), BackboneKind::ResNet);

        let mut saved_epochs = Vec::new();
        for (i, auc) in [0.70, 0.65, 0.72, 0.72, 0.80].into_iter().enumerate() {
            let epoch = i + 1;
            let saved = controller
                .observe(epoch, auc, 0.0005, |path| {
                    fs::write(path, format!("epoch {}", epoch))?;
                    Ok(())
                })
                .unwrap();
            if saved {
                saved_epochs.push(epoch);
            }
        }

        assert_eq!(saved_epochs, vec![1, 3, 5]);
        assert_eq!(controller.best_auc(), 0.80);
        assert_eq!(controller.best_epoch(), Some(5));

        let info = CheckpointInfo::load(&controller.sidecar_path()).unwrap();
        assert_eq!(info.epoch, 5);
        assert_eq!(info.backbone, BackboneKind::ResNet);
        assert_eq!(
            fs::read_to_string(controller.record_path()).unwrap(),
            "epoch 5"
        );
    }

    #[test]
    fn test_zero_auc_never_saves() {
        let dir = TempDir::new().unwrap();
        let mut controller =
            CheckpointController::new(dir.path().join("best_model"), BackboneKind::EfficientNet);

        let saved = controller
            .observe(1, 0.0, 0.0005, |_| panic!("must not save"))
            .unwrap();
        assert!(!saved);
        assert!(!controller.sidecar_path().exists());
    }

    #[test]
    fn test_failed_save_keeps_best() {
        let dir = TempDir::new().unwrap();
        let mut controller =
            CheckpointController::new(dir.path().join("best_model"), BackboneKind::ResNet);

        let result = controller.observe(1, 0.9, 0.0005, |_| {
            Err(LesionError::Model("disk full".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(controller.best_auc(), 0.0);
    }
}
