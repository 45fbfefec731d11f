//! Error Handling Module
//!
//! Defines the error type shared by every stage of a training run.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

use crate::training::auc::Split;

/// Main error type for lesion classifier training
#[derive(Error, Debug)]
pub enum LesionError {
    /// Invalid run or model configuration, detected before any batch is produced
    #[error("Configuration error: {0}")]
    Config(String),

    /// An image reference could not be opened or decoded
    #[error("Failed to load image #{index} at '{path}': {reason}")]
    ImageLoad {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    /// A table row that does not satisfy the input contract
    #[error("Malformed row at line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },

    /// CSV reader error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// ROC-AUC is undefined for this split (fewer than two classes present)
    #[error(
        "ROC-AUC undefined for {split} split: {positives} positive and {negatives} negative labels"
    )]
    DegenerateMetric {
        split: Split,
        positives: usize,
        negatives: usize,
    },

    /// Error with model operations (assembly, record load/save)
    #[error("Model error: {0}")]
    Model(String),

    /// Error inside the training engine
    #[error("Training error: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LesionError {
    fn from(err: serde_json::Error) -> Self {
        LesionError::Serialization(err.to_string())
    }
}

impl LesionError {
    /// Whether this error was raised while validating configuration
    pub fn is_config(&self) -> bool {
        matches!(self, LesionError::Config(_))
    }
}

/// Convenience Result type for lesion classifier operations
pub type Result<T> = std::result::Result<T, LesionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LesionError::Config("batch size must be positive".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: batch size must be positive"
        );
        assert!(err.is_config());
    }

    #[test]
    fn test_image_load_error() {
        let err = LesionError::ImageLoad {
            path: PathBuf::from("/data/train/ISIC_0000.jpg"),
            index: 7,
            reason: "file not found".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("ISIC_0000.jpg"));
        assert!(msg.contains("#7"));
    }

    #[test]
    fn test_degenerate_metric_is_distinct() {
        let err = LesionError::DegenerateMetric {
            split: Split::Validation,
            positives: 0,
            negatives: 20,
        };
        assert!(!err.is_config());
        assert!(format!("{}", err).contains("validation"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: LesionError = io_err.into();
        assert!(matches!(err, LesionError::Io(_)));
    }
}
