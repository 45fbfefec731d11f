//! Streaming ROC-AUC accumulation.
//!
//! Predictions are collected batch by batch over a whole pass and scored
//! once at the end with the rank-sum (Mann–Whitney U) formulation. Tied
//! scores get their average rank, which makes the result equal to the
//! trapezoidal area under the ROC curve.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::error::{LesionError, Result};

/// Data partition a metric was computed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Split {
    Train,
    Validation,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Validation => write!(f, "validation"),
        }
    }
}

/// Collects (probability, label) pairs for one split
#[derive(Debug, Clone)]
pub struct AucAccumulator {
    split: Split,
    scores: Vec<f32>,
    labels: Vec<u8>,
}

impl AucAccumulator {
    pub fn new(split: Split) -> Self {
        Self {
            split,
            scores: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Append one batch of predicted probabilities and their labels
    pub fn add(&mut self, predictions: &[f32], labels: &[u8]) -> Result<()> {
        if predictions.len() != labels.len() {
            return Err(LesionError::Training(format!(
                "{} predictions for {} labels in {} split",
                predictions.len(),
                labels.len(),
                self.split
            )));
        }
        self.scores.extend_from_slice(predictions);
        self.labels.extend_from_slice(labels);
        Ok(())
    }

    /// `(positives, negatives)` seen so far
    pub fn class_counts(&self) -> (usize, usize) {
        let positives = self.labels.iter().filter(|&&l| l == 1).count();
        (positives, self.labels.len() - positives)
    }

    /// ROC-AUC over everything accumulated.
    ///
    /// Fails with `DegenerateMetric` unless both classes are present.
    pub fn finalize(&self) -> Result<f64> {
        let (positives, negatives) = self.class_counts();
        if positives == 0 || negatives == 0 {
            return Err(LesionError::DegenerateMetric {
                split: self.split,
                positives,
                negatives,
            });
        }

        let mut order: Vec<usize> = (0..self.scores.len()).collect();
        order.sort_by(|&a, &b| self.scores[a].total_cmp(&self.scores[b]));

        // Sum of 1-based ranks of positives, ties sharing their mean rank
        let mut positive_rank_sum = 0.0f64;
        let mut start = 0;
        while start < order.len() {
            let score = self.scores[order[start]];
            let mut end = start + 1;
            while end < order.len() && self.scores[order[end]] == score {
                end += 1;
            }

            let mean_rank = (start + 1 + end) as f64 / 2.0;
            let tied_positives = order[start..end]
                .iter()
                .filter(|&&i| self.labels[i] == 1)
                .count();
            positive_rank_sum += mean_rank * tied_positives as f64;

            start = end;
        }

        let p = positives as f64;
        let n = negatives as f64;
        Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auc_of(scores: &[f32], labels: &[u8]) -> Result<f64> {
        let mut acc = AucAccumulator::new(Split::Validation);
        acc.add(scores, labels)?;
        acc.finalize()
    }

    #[test]
    fn test_perfect_and_inverted_ranking() {
        let labels = [0, 0, 1, 1];
        assert_eq!(auc_of(&[0.1, 0.2, 0.8, 0.9], &labels).unwrap(), 1.0);
        assert_eq!(auc_of(&[0.9, 0.8, 0.2, 0.1], &labels).unwrap(), 0.0);
    }

    #[test]
    fn test_known_value() {
        let auc = auc_of(&[0.1, 0.4, 0.35, 0.8], &[0, 0, 1, 1]).unwrap();
        assert!((auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_ties_count_half() {
        let auc = auc_of(&[0.5, 0.5, 0.5, 0.5], &[0, 1, 0, 1]).unwrap();
        assert!((auc - 0.5).abs() < 1e-12);

        // One positive tied with one of two negatives
        let auc = auc_of(&[0.3, 0.7, 0.7], &[0, 0, 1]).unwrap();
        assert!((auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_batches_accumulate() {
        let scores = [0.2, 0.9, 0.4, 0.6, 0.1, 0.8];
        let labels = [0, 1, 0, 1, 1, 0];

        let mut acc = AucAccumulator::new(Split::Train);
        acc.add(&scores[..4], &labels[..4]).unwrap();
        acc.add(&scores[4..], &labels[4..]).unwrap();

        assert_eq!(acc.len(), 6);
        assert_eq!(acc.finalize().unwrap(), auc_of(&scores, &labels).unwrap());
    }

    #[test]
    fn test_single_class_is_degenerate() {
        let err = auc_of(&[0.3, 0.6, 0.2], &[0, 0, 0]).unwrap_err();
        match err {
            LesionError::DegenerateMetric {
                split,
                positives,
                negatives,
            } => {
                assert_eq!(split, Split::Validation);
                assert_eq!(positives, 0);
                assert_eq!(negatives, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_is_degenerate() {
        let acc = AucAccumulator::new(Split::Train);
        assert!(matches!(
            acc.finalize(),
            Err(LesionError::DegenerateMetric { positives: 0, negatives: 0, .. })
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut acc = AucAccumulator::new(Split::Train);
        assert!(matches!(
            acc.add(&[0.5, 0.2], &[1]),
            Err(LesionError::Training(_))
        ));
    }
}
