//! Learning Rate Scheduler Module
//!
//! Reduce-on-plateau scheduling driven by validation ROC-AUC. Higher is
//! better: the learning rate is cut when the metric stops rising.

use serde::{Deserialize, Serialize};

/// Plateau scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateauConfig {
    /// Multiplier applied to the learning rate on a plateau
    pub factor: f64,
    /// Non-improving epochs tolerated before reducing
    pub patience: usize,
    /// Relative margin a metric must beat the best by
    pub threshold: f64,
    /// Lower bound for the learning rate
    pub min_lr: f64,
    /// Reductions smaller than this are skipped
    pub eps: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.5,
            patience: 1,
            threshold: 1e-4,
            min_lr: 0.0,
            eps: 1e-8,
        }
    }
}

/// Reduce-on-plateau scheduler in "max" mode
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    config: PlateauConfig,
    current_lr: f64,
    best_metric: Option<f64>,
    bad_epochs: usize,
}

impl PlateauScheduler {
    pub fn new(config: PlateauConfig, initial_lr: f64) -> Self {
        Self {
            config,
            current_lr: initial_lr,
            best_metric: None,
            bad_epochs: 0,
        }
    }

    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }

    pub fn best_metric(&self) -> Option<f64> {
        self.best_metric
    }

    /// Feed one epoch's metric; returns the new learning rate if it was cut
    pub fn step(&mut self, metric: f64) -> Option<f64> {
        let improved = match self.best_metric {
            Some(best) => metric > best * (1.0 + self.config.threshold),
            None => true,
        };

        if improved {
            self.best_metric = Some(metric);
            self.bad_epochs = 0;
            return None;
        }

        self.bad_epochs += 1;
        if self.bad_epochs <= self.config.patience {
            return None;
        }

        self.bad_epochs = 0;
        let new_lr = (self.current_lr * self.config.factor).max(self.config.min_lr);
        if self.current_lr - new_lr > self.config.eps {
            self.current_lr = new_lr;
            Some(new_lr)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(lr: f64) -> PlateauScheduler {
        PlateauScheduler::new(PlateauConfig::default(), lr)
    }

    #[test]
    fn test_rising_metric_keeps_lr() {
        let mut s = scheduler(0.0005);
        for auc in [0.70, 0.65, 0.72, 0.72, 0.80] {
            assert_eq!(s.step(auc), None);
        }
        assert_eq!(s.get_lr(), 0.0005);
        assert_eq!(s.best_metric(), Some(0.80));
    }

    #[test]
    fn test_halves_after_two_stagnant_epochs() {
        let mut s = scheduler(0.0005);
        assert_eq!(s.step(0.70), None);
        assert_eq!(s.step(0.60), None);
        assert_eq!(s.step(0.60), Some(0.00025));
        assert_eq!(s.get_lr(), 0.00025);

        // Counter restarts after a reduction
        assert_eq!(s.step(0.65), None);
        assert_eq!(s.step(0.69), Some(0.000125));
    }

    #[test]
    fn test_improvement_below_threshold_is_stagnant() {
        let mut s = scheduler(0.001);
        s.step(0.8);
        s.step(0.80001);
        assert_eq!(s.step(0.80002), Some(0.0005));
    }

    #[test]
    fn test_min_lr_and_eps() {
        let config = PlateauConfig {
            min_lr: 0.0004,
            ..PlateauConfig::default()
        };
        let mut s = PlateauScheduler::new(config, 0.0005);
        s.step(0.5);
        s.step(0.5);
        assert_eq!(s.step(0.5), Some(0.0004));

        s.step(0.5);
        assert_eq!(s.step(0.5), None);
        assert_eq!(s.get_lr(), 0.0004);
    }
}
