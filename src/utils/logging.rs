//! Logging Module
//!
//! Structured logging on top of the `tracing` crate, plus a small
//! epoch-level logger used by the run orchestrator.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use super::format_duration;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging for debugging (per-batch losses, phase transitions)
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Initialize the global subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Epoch-level progress logger
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch (0-based index)
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();

        tracing::info!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with its timing and ETA
    pub fn end_epoch(&self, val_auc: f64, learning_rate: f64) {
        let epoch_time = self.epoch_start.elapsed();
        let total_time = self.training_start.elapsed();

        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let avg_epoch_time = total_time.as_secs_f64() / (self.epoch + 1) as f64;
        let eta_secs = epochs_remaining as f64 * avg_epoch_time;

        tracing::info!(
            "Epoch {}/{} completed in {} | Val AUC: {:.4} | LR: {:.6} | ETA: {}",
            self.epoch + 1,
            self.total_epochs,
            format_duration(epoch_time.as_secs_f64()),
            val_auc,
            learning_rate,
            format_duration(eta_secs)
        );
    }

    /// Log a learning-rate reduction
    pub fn log_lr_reduced(&self, old_lr: f64, new_lr: f64) {
        tracing::info!("Learning rate reduced from {:.6} to {:.6}", old_lr, new_lr);
    }

    /// Log training completion
    pub fn log_complete(&self, best_auc: f64) {
        let total_time = self.training_start.elapsed();

        tracing::info!(
            "Training complete! {} epochs in {} | Best validation AUC: {:.4}",
            self.total_epochs,
            format_duration(total_time.as_secs_f64()),
            best_auc
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::parse("Warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_log_config_presets() {
        assert_eq!(LogConfig::default().level, LogLevel::Info);
        assert_eq!(LogConfig::verbose().level, LogLevel::Debug);
        assert_eq!(LogConfig::quiet().level, LogLevel::Error);
    }

    #[test]
    fn test_training_logger_eta_does_not_underflow() {
        let mut logger = TrainingLogger::new(1);
        logger.start_epoch(0);
        logger.end_epoch(0.5, 0.0005);
        logger.log_complete(0.5);
    }
}
