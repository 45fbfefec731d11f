//! Utilities module for logging, charts, and error handling
//!
//! This module provides:
//! - Structured logging with tracing
//! - SVG training curves
//! - Error handling types

pub mod charts;
pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{LesionError, Result};
pub use logging::init_logging;

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(12.34), "12.3s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(7260.0), "2h 1m");
    }
}
