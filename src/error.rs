//! Custom error types for the application.
//!
//! This module defines the primary error type, `GonioError`, using the
//! `thiserror` crate. Every failure during a sweep is fatal: the instrument
//! is supervised, so errors propagate with `?` up to `main`, which logs the
//! diagnostic and exits nonzero. There is no retry or partial-recovery
//! machinery.
//!
//! The variants worth knowing about:
//!
//! - **`DeviceNotFound`**: discovery could not match a configured serial
//!   number (or port path) to an attached device.
//! - **`HomingUnsafe`**: a stage reported a position far enough from zero
//!   that homing could wind the fiber bundle around the mount. Raised before
//!   any motion is commanded.
//! - **`IntegrationTimeOutOfRange`**: the configured integration time falls
//!   outside the spectrometer's supported range. Raised before the value is
//!   written to the device.
//! - **`Protocol`**: a device replied with a rejection or a frame the driver
//!   could not parse.
//! - **`FeatureDisabled`**: real hardware was requested from a build without
//!   the corresponding cargo feature.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type GonioResult<T> = std::result::Result<T, GonioError>;

/// Application error type.
#[derive(Error, Debug)]
pub enum GonioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Refusing to home {axis}: position {position_deg:.2} deg is too far from zero")]
    HomingUnsafe {
        /// Axis name as configured (for the operator, not the protocol).
        axis: String,
        /// Device-frame position read back before homing.
        position_deg: f64,
    },

    #[error(
        "Integration time {requested_us} us outside supported range [{min_us}, {max_us}] us"
    )]
    IntegrationTimeOutOfRange {
        /// Value requested in configuration.
        requested_us: u64,
        /// Shortest integration time the device supports.
        min_us: u64,
        /// Longest integration time the device supports.
        max_us: u64,
    },

    #[error("{device} protocol error: {message}")]
    Protocol {
        /// Which device misbehaved ("zaber", "spectrometer", ...).
        device: &'static str,
        /// What went wrong, including any raw reply worth keeping.
        message: String,
    },

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Data processing error: {0}")]
    Processing(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureDisabled(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn homing_message_names_axis_and_position() {
        let err = GonioError::HomingUnsafe {
            axis: "altitude".to_string(),
            position_deg: 231.7,
        };
        let msg = err.to_string();
        assert!(msg.contains("altitude"));
        assert!(msg.contains("231.70"));
    }

    #[test]
    fn integration_time_message_carries_bounds() {
        let err = GonioError::IntegrationTimeOutOfRange {
            requested_us: 5,
            min_us: 10,
            max_us: 10_000_000,
        };
        let msg = err.to_string();
        assert!(msg.contains('5'));
        assert!(msg.contains("10"));
        assert!(msg.contains("10000000"));
    }

    #[test]
    fn io_errors_convert_with_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: GonioError = io.into();
        assert!(matches!(err, GonioError::Io(_)));
    }
}
