//! Custom error types for the rig.
//!
//! This module defines the primary error type, `RigError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of errors that can occur, from configuration problems to a device that
//! stopped answering.
//!
//! ## Error Tiers
//!
//! Errors fall into three groups:
//!
//! - **Corrected and reported**: out-of-range amplitudes, cancelled waits and missing
//!   calibration data never become a `RigError`. They are clamped or substituted and
//!   reported through `tracing::warn!`.
//! - **Precondition failures**: `RecorderNotRunning`, `InvalidValvePattern`,
//!   `GasNotConfigured`, `InvalidStimulation`, `ParameterOutOfRange` and friends. These are
//!   raised before any byte is written to the device.
//! - **Connectivity faults**: `AckTimeout`, `NotConnected` and I/O errors on the link.
//!   They are recoverable: the rig stays usable and the caller decides whether to go on.
//!
//! By using `#[from]`, `RigError` can be created from the underlying error types,
//! so the `?` operator works across I/O, CSV, JSON and configuration code.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

#[derive(Error, Debug)]
pub enum RigError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log table error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Device not connected")]
    NotConnected,

    #[error("No acknowledgment from device within {0:?}")]
    AckTimeout(Duration),

    #[error("Malformed frame: {0}")]
    Protocol(String),

    #[error("Parameter '{name}' = {value} does not fit the wire format (max {max})")]
    ParameterOutOfRange {
        name: &'static str,
        value: f64,
        max: u32,
    },

    #[error("Invalid olfactometer valve pattern '{0}': expected 8 characters of '0' or '1'")]
    InvalidValvePattern(String),

    #[error("Gas '{gas}' is not configured. Available: {available}")]
    GasNotConfigured { gas: String, available: String },

    #[error("Odor '{0}' is not configured")]
    OdorNotConfigured(String),

    #[error("Invalid stimulation: {0}")]
    InvalidStimulation(String),

    #[error("GPIO pin {0} out of range (0-7)")]
    InvalidPin(u8),

    #[error("Invalid calibration table: {0}")]
    InvalidCalibration(String),

    #[error("Recorder is not running. Start a run in the acquisition software first")]
    RecorderNotRunning,

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("Recording session is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid plan: {0}")]
    Plan(String),
}

impl From<figment::Error> for RigError {
    fn from(value: figment::Error) -> Self {
        RigError::Config(Box::new(value))
    }
}

impl RigError {
    /// Whether the rig can keep running after this error.
    ///
    /// Connectivity faults and recorder hiccups are recoverable; precondition and
    /// configuration errors mean the caller asked for something that cannot work.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RigError::NotConnected
                | RigError::AckTimeout(_)
                | RigError::Io(_)
                | RigError::Recorder(_)
        )
    }
}
