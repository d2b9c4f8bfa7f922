//! Error types for bleflash.

use std::io;
use thiserror::Error;

/// Result type for bleflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bleflash operations.
///
/// Only [`Error::ImageUnavailable`] and [`Error::AttemptsExhausted`] end an
/// update run. The transport and response errors fail the current attempt and
/// are retried by the updater.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The firmware image could not be loaded.
    #[error("Firmware image unavailable: {0}")]
    ImageUnavailable(String),

    /// No response or delivery confirmation within the time budget.
    #[error("Transport timeout: {0}")]
    TransportTimeout(String),

    /// Malformed or negative response from the device.
    #[error("Device rejected command: {0}")]
    TransportNok(String),

    /// The link dropped without being asked to.
    #[error("Link lost during {0}")]
    LinkLost(String),

    /// Transport-specific failure (connect, write).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Every attempt failed.
    #[error("Firmware update failed after {attempts} attempts")]
    AttemptsExhausted {
        /// Number of attempts made.
        attempts: usize,
    },

    /// The run was stopped by the caller.
    #[error("Update cancelled")]
    Cancelled,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
