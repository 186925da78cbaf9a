//! Error types for the MPSSE adapter

use milflash_core::error::Error as CoreError;
use thiserror::Error;

/// Result type for MPSSE operations
pub type Result<T> = std::result::Result<T, MpsseError>;

/// Errors that can occur when driving the MPSSE adapter
#[derive(Debug, Error)]
pub enum MpsseError {
    /// No supported adapter is connected
    #[error("No MPSSE adapter found (Olimex ARM-USB-TINY or ARM-USB-TINY-H)")]
    DeviceNotFound,

    /// Failed to open the device
    #[error("Failed to open adapter: {0}")]
    OpenFailed(String),

    /// Failed to claim the JTAG interface
    #[error("Failed to claim interface: {0}")]
    ClaimFailed(String),

    /// Vendor request during setup failed
    #[error("Failed to configure adapter: {0}")]
    ConfigFailed(String),

    /// Bulk or control transfer failed
    #[error("USB transfer failed: {0}")]
    TransferFailed(String),

    /// The adapter returned fewer bytes than queued reads expect
    #[error("Short reply: got {got} of {expected} bytes")]
    ShortReply {
        /// Bytes received
        got: usize,
        /// Bytes expected
        expected: usize,
    },

    /// Invalid programmer option
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<nusb::Error> for MpsseError {
    fn from(e: nusb::Error) -> Self {
        MpsseError::TransferFailed(e.to_string())
    }
}

impl From<MpsseError> for CoreError {
    fn from(e: MpsseError) -> Self {
        match e {
            MpsseError::DeviceNotFound => CoreError::AdapterNotFound,
            other => CoreError::Transport(other.to_string()),
        }
    }
}
