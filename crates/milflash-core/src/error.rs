//! Error types for milflash-core

use thiserror::Error;

use crate::image::ImageError;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    // Adapter errors
    /// No supported JTAG adapter is connected
    #[error("No JTAG adapter found")]
    AdapterNotFound,

    /// USB transfer or adapter setup failed; JTAG state is lost
    #[error("Adapter transport failed: {0}")]
    Transport(String),

    // Identification errors
    /// IDCODE read back as all zeros or all ones
    #[error("No response from device (IDCODE 0x{0:08X}) -- check power is on!")]
    NoPower(u32),

    /// IDCODE is not the ADI v5 JTAG-DP identifier
    #[error("No response from device -- unknown idcode 0x{0:08X}")]
    UnknownIdcode(u32),

    /// CTRL/STAT never reported both power-up acknowledges
    #[error("Debug power-up not acknowledged, CTRL/STAT=0x{0:08X}")]
    PowerUpTimeout(u32),

    /// MEM-AP identification register has an unexpected value
    #[error("Unknown type of memory access port, IDR=0x{0:08X}")]
    UnknownAccessPort(u32),

    /// Target memory is big-endian
    #[error("Big endian memory type not supported, CFG=0x{0:08X}")]
    BigEndian(u32),

    /// The core did not reach the halted state
    #[error("Cannot halt the processor after {0} attempts")]
    HaltTimeout(u32),

    /// CPUID is not in the chip table
    #[error("Unknown CPUID=0x{0:08X}")]
    UnknownCpu(u32),

    // Operation errors
    /// Read-back word differs from the image
    #[error("error at address 0x{addr:08X}: file=0x{expected:08X}, mem=0x{actual:08X}")]
    VerifyMismatch {
        /// Target address of the word
        addr: u32,
        /// Word from the image
        expected: u32,
        /// Word read from the target
        actual: u32,
    },

    /// A block still failed to verify after all retries
    #[error("Verification failed for block at 0x{addr:08X} ({retries} retries in total)")]
    RetriesExhausted {
        /// Target address of the failing block
        addr: u32,
        /// Retries consumed across the whole run
        retries: u32,
    },

    /// Address range does not fit the selected region
    #[error("Address range 0x{addr:08X}+0x{len:X} outside of {region}")]
    OutOfRange {
        /// Start address
        addr: u32,
        /// Length in bytes
        len: usize,
        /// Region name
        region: &'static str,
    },

    /// MEM-AP kept answering WAIT for a block read
    #[error("MEM-AP read at 0x{0:08X} stalled")]
    ReadStalled(u32),

    /// The user interrupted the operation
    #[error("Interrupted")]
    Interrupted,

    // Image errors
    /// Image file could not be parsed
    #[error(transparent)]
    Image(#[from] ImageError),

    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;
