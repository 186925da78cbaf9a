//! FTDI MPSSE JTAG adapter support for milflash
//!
//! Drives the ARM JTAG-DP of a Cortex-M3 through the MPSSE engine of an
//! FT2232-based adapter (Olimex ARM-USB-TINY and ARM-USB-TINY-H). USB access
//! uses `nusb`, so no libftdi or kernel driver is needed.
//!
//! The crate is layered:
//!
//! - [`protocol`]: USB identifiers, MPSSE opcodes and pin assignments
//! - [`transport`]: the bulk byte pipe, with status bytes stripped
//! - [`encoder`]: JTAG scans to MPSSE commands and back
//! - [`adapter`]: DP/AP register access implementing
//!   [`milflash_core::Adapter`]
//!
//! # Example
//!
//! ```no_run
//! use milflash_core::Target;
//! use milflash_mpsse::parse_options;
//!
//! let config = parse_options(&[("type", "tiny-h")])?;
//! let adapter = milflash_mpsse::open(&config)?;
//! let target = Target::open(adapter)?;
//! println!("{}", target.chip().name);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod adapter;
pub mod encoder;
pub mod error;
pub mod protocol;
pub mod transport;

pub use adapter::{open, parse_options, MpsseAdapter, MpsseConfig};
pub use error::{MpsseError, Result};
pub use protocol::MpsseDeviceType;
pub use transport::{Transport, UsbTransport};
