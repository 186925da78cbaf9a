//! milflash-core - Core library for JTAG flash programming
//!
//! This crate holds everything above the wire: the ARM Debug Interface v5
//! register model, the [`Adapter`] trait that JTAG backends implement, the
//! target session (debug power-up, core halt, CPU identification), the
//! on-chip EEPROM controller sequences used to erase and program flash, the
//! program/verify policies, and the loaders for S-record, Intel HEX and raw
//! binary images.
//!
//! # Example
//!
//! ```ignore
//! use milflash_core::{Target, Region};
//!
//! fn dump<A: milflash_core::Adapter>(adapter: A) -> milflash_core::Result<()> {
//!     let mut target = Target::open(adapter)?;
//!     println!("Processor: {}", target.chip().name);
//!
//!     let mut words = [0u32; 16];
//!     target.read_block(target.chip().flash_base, &mut words, Region::Main)?;
//!     target.close()
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod adapter;
pub mod adi;
pub mod chip;
pub mod error;
pub mod image;
pub mod program;
pub mod target;

pub use adapter::Adapter;
pub use chip::{ChipInfo, Region};
pub use error::{Error, Result};
pub use image::Image;
pub use target::Target;
