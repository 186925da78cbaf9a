//! JTAG adapter trait
//!
//! The target session only talks to the chip through this trait, so the
//! MPSSE backend and the in-memory simulator are interchangeable.

use crate::adi::{ApReg, DpReg};
use crate::error::Result;

/// Maximum number of words a single [`Adapter::read_data`] call may fetch
///
/// Larger batches overflow the adapter's reply buffer.
pub const READ_DATA_MAX_WORDS: usize = 10;

/// A JTAG adapter connected to an ARM JTAG-DP
///
/// Register accesses follow the ADI v5 pipeline: a read's value and
/// acknowledge arrive with the next shift, so implementations follow every
/// targeted read with a read of `RDBUFF` to flush it out.
///
/// Reads whose acknowledge is not accepted return zero and set the stalled
/// flag; the caller must reissue the preceding transaction. Transport errors
/// are returned as `Err` and are not retryable.
pub trait Adapter {
    /// Reset the TAP controller and read the 32-bit IDCODE
    fn idcode(&mut self) -> Result<u32>;

    /// Pulse the system reset line, dropping any queued transaction
    fn reset_cpu(&mut self) -> Result<()>;

    /// Posted write of a DP register (no acknowledge check)
    fn dp_write(&mut self, reg: DpReg, value: u32) -> Result<()>;

    /// Read a DP register
    ///
    /// OK and WAIT acknowledges both count as success here.
    fn dp_read(&mut self, reg: DpReg) -> Result<u32>;

    /// Posted write of a MEM-AP register in the currently selected bank
    fn ap_write(&mut self, reg: ApReg, value: u32) -> Result<()>;

    /// Read a MEM-AP register in the currently selected bank
    ///
    /// Only the OK acknowledge counts as success.
    fn ap_read(&mut self, reg: ApReg) -> Result<u32>;

    /// Pipelined read of `data.len()` consecutive words starting at `addr`
    ///
    /// `data.len()` must not exceed [`READ_DATA_MAX_WORDS`]. The stalled flag
    /// reflects the acknowledge of the last word.
    fn read_data(&mut self, addr: u32, data: &mut [u32]) -> Result<()>;

    /// Whether the last read was answered with an unaccepted acknowledge
    fn stalled(&self) -> bool;

    /// Block for `ms` milliseconds
    ///
    /// Flash timing goes through here so a simulator can record it.
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }

    /// Flush pending commands and release the adapter
    fn close(&mut self) -> Result<()>;
}

impl<A: Adapter + ?Sized> Adapter for Box<A> {
    fn idcode(&mut self) -> Result<u32> {
        (**self).idcode()
    }

    fn reset_cpu(&mut self) -> Result<()> {
        (**self).reset_cpu()
    }

    fn dp_write(&mut self, reg: DpReg, value: u32) -> Result<()> {
        (**self).dp_write(reg, value)
    }

    fn dp_read(&mut self, reg: DpReg) -> Result<u32> {
        (**self).dp_read(reg)
    }

    fn ap_write(&mut self, reg: ApReg, value: u32) -> Result<()> {
        (**self).ap_write(reg, value)
    }

    fn ap_read(&mut self, reg: ApReg) -> Result<u32> {
        (**self).ap_read(reg)
    }

    fn read_data(&mut self, addr: u32, data: &mut [u32]) -> Result<()> {
        (**self).read_data(addr, data)
    }

    fn stalled(&self) -> bool {
        (**self).stalled()
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
