//! Target session
//!
//! A [`Target`] owns the adapter for the lifetime of a debug session. Opening
//! one runs the whole bring-up: IDCODE check, debug power-up, MEM-AP checks,
//! core halt and CPU identification. Closing resumes the core, disables the
//! access port and releases the adapter.
//!
//! Flash erase and program sequences live in [`eeprom`].

pub mod eeprom;

use crate::adapter::{Adapter, READ_DATA_MAX_WORDS};
use crate::adi::{
    ApReg, CtrlStat, Csw, Dhcsr, DpReg, AIRCR, AIRCR_SYSRESETREQ, AIRCR_VECTKEY, CFG_BIGENDIAN,
    CPUID, DBGKEY, DHCSR, ICER0, JTAG_DP_IDCODE, KNOWN_AP_IDS, PER_CLOCK,
};
use crate::chip::{find_chip, ChipInfo, Region};
use crate::error::{Error, Result};

/// Attempts at halting the core before giving up
pub const HALT_RETRIES: u32 = 200;

/// Polls of CTRL/STAT while waiting for the power-up acknowledges
pub const POWER_UP_POLLS: u32 = 100;

/// Re-reads of a batch that came back with a WAIT acknowledge
pub const STALL_RETRIES: u32 = 100;

/// MEM-AP address auto-increment is only guaranteed inside 1 KiB
const TAR_WRAP: u32 = 0x400;

/// An open debug session with a halted, identified target
pub struct Target<A: Adapter> {
    adapter: A,
    idcode: u32,
    chip: &'static ChipInfo,
}

impl<A: Adapter> Target<A> {
    /// Bring up a debug session over `adapter`
    ///
    /// On failure the adapter is closed before the error is returned.
    pub fn open(mut adapter: A) -> Result<Self> {
        match bring_up(&mut adapter) {
            Ok((idcode, chip)) => {
                log::info!(
                    "Processor: {} (CPUID 0x{:08X}), flash at 0x{:08X}",
                    chip.name,
                    chip.cpuid,
                    chip.flash_base
                );
                Ok(Self {
                    adapter,
                    idcode,
                    chip,
                })
            }
            Err(e) => {
                if let Err(close_err) = adapter.close() {
                    log::warn!("Failed to close adapter: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// The identified processor
    pub fn chip(&self) -> &'static ChipInfo {
        self.chip
    }

    /// IDCODE of the debug port
    pub fn idcode(&self) -> u32 {
        self.idcode
    }

    /// CPUID of the processor
    pub fn cpuid(&self) -> u32 {
        self.chip.cpuid
    }

    /// Access the underlying adapter
    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    /// Read one word through TAR/DRW
    pub fn read_word(&mut self, addr: u32) -> Result<u32> {
        read_word(&mut self.adapter, addr)
    }

    /// Write one word through TAR/DRW
    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<()> {
        write_word(&mut self.adapter, addr, value)
    }

    /// Read `data.len()` words starting at `addr`
    ///
    /// Main flash and RAM are read directly over the memory bus in pipelined
    /// batches; the info block is read word by word through the EEPROM
    /// controller.
    pub fn read_block(&mut self, addr: u32, data: &mut [u32], region: Region) -> Result<()> {
        match region {
            Region::Main => self.read_direct(addr, data),
            Region::Info => self.read_info(addr, data),
        }
    }

    fn read_direct(&mut self, mut addr: u32, mut data: &mut [u32]) -> Result<()> {
        while !data.is_empty() {
            // A batch must not run past a TAR wrap boundary
            let to_wrap = ((TAR_WRAP - addr % TAR_WRAP) / 4).max(1) as usize;
            let n = data.len().min(READ_DATA_MAX_WORDS).min(to_wrap);
            let (chunk, rest) = std::mem::take(&mut data).split_at_mut(n);
            data = rest;

            let mut stalls = 0;
            loop {
                self.adapter.read_data(addr, chunk)?;
                if !self.adapter.stalled() {
                    break;
                }
                stalls += 1;
                log::warn!("MEM-AP read data <<<WAIT>>> at 0x{:08X}, retrying", addr);
                if stalls >= STALL_RETRIES {
                    return Err(Error::ReadStalled(addr));
                }
            }
            addr = addr.wrapping_add(4 * chunk.len() as u32);
        }
        Ok(())
    }

    /// Write `data` word by word starting at `addr` (RAM or registers)
    pub fn write_block(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        for (i, &word) in data.iter().enumerate() {
            let word_addr = addr.wrapping_add(4 * i as u32);
            if i == 0 || word_addr % TAR_WRAP == 0 {
                self.adapter.ap_write(ApReg::Tar, word_addr)?;
            }
            log::trace!("block write {:08x} to {:08x}", word, word_addr);
            self.adapter.ap_write(ApReg::Drw, word)?;
        }
        Ok(())
    }

    /// End the session: resume the core, disable the AP, release the adapter
    pub fn close(mut self) -> Result<()> {
        let resumed = self.resume();
        let closed = self.adapter.close();
        resumed.and(closed)
    }

    fn resume(&mut self) -> Result<()> {
        self.adapter.reset_cpu()?;
        write_word(&mut self.adapter, DHCSR, DBGKEY)?;
        self.adapter.dp_read(DpReg::CtrlStat)?;
        self.adapter.ap_write(ApReg::Csw, 0)?;
        self.adapter.dp_read(DpReg::CtrlStat)?;
        self.adapter.reset_cpu()
    }
}

fn read_word<A: Adapter>(adapter: &mut A, addr: u32) -> Result<u32> {
    adapter.ap_write(ApReg::Tar, addr)?;
    let value = adapter.ap_read(ApReg::Drw)?;
    log::trace!("word read {:08x} from {:08x}", value, addr);
    Ok(value)
}

fn write_word<A: Adapter>(adapter: &mut A, addr: u32, value: u32) -> Result<()> {
    log::trace!("word write {:08x} to {:08x}", value, addr);
    adapter.ap_write(ApReg::Tar, addr)?;
    adapter.ap_write(ApReg::Drw, value)
}

fn bring_up<A: Adapter>(adapter: &mut A) -> Result<(u32, &'static ChipInfo)> {
    let idcode = adapter.idcode()?;
    log::debug!("idcode {:08X}", idcode);
    if idcode != JTAG_DP_IDCODE {
        return Err(if idcode == 0 || idcode == u32::MAX {
            Error::NoPower(idcode)
        } else {
            Error::UnknownIdcode(idcode)
        });
    }
    adapter.reset_cpu()?;

    power_up(adapter)?;

    adapter.dp_write(DpReg::Select, ApReg::Idr.bank())?;
    let apid = adapter.ap_read(ApReg::Idr)?;
    if !KNOWN_AP_IDS.contains(&apid) {
        return Err(Error::UnknownAccessPort(apid));
    }
    let cfg = adapter.ap_read(ApReg::Cfg)?;
    if cfg & CFG_BIGENDIAN != 0 {
        return Err(Error::BigEndian(cfg));
    }

    adapter.dp_write(DpReg::Select, ApReg::Csw.bank())?;
    adapter.ap_write(ApReg::Csw, Csw::DEBUG_ACCESS.bits())?;
    if log::log_enabled!(log::Level::Debug) {
        let csw = adapter.ap_read(ApReg::Csw)?;
        log::debug!("MEM-AP CSW = {:08x}", csw);
    }

    halt(adapter)?;

    let cpuid = read_word(adapter, CPUID)?;
    let chip = find_chip(cpuid).ok_or(Error::UnknownCpu(cpuid))?;

    // Clock all peripherals and mask their interrupts while the core is held
    write_word(adapter, PER_CLOCK, u32::MAX)?;
    write_word(adapter, ICER0, u32::MAX)?;

    Ok((idcode, chip))
}

/// Request debug and system power, clearing sticky errors
fn power_up<A: Adapter>(adapter: &mut A) -> Result<()> {
    let ctl = CtrlStat::POWER_UP;
    adapter.dp_write(DpReg::CtrlStat, (ctl | CtrlStat::CDBGRSTREQ).bits())?;
    adapter.dp_write(DpReg::CtrlStat, ctl.bits())?;

    let mut status = 0;
    for _ in 0..POWER_UP_POLLS {
        status = adapter.dp_read(DpReg::CtrlStat)?;
        if adapter.stalled() {
            continue;
        }
        if CtrlStat::from_bits_retain(status).contains(CtrlStat::POWERED) {
            log::debug!("CTRL/STAT = {:08x}", status);
            return Ok(());
        }
        adapter.dp_write(DpReg::CtrlStat, ctl.bits())?;
    }
    Err(Error::PowerUpTimeout(status))
}

/// Reset the core into a halted state
fn halt<A: Adapter>(adapter: &mut A) -> Result<()> {
    let ctl = CtrlStat::POWER_UP;
    for attempt in 1..=HALT_RETRIES {
        write_word(adapter, AIRCR, AIRCR_VECTKEY | AIRCR_SYSRESETREQ)?;
        write_word(adapter, AIRCR, AIRCR_VECTKEY)?;
        write_word(adapter, DHCSR, DBGKEY | Dhcsr::HALT_REQUEST.bits())?;

        adapter.dp_read(DpReg::CtrlStat)?;
        if adapter.stalled() {
            log::warn!("Cannot write DHCSR (attempt {}), resetting", attempt);
            adapter.reset_cpu()?;
            continue;
        }

        let dhcsr = read_word(adapter, DHCSR)? & 0x00FF_FFFF;
        if dhcsr == Dhcsr::HALTED.bits() {
            log::debug!("Core halted after {} attempt(s)", attempt);
            return Ok(());
        }
        log::debug!("DHCSR = {:08x}, resetting debug domain", dhcsr);
        adapter.dp_write(DpReg::CtrlStat, (ctl | CtrlStat::CDBGRSTREQ).bits())?;
        adapter.dp_write(DpReg::CtrlStat, ctl.bits())?;
    }

    adapter.ap_write(ApReg::Csw, 0)?;
    Err(Error::HaltTimeout(HALT_RETRIES))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chip::CHIPS;

    /// One adapter call
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        DpWrite(DpReg, u32),
        ApWrite(ApReg, u32),
        ApRead(ApReg),
        ReadData(u32, usize),
        Delay(u32),
    }

    /// Records every call; reads return zero and never stall
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub calls: Vec<Call>,
    }

    impl Adapter for Recorder {
        fn idcode(&mut self) -> Result<u32> {
            Ok(JTAG_DP_IDCODE)
        }

        fn reset_cpu(&mut self) -> Result<()> {
            Ok(())
        }

        fn dp_write(&mut self, reg: DpReg, value: u32) -> Result<()> {
            self.calls.push(Call::DpWrite(reg, value));
            Ok(())
        }

        fn dp_read(&mut self, _reg: DpReg) -> Result<u32> {
            Ok(0)
        }

        fn ap_write(&mut self, reg: ApReg, value: u32) -> Result<()> {
            self.calls.push(Call::ApWrite(reg, value));
            Ok(())
        }

        fn ap_read(&mut self, reg: ApReg) -> Result<u32> {
            self.calls.push(Call::ApRead(reg));
            Ok(0)
        }

        fn read_data(&mut self, addr: u32, data: &mut [u32]) -> Result<()> {
            self.calls.push(Call::ReadData(addr, data.len()));
            Ok(())
        }

        fn stalled(&self) -> bool {
            false
        }

        fn delay_ms(&mut self, ms: u32) {
            self.calls.push(Call::Delay(ms));
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// A session on an already halted chip
    pub(crate) fn session() -> Target<Recorder> {
        Target {
            adapter: Recorder::default(),
            idcode: JTAG_DP_IDCODE,
            chip: &CHIPS[0],
        }
    }

    #[test]
    fn test_read_batches_stop_at_tar_wrap() {
        let mut t = session();
        let mut words = [0u32; 30];
        t.read_block(0x0800_03D8, &mut words, Region::Main).unwrap();
        assert_eq!(
            t.adapter.calls,
            [
                Call::ReadData(0x0800_03D8, 10),
                Call::ReadData(0x0800_0400, 10),
                Call::ReadData(0x0800_0428, 10),
            ]
        );

        let mut t = session();
        let mut words = [0u32; 12];
        t.read_block(0x2000_03F0, &mut words, Region::Main).unwrap();
        assert_eq!(
            t.adapter.calls,
            [
                Call::ReadData(0x2000_03F0, 4),
                Call::ReadData(0x2000_0400, 8),
            ]
        );
    }

    #[test]
    fn test_write_block_reloads_tar() {
        let mut t = session();
        t.write_block(0x2000_03F8, &[1, 2, 3]).unwrap();
        assert_eq!(
            t.adapter.calls,
            [
                Call::ApWrite(ApReg::Tar, 0x2000_03F8),
                Call::ApWrite(ApReg::Drw, 1),
                Call::ApWrite(ApReg::Drw, 2),
                Call::ApWrite(ApReg::Tar, 0x2000_0400),
                Call::ApWrite(ApReg::Drw, 3),
            ]
        );
    }
}
