//! On-chip EEPROM controller sequences
//!
//! The flash macro of the 1986BE9x is driven bit by bit through the
//! controller's CMD register. Erase and program follow the macro's write
//! sequencer: each CMD value below is one step, and the delays between steps
//! are timing requirements of the memory, not retries.
//!
//! Flash operations report no status. The only way to know that an erase or
//! program worked is to read the data back.

use bitflags::bitflags;

use super::{read_word, write_word, Target, STALL_RETRIES};
use crate::adapter::Adapter;
use crate::adi::ApReg;
use crate::chip::Region;
use crate::error::{Error, Result};

// ============================================================================
// Controller registers
// ============================================================================

/// Command register
pub const EEPROM_CMD: u32 = 0x4001_8000;

/// Word address
pub const EEPROM_ADR: u32 = 0x4001_8004;

/// Data to program
pub const EEPROM_DI: u32 = 0x4001_8008;

/// Data read through the controller
pub const EEPROM_DO: u32 = 0x4001_800C;

/// Unlock key register
pub const EEPROM_KEY: u32 = 0x4001_8010;

/// Value that unlocks register control of the flash
pub const EEPROM_KEY_VALUE: u32 = 0x8AAA_5551;

bitflags! {
    /// Fields of the EEPROM_CMD register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EepromCmd: u32 {
        /// Register control of the flash (programming mode)
        const CON   = 1 << 0;
        /// Write strobe
        const WR    = 1 << 1;
        /// Read strobe
        const RD    = 1 << 2;
        /// Read wait states, bits 5:3
        const DELAY = 0x38;
        /// Row address enable (ADR[16:9])
        const XE    = 1 << 6;
        /// Column address enable (ADR[8:2])
        const YE    = 1 << 7;
        /// Sense amplifier enable
        const SE    = 1 << 8;
        /// Select the information block
        const IFREN = 1 << 9;
        /// Erase the row addressed by ADR[16:9]
        const ERASE = 1 << 10;
        /// With ERASE, erase the whole array
        const MAS1  = 1 << 11;
        /// Program ADR[16:2] from EEPROM_DI
        const PROG  = 1 << 12;
        /// Write/erase high voltage
        const NVSTR = 1 << 13;
    }
}

// ============================================================================
// Timing (milliseconds)
// ============================================================================

/// ERASE to NVSTR setup (5 us on the datasheet)
const ERASE_SETUP_MS: u32 = 1;

/// NVSTR hold after ERASE is dropped (100 us)
const ERASE_RECOVERY_MS: u32 = 1;

/// Final recovery before the next row (1 us)
const ERASE_DONE_MS: u32 = 1;

/// Settle time after a program burst
const PROGRAM_SETTLE_MS: u32 = 10;

/// Erase is issued once per sub-array, selected by ADR[3:2]
const ERASE_OFFSETS: [u32; 4] = [0, 4, 8, 12];

/// DRW reads that flush the controller's read cache
const CACHE_FLUSH_READS: usize = 9;

/// Controller mode for `region`
fn mode(region: Region) -> EepromCmd {
    match region {
        Region::Main => EepromCmd::CON,
        Region::Info => EepromCmd::CON | EepromCmd::IFREN,
    }
}

impl<A: Adapter> Target<A> {
    fn cmd(&mut self, cmd: EepromCmd) -> Result<()> {
        write_word(&mut self.adapter, EEPROM_CMD, cmd.bits())
    }

    fn unlock(&mut self, mode: EepromCmd) -> Result<()> {
        self.cmd(mode)?;
        write_word(&mut self.adapter, EEPROM_KEY, EEPROM_KEY_VALUE)
    }

    /// Erase a whole region
    ///
    /// Holds NVSTR for the chip's mass-erase time on each of the four
    /// sub-arrays, then flushes the read cache at `addr`.
    pub fn erase(&mut self, addr: u32, region: Region) -> Result<()> {
        log::info!("Erase {}: {:08X}", region, addr);
        let hold = self.chip.mass_erase_hold_ms;
        self.erase_rows(addr, region, EepromCmd::MAS1, hold)
    }

    /// Erase the sector containing `addr`
    pub fn erase_block(&mut self, addr: u32, region: Region) -> Result<()> {
        log::debug!("Erase block: {:08X}", addr);
        let hold = self.chip.sector_erase_hold_ms;
        self.erase_rows(addr, region, EepromCmd::empty(), hold)
    }

    fn erase_rows(
        &mut self,
        addr: u32,
        region: Region,
        scope: EepromCmd,
        hold_ms: u32,
    ) -> Result<()> {
        let base = mode(region);
        self.unlock(base)?;
        write_word(&mut self.adapter, EEPROM_DI, u32::MAX)?;

        for offset in ERASE_OFFSETS {
            write_word(&mut self.adapter, EEPROM_ADR, addr.wrapping_add(offset))?;
            self.cmd(base)?;
            self.cmd(base | EepromCmd::WR)?;
            self.cmd(base)?;

            let erase = base | scope | EepromCmd::XE | EepromCmd::ERASE;
            self.cmd(erase)?;
            self.adapter.delay_ms(ERASE_SETUP_MS);
            self.cmd(erase | EepromCmd::NVSTR)?;
            self.adapter.delay_ms(hold_ms);
            self.cmd(base | scope | EepromCmd::XE | EepromCmd::NVSTR)?;
            self.adapter.delay_ms(ERASE_RECOVERY_MS);
            self.cmd(base)?;
            self.adapter.delay_ms(ERASE_DONE_MS);
        }

        self.cmd(EepromCmd::empty())?;
        self.clear_cache(addr)
    }

    /// Program `data` into an erased page starting at `pageaddr`
    pub fn program_block(&mut self, pageaddr: u32, data: &[u32], region: Region) -> Result<()> {
        let base = mode(region);
        self.unlock(base)?;

        let prog = base | EepromCmd::XE | EepromCmd::PROG;
        for (i, &word) in data.iter().enumerate() {
            let addr = pageaddr.wrapping_add(4 * i as u32);
            write_word(&mut self.adapter, EEPROM_ADR, addr)?;
            self.cmd(prog)?;
            self.cmd(prog | EepromCmd::NVSTR)?;
            write_word(&mut self.adapter, EEPROM_DI, word)?;
            self.cmd(prog | EepromCmd::NVSTR | EepromCmd::WR)?;
            self.cmd(prog | EepromCmd::NVSTR)?;
            self.cmd(prog | EepromCmd::NVSTR | EepromCmd::YE)?;
            self.cmd(prog | EepromCmd::NVSTR)?;
            self.cmd(base | EepromCmd::XE | EepromCmd::NVSTR)?;
            self.cmd(base)?;
        }

        self.cmd(EepromCmd::empty())?;
        self.clear_cache(pageaddr)?;
        self.adapter.delay_ms(PROGRAM_SETTLE_MS);
        Ok(())
    }

    /// Read words through EEPROM_DO
    ///
    /// The information block is not mapped on the bus, so each word is
    /// addressed and sensed by hand.
    pub(super) fn read_info(&mut self, addr: u32, data: &mut [u32]) -> Result<()> {
        let base = mode(Region::Info);
        self.unlock(base)?;

        let sense = base | EepromCmd::XE | EepromCmd::YE | EepromCmd::SE;
        for (i, slot) in data.iter_mut().enumerate() {
            let word_addr = addr.wrapping_add(4 * i as u32);
            write_word(&mut self.adapter, EEPROM_ADR, word_addr)?;
            self.cmd(sense)?;

            let mut stalls = 0;
            *slot = loop {
                let value = read_word(&mut self.adapter, EEPROM_DO)?;
                if !self.adapter.stalled() {
                    break value;
                }
                stalls += 1;
                log::warn!("EEPROM_DO read <<<WAIT>>> at 0x{:08X}, retrying", word_addr);
                if stalls >= STALL_RETRIES {
                    return Err(Error::ReadStalled(word_addr));
                }
            };
            self.cmd(base)?;
        }

        self.cmd(EepromCmd::empty())
    }

    /// Read a burst after each erase/program
    ///
    /// Some silicon returns 0xFFFFFFFF for the first words of a freshly
    /// written block until its read cache has been cycled.
    fn clear_cache(&mut self, addr: u32) -> Result<()> {
        self.adapter.ap_write(ApReg::Tar, addr)?;
        for _ in 0..CACHE_FLUSH_READS {
            self.adapter.ap_read(ApReg::Drw)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::tests::{session, Call};

    /// CMD values written, in order
    fn commands(calls: &[Call]) -> Vec<u32> {
        let mut out = Vec::new();
        let mut tar = 0;
        for call in calls {
            match *call {
                Call::ApWrite(ApReg::Tar, addr) => tar = addr,
                Call::ApWrite(ApReg::Drw, value) if tar == EEPROM_CMD => out.push(value),
                _ => {}
            }
        }
        out
    }

    #[test]
    fn test_program_word_sequence() {
        let mut t = session();
        t.program_block(0x0800_0000, &[0x1234_5678], Region::Main)
            .unwrap();
        let calls = &t.adapter_mut().calls;

        let con = EepromCmd::CON;
        let prog = con | EepromCmd::XE | EepromCmd::PROG;
        let nvstr = prog | EepromCmd::NVSTR;
        let expected: Vec<u32> = [
            con,
            prog,
            nvstr,
            nvstr | EepromCmd::WR,
            nvstr,
            nvstr | EepromCmd::YE,
            nvstr,
            con | EepromCmd::XE | EepromCmd::NVSTR,
            con,
            EepromCmd::empty(),
        ]
        .iter()
        .map(|c| c.bits())
        .collect();
        assert_eq!(commands(calls), expected);

        assert!(calls.contains(&Call::ApWrite(ApReg::Drw, EEPROM_KEY_VALUE)));
        assert!(calls.contains(&Call::ApWrite(ApReg::Drw, 0x1234_5678)));
        let reads = calls
            .iter()
            .filter(|c| **c == Call::ApRead(ApReg::Drw))
            .count();
        assert_eq!(reads, CACHE_FLUSH_READS);
        assert_eq!(calls.last(), Some(&Call::Delay(PROGRAM_SETTLE_MS)));
    }

    #[test]
    fn test_sector_erase_holds_nvstr() {
        let mut t = session();
        t.erase_block(0x0800_1000, Region::Main).unwrap();
        let calls = &t.adapter_mut().calls;

        let delays: Vec<u32> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Delay(ms) => Some(*ms),
                _ => None,
            })
            .collect();
        assert_eq!(delays, [1u32, 40, 1, 1].repeat(4));

        let addresses: Vec<u32> = calls
            .windows(2)
            .filter_map(|w| match (&w[0], &w[1]) {
                (Call::ApWrite(ApReg::Tar, EEPROM_ADR), Call::ApWrite(ApReg::Drw, a)) => Some(*a),
                _ => None,
            })
            .collect();
        assert_eq!(
            addresses,
            [0x0800_1000, 0x0800_1004, 0x0800_1008, 0x0800_100C]
        );
    }

    #[test]
    fn test_info_erase_selects_ifren() {
        let mut t = session();
        t.erase(0x0800_0000, Region::Info).unwrap();
        let cmds = commands(&t.adapter_mut().calls);
        let mass = EepromCmd::CON
            | EepromCmd::IFREN
            | EepromCmd::MAS1
            | EepromCmd::XE
            | EepromCmd::ERASE
            | EepromCmd::NVSTR;
        assert_eq!(cmds.iter().filter(|&&c| c == mass.bits()).count(), 4);
    }
}
