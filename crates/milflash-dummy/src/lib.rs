//! milflash-dummy - Simulated Milandr Cortex-M3 target for testing
//!
//! This crate provides an [`Adapter`] that answers DP and MEM-AP accesses
//! from memory instead of a JTAG cable. Behind it sits a small model of the
//! chip: the debug port power handshake, the AP identification registers,
//! DHCSR halt handling, SRAM, and the EEPROM controller with its main and
//! information arrays. Erase and program only take effect when the
//! controller sees the right command sequence, so the flash sequences of
//! `milflash-core` can be tested end to end without hardware.
//!
//! Clones share the same chip, so a `connect` closure can hand out a fresh
//! adapter per session while the test keeps a handle for inspection.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use milflash_core::adapter::{Adapter, READ_DATA_MAX_WORDS};
use milflash_core::adi::{
    ApReg, CtrlStat, Csw, Dhcsr, DpReg, AIRCR, AIRCR_SYSRESETREQ, AIRCR_VECTKEY, CPUID, DBGKEY,
    DHCSR, JTAG_DP_IDCODE, KNOWN_AP_IDS,
};
use milflash_core::chip::{Region, CHIPS};
use milflash_core::error::Result;
use milflash_core::target::eeprom::{
    EepromCmd, EEPROM_ADR, EEPROM_CMD, EEPROM_DI, EEPROM_DO, EEPROM_KEY, EEPROM_KEY_VALUE,
};

/// Start of the on-chip SRAM
pub const SRAM_BASE: u32 = 0x2000_0000;

/// Size of the on-chip SRAM in bytes
pub const SRAM_SIZE: u32 = 32 * 1024;

/// Configuration for the simulated chip
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Value returned by the IDCODE scan
    pub idcode: u32,
    /// MEM-AP identification register
    pub ap_id: u32,
    /// MEM-AP configuration register
    pub ap_cfg: u32,
    /// Value of the CPUID register
    pub cpuid: u32,
    /// Whether the power-up request is ever acknowledged
    pub power_ack: bool,
    /// DHCSR reads that still show the core running after a halt request
    pub halt_delay: u32,
    /// Address of the first flash byte
    pub flash_base: u32,
    /// Main flash size in bytes
    pub main_size: u32,
    /// Information block size in bytes
    pub info_size: u32,
    /// Erase sector size in bytes
    pub sector_size: u32,
}

impl Default for DummyConfig {
    fn default() -> Self {
        let chip = &CHIPS[0];
        Self {
            idcode: JTAG_DP_IDCODE,
            ap_id: KNOWN_AP_IDS[0],
            ap_cfg: 0,
            cpuid: chip.cpuid,
            power_ack: true,
            halt_delay: 0,
            flash_base: chip.flash_base,
            main_size: chip.main_size,
            info_size: chip.info_size,
            sector_size: chip.sector_size,
        }
    }
}

/// A flash operation carried out by the EEPROM controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    /// Whole-array erase of one sub-array
    MassErase {
        /// Array erased
        region: Region,
        /// Value of EEPROM_ADR
        addr: u32,
    },
    /// Sector erase of one sub-array
    SectorErase {
        /// Array erased
        region: Region,
        /// Value of EEPROM_ADR
        addr: u32,
    },
}

/// EEPROM controller registers
#[derive(Debug)]
struct Eeprom {
    cmd: EepromCmd,
    adr: u32,
    di: u32,
    dout: u32,
    unlocked: bool,
}

impl Eeprom {
    fn new() -> Self {
        Self {
            cmd: EepromCmd::empty(),
            adr: 0,
            di: 0,
            dout: 0,
            unlocked: false,
        }
    }
}

/// Chip state shared between clones
struct Chip {
    config: DummyConfig,

    // Debug port and MEM-AP
    select: u32,
    ctrl_stat: u32,
    csw: u32,
    tar: u32,
    stalled: bool,
    stall_reads: u32,

    // Core
    halt_requested: bool,
    halt_countdown: u32,
    dhcsr: u32,
    other_regs: Vec<(u32, u32)>,

    // Memories
    sram: Vec<u8>,
    main: Vec<u8>,
    info: Vec<u8>,
    eeprom: Eeprom,
    program_faults: HashSet<u32>,

    // Observations
    delays: Vec<u32>,
    flash_ops: Vec<FlashOp>,
    programmed_words: usize,
    resets: u32,
    sessions_opened: u32,
    sessions_closed: u32,
}

impl Chip {
    fn new(config: DummyConfig) -> Self {
        Self {
            sram: vec![0; SRAM_SIZE as usize],
            main: vec![0xFF; config.main_size as usize],
            info: vec![0xFF; config.info_size as usize],
            halt_countdown: config.halt_delay,
            config,
            select: 0,
            ctrl_stat: 0,
            csw: 0,
            tar: 0,
            stalled: false,
            stall_reads: 0,
            halt_requested: false,
            dhcsr: 0,
            other_regs: Vec::new(),
            eeprom: Eeprom::new(),
            program_faults: HashSet::new(),
            delays: Vec::new(),
            flash_ops: Vec::new(),
            programmed_words: 0,
            resets: 0,
            sessions_opened: 0,
            sessions_closed: 0,
        }
    }

    /// Consume one injected stall, if any
    fn take_stall(&mut self) -> bool {
        if self.stall_reads > 0 {
            self.stall_reads -= 1;
            true
        } else {
            false
        }
    }

    fn bank_selected(&self, reg: ApReg) -> bool {
        if self.select & 0xF0 == reg.bank() {
            return true;
        }
        log::warn!(
            "dummy: {} accessed with SELECT bank {:02x}",
            reg.name(),
            self.select & 0xF0
        );
        false
    }

    /// Advance TAR after a DRW access, wrapping inside 1 KiB
    fn increment_tar(&mut self) {
        if self.csw & (Csw::ADDRINC_SINGLE | Csw::ADDRINC_PACKED).bits()
            == Csw::ADDRINC_SINGLE.bits()
        {
            self.tar = (self.tar & !0x3FF) | (self.tar.wrapping_add(4) & 0x3FF);
        }
    }

    fn array(&self, region: Region) -> &[u8] {
        match region {
            Region::Main => &self.main,
            Region::Info => &self.info,
        }
    }

    fn array_mut(&mut self, region: Region) -> &mut [u8] {
        match region {
            Region::Main => &mut self.main,
            Region::Info => &mut self.info,
        }
    }

    /// Byte offset of `addr` inside `region`, if it falls inside it
    fn flash_offset(&self, region: Region, addr: u32) -> Option<usize> {
        let offset = addr.wrapping_sub(self.config.flash_base) as usize;
        (offset < self.array(region).len()).then_some(offset & !3)
    }

    fn read_mem(&mut self, addr: u32) -> u32 {
        let base = self.config.flash_base;
        if addr >= base && addr - base < self.config.main_size {
            return word_at(&self.main, (addr - base) as usize & !3);
        }
        if (SRAM_BASE..SRAM_BASE + SRAM_SIZE).contains(&addr) {
            return word_at(&self.sram, (addr - SRAM_BASE) as usize & !3);
        }
        match addr {
            CPUID => self.config.cpuid,
            DHCSR => self.read_dhcsr(),
            EEPROM_CMD => self.eeprom.cmd.bits(),
            EEPROM_ADR => self.eeprom.adr,
            EEPROM_DI => self.eeprom.di,
            EEPROM_DO => self.eeprom.dout,
            _ => self
                .other_regs
                .iter()
                .find(|(a, _)| *a == addr)
                .map_or(0, |&(_, v)| v),
        }
    }

    fn write_mem(&mut self, addr: u32, value: u32) {
        let base = self.config.flash_base;
        if addr >= base && addr - base < self.config.main_size {
            log::warn!("dummy: bus write to flash at {:08x} ignored", addr);
            return;
        }
        if (SRAM_BASE..SRAM_BASE + SRAM_SIZE).contains(&addr) {
            let offset = (addr - SRAM_BASE) as usize & !3;
            self.sram[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            return;
        }
        match addr {
            DHCSR => self.write_dhcsr(value),
            AIRCR => {
                if value == AIRCR_VECTKEY | AIRCR_SYSRESETREQ {
                    self.halt_requested = false;
                    self.dhcsr = 0;
                }
            }
            EEPROM_CMD => self.eeprom_cmd(EepromCmd::from_bits_retain(value)),
            EEPROM_ADR => self.eeprom.adr = value,
            EEPROM_DI => self.eeprom.di = value,
            EEPROM_KEY => {
                self.eeprom.unlocked =
                    value == EEPROM_KEY_VALUE && self.eeprom.cmd.contains(EepromCmd::CON);
            }
            _ => match self.other_regs.iter_mut().find(|(a, _)| *a == addr) {
                Some(slot) => slot.1 = value,
                None => self.other_regs.push((addr, value)),
            },
        }
    }

    fn write_dhcsr(&mut self, value: u32) {
        if value & 0xFFFF_0000 != DBGKEY {
            return;
        }
        let ctl = Dhcsr::from_bits_truncate(value & 0xFFFF);
        self.dhcsr = ctl.bits();
        self.halt_requested = ctl.contains(Dhcsr::C_DEBUGEN | Dhcsr::C_HALT);
    }

    fn read_dhcsr(&mut self) -> u32 {
        if !self.halt_requested {
            return self.dhcsr;
        }
        if self.halt_countdown > 0 {
            self.halt_countdown -= 1;
            return self.dhcsr;
        }
        self.dhcsr | Dhcsr::HALTED.bits()
    }

    /// React to a new EEPROM_CMD value
    ///
    /// Erase happens when NVSTR rises with ERASE set; a program pulse when YE
    /// rises with PROG and NVSTR set; a sense read whenever XE, YE and SE are
    /// all set.
    fn eeprom_cmd(&mut self, cmd: EepromCmd) {
        let prev = self.eeprom.cmd;
        self.eeprom.cmd = cmd;
        if !cmd.contains(EepromCmd::CON) {
            self.eeprom.unlocked = false;
            return;
        }
        if !self.eeprom.unlocked {
            return;
        }

        let region = if cmd.contains(EepromCmd::IFREN) {
            Region::Info
        } else {
            Region::Main
        };
        let rising = |bit: EepromCmd| cmd.contains(bit) && !prev.contains(bit);
        let adr = self.eeprom.adr;

        if cmd.contains(EepromCmd::ERASE | EepromCmd::XE) && rising(EepromCmd::NVSTR) {
            let mass = cmd.contains(EepromCmd::MAS1);
            self.erase(region, adr, mass);
            self.flash_ops.push(if mass {
                FlashOp::MassErase { region, addr: adr }
            } else {
                FlashOp::SectorErase { region, addr: adr }
            });
        }

        if cmd.contains(EepromCmd::PROG | EepromCmd::NVSTR | EepromCmd::XE)
            && rising(EepromCmd::YE)
        {
            self.program(region, adr);
        }

        if cmd.contains(EepromCmd::XE | EepromCmd::YE | EepromCmd::SE)
            && !cmd.contains(EepromCmd::PROG)
        {
            self.eeprom.dout = match self.flash_offset(region, adr) {
                Some(offset) => word_at(self.array(region), offset),
                None => 0,
            };
        }
    }

    /// Erase one sub-array, selected by ADR[3:2], of a sector or the whole
    /// region
    fn erase(&mut self, region: Region, adr: u32, mass: bool) {
        let Some(offset) = self.flash_offset(region, adr) else {
            log::warn!("dummy: erase outside {} at {:08x}", region, adr);
            return;
        };
        let sub_array = (adr >> 2) & 3;
        let sector = self.config.sector_size as usize;
        let array = self.array_mut(region);
        let range = if mass || region == Region::Info {
            0..array.len()
        } else {
            let start = offset & !(sector - 1);
            start..(start + sector).min(array.len())
        };
        for word in range.step_by(4) {
            if ((word as u32) >> 2) & 3 == sub_array {
                array[word..word + 4].fill(0xFF);
            }
        }
    }

    fn program(&mut self, region: Region, adr: u32) {
        let Some(offset) = self.flash_offset(region, adr) else {
            log::warn!("dummy: program outside {} at {:08x}", region, adr);
            return;
        };
        if self.program_faults.remove(&adr) {
            log::debug!("dummy: dropping program pulse at {:08x}", adr);
            return;
        }
        let di = self.eeprom.di.to_le_bytes();
        let array = self.array_mut(region);
        for (byte, bits) in array[offset..offset + 4].iter_mut().zip(di) {
            *byte &= bits;
        }
        self.programmed_words += 1;
    }
}

fn word_at(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Simulated target behind an [`Adapter`]
///
/// Cloning yields another handle to the same chip.
#[derive(Clone)]
pub struct DummyTarget {
    chip: Rc<RefCell<Chip>>,
}

impl DummyTarget {
    /// Create a target with the given configuration, flash erased
    pub fn new(config: DummyConfig) -> Self {
        Self {
            chip: Rc::new(RefCell::new(Chip::new(config))),
        }
    }

    /// Create a target that identifies as the default 1986BE9x
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Create a target with pre-filled main flash
    pub fn with_flash(config: DummyConfig, initial_data: &[u8]) -> Self {
        let target = Self::new(config);
        {
            let mut chip = target.chip.borrow_mut();
            let len = initial_data.len().min(chip.main.len());
            chip.main[..len].copy_from_slice(&initial_data[..len]);
        }
        target
    }

    /// Contents of a flash array
    pub fn flash(&self, region: Region) -> Vec<u8> {
        self.chip.borrow().array(region).to_vec()
    }

    /// Contents of the SRAM
    pub fn sram(&self) -> Vec<u8> {
        self.chip.borrow().sram.clone()
    }

    /// Drop the next program pulse aimed at the word at `addr`
    pub fn fail_program_once(&self, addr: u32) {
        self.chip.borrow_mut().program_faults.insert(addr);
    }

    /// Answer the next `count` pipelined data reads with a WAIT
    pub fn stall_data_reads(&self, count: u32) {
        self.chip.borrow_mut().stall_reads = count;
    }

    /// Every delay requested so far, in milliseconds
    pub fn delays(&self) -> Vec<u32> {
        self.chip.borrow().delays.clone()
    }

    /// Erases carried out so far
    pub fn flash_ops(&self) -> Vec<FlashOp> {
        self.chip.borrow().flash_ops.clone()
    }

    /// Number of words the controller has programmed
    pub fn programmed_words(&self) -> usize {
        self.chip.borrow().programmed_words
    }

    /// Number of system reset pulses
    pub fn resets(&self) -> u32 {
        self.chip.borrow().resets
    }

    /// Sessions started (IDCODE scans) and closed
    pub fn sessions(&self) -> (u32, u32) {
        let chip = self.chip.borrow();
        (chip.sessions_opened, chip.sessions_closed)
    }

    /// Whether the core is currently halted
    pub fn halted(&self) -> bool {
        let chip = self.chip.borrow();
        chip.halt_requested && chip.halt_countdown == 0
    }
}

impl Adapter for DummyTarget {
    fn idcode(&mut self) -> Result<u32> {
        let mut chip = self.chip.borrow_mut();
        chip.sessions_opened += 1;
        Ok(chip.config.idcode)
    }

    fn reset_cpu(&mut self) -> Result<()> {
        self.chip.borrow_mut().resets += 1;
        Ok(())
    }

    fn dp_write(&mut self, reg: DpReg, value: u32) -> Result<()> {
        log::trace!("dummy: DP write {:08x} to {}", value, reg.name());
        let mut chip = self.chip.borrow_mut();
        match reg {
            DpReg::CtrlStat => chip.ctrl_stat = value,
            DpReg::Select => chip.select = value,
            DpReg::Abort | DpReg::RdBuff => {}
        }
        Ok(())
    }

    fn dp_read(&mut self, reg: DpReg) -> Result<u32> {
        let mut chip = self.chip.borrow_mut();
        chip.stalled = false;
        let value = match reg {
            DpReg::CtrlStat => {
                let requested = CtrlStat::from_bits_retain(chip.ctrl_stat);
                let mut status = requested & !CtrlStat::CDBGRSTREQ;
                if chip.config.power_ack {
                    if requested.contains(CtrlStat::CSYSPWRUPREQ) {
                        status |= CtrlStat::CSYSPWRUPACK;
                    }
                    if requested.contains(CtrlStat::CDBGPWRUPREQ) {
                        status |= CtrlStat::CDBGPWRUPACK;
                    }
                }
                status.bits()
            }
            DpReg::Select => chip.select,
            DpReg::Abort | DpReg::RdBuff => 0,
        };
        log::trace!("dummy: DP read {:08x} from {}", value, reg.name());
        Ok(value)
    }

    fn ap_write(&mut self, reg: ApReg, value: u32) -> Result<()> {
        log::trace!("dummy: MEM-AP write {:08x} to {}", value, reg.name());
        let mut chip = self.chip.borrow_mut();
        if !chip.bank_selected(reg) {
            return Ok(());
        }
        match reg {
            ApReg::Csw => chip.csw = value,
            ApReg::Tar => chip.tar = value,
            ApReg::Drw => {
                let tar = chip.tar;
                chip.write_mem(tar, value);
                chip.increment_tar();
            }
            _ => {}
        }
        Ok(())
    }

    fn ap_read(&mut self, reg: ApReg) -> Result<u32> {
        let mut chip = self.chip.borrow_mut();
        chip.stalled = false;
        if !chip.bank_selected(reg) {
            return Ok(0);
        }
        let value = match reg {
            ApReg::Csw => chip.csw,
            ApReg::Tar => chip.tar,
            ApReg::Drw => {
                let tar = chip.tar;
                let value = chip.read_mem(tar);
                chip.increment_tar();
                value
            }
            ApReg::Cfg => chip.config.ap_cfg,
            ApReg::Idr => chip.config.ap_id,
            _ => 0,
        };
        log::trace!("dummy: MEM-AP read {:08x} from {}", value, reg.name());
        Ok(value)
    }

    fn read_data(&mut self, addr: u32, data: &mut [u32]) -> Result<()> {
        debug_assert!(data.len() <= READ_DATA_MAX_WORDS);
        let mut chip = self.chip.borrow_mut();
        chip.tar = addr;
        chip.stalled = chip.take_stall();
        for slot in data.iter_mut() {
            let tar = chip.tar;
            *slot = if chip.stalled { 0 } else { chip.read_mem(tar) };
            chip.increment_tar();
        }
        Ok(())
    }

    fn stalled(&self) -> bool {
        self.chip.borrow().stalled
    }

    fn delay_ms(&mut self, ms: u32) {
        self.chip.borrow_mut().delays.push(ms);
    }

    fn close(&mut self) -> Result<()> {
        let mut chip = self.chip.borrow_mut();
        chip.sessions_closed += 1;
        chip.csw = 0;
        Ok(())
    }
}
