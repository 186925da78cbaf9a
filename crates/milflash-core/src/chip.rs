//! Supported processors
//!
//! Bring-up is the same for every chip; only the constants below differ.

use std::fmt;

/// Flash array selected for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Region {
    /// Main program flash, memory-mapped for reading
    #[default]
    Main,
    /// Information block, only reachable through the EEPROM controller
    Info,
}

impl Region {
    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Region::Main => "main flash",
            Region::Info => "info flash",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identified processor and its flash geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    /// Value of the Cortex-M CPUID register
    pub cpuid: u32,
    /// Processor name
    pub name: &'static str,
    /// Address of the first flash byte
    pub flash_base: u32,
    /// Size of the main flash in bytes
    pub main_size: u32,
    /// Size of the information block in bytes
    pub info_size: u32,
    /// Erase sector size in bytes
    pub sector_size: u32,
    /// NVSTR hold time for a whole-array erase, in milliseconds
    pub mass_erase_hold_ms: u32,
    /// NVSTR hold time for a sector erase, in milliseconds
    pub sector_erase_hold_ms: u32,
}

impl ChipInfo {
    /// Size of `region` in bytes
    pub fn region_size(&self, region: Region) -> u32 {
        match region {
            Region::Main => self.main_size,
            Region::Info => self.info_size,
        }
    }

    /// Whether `[addr, addr + len)` lies inside `region`
    pub fn contains(&self, region: Region, addr: u32, len: usize) -> bool {
        let start = self.flash_base as u64;
        let end = start + self.region_size(region) as u64;
        let addr = addr as u64;
        addr >= start && addr + len as u64 <= end
    }
}

/// Known processors
pub const CHIPS: &[ChipInfo] = &[ChipInfo {
    cpuid: 0x412F_C230,
    name: "Milandr 1986BE9x",
    flash_base: 0x0800_0000,
    main_size: 128 * 1024,
    info_size: 4 * 1024,
    sector_size: 4 * 1024,
    mass_erase_hold_ms: 40,
    sector_erase_hold_ms: 40,
}];

/// Look up a processor by CPUID
pub fn find_chip(cpuid: u32) -> Option<&'static ChipInfo> {
    CHIPS.iter().find(|c| c.cpuid == cpuid)
}
