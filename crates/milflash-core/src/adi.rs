//! ARM Debug Interface v5 register model
//!
//! JTAG instruction codes, Debug Port and MEM-AP register addresses, and
//! the bit fields of the registers used during bring-up. Cortex-M3 system
//! register addresses used by the session live here too.

use bitflags::bitflags;

// ============================================================================
// JTAG instruction register (4 bits)
// ============================================================================

/// JTAG instructions understood by the JTAG-DP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JtagIr {
    /// AP abort
    Abort = 0x8,
    /// Access to DP registers
    DpAcc = 0xA,
    /// Access to MEM-AP registers
    ApAcc = 0xB,
    /// Select the ID register
    IdCode = 0xE,
    /// Bypass
    Bypass = 0xF,
}

/// Expected IDCODE of the ARM JTAG-DP (ADI v5)
pub const JTAG_DP_IDCODE: u32 = 0x4BA0_0477;

/// Every DP/AP access shifts 2 address bits, RnW and 32 data bits
pub const DPACC_BITS: u32 = 35;

// ============================================================================
// Acknowledge codes
// ============================================================================

/// Three-bit acknowledge returned with every DPACC/APACC shift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// OK/FAULT (0b010)
    Ok,
    /// WAIT (0b001)
    Wait,
    /// Anything else, usually a disconnected or confused TAP
    Invalid(u8),
}

impl Ack {
    /// Decode the low three bits of a captured DR value
    pub fn from_reply(reply: u64) -> Self {
        match (reply & 7) as u8 {
            2 => Ack::Ok,
            1 => Ack::Wait,
            other => Ack::Invalid(other),
        }
    }
}

// ============================================================================
// Debug Port registers
// ============================================================================

/// JTAG-DP registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DpReg {
    /// AP abort (write-only)
    Abort = 0x0,
    /// Control/status
    CtrlStat = 0x4,
    /// AP select
    Select = 0x8,
    /// Read buffer (read-only)
    RdBuff = 0xC,
}

impl DpReg {
    /// Register address
    pub fn addr(self) -> u8 {
        self as u8
    }

    /// Register name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            DpReg::Abort => "ABORT",
            DpReg::CtrlStat => "CTRL/STAT",
            DpReg::Select => "SELECT",
            DpReg::RdBuff => "RDBUFF",
        }
    }
}

bitflags! {
    /// Fields of the DP CTRL/STAT register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CtrlStat: u32 {
        /// Enable overrun detection
        const CORUNDETECT  = 1 << 0;
        /// Overrun detected
        const STICKYORUN   = 1 << 1;
        /// Match in a pushed compare
        const STICKYCMP    = 1 << 4;
        /// Error in an AP transaction
        const STICKYERR    = 1 << 5;
        /// Debug reset request
        const CDBGRSTREQ   = 1 << 26;
        /// Debug reset acknowledge
        const CDBGRSTACK   = 1 << 27;
        /// Debug power-up request
        const CDBGPWRUPREQ = 1 << 28;
        /// Debug power-up acknowledge
        const CDBGPWRUPACK = 1 << 29;
        /// System power-up request
        const CSYSPWRUPREQ = 1 << 30;
        /// System power-up acknowledge
        const CSYSPWRUPACK = 1 << 31;

        /// Power-up requests plus sticky flag clearing, written at bring-up
        const POWER_UP = Self::CSYSPWRUPREQ.bits()
            | Self::CDBGPWRUPREQ.bits()
            | Self::CORUNDETECT.bits()
            | Self::STICKYORUN.bits()
            | Self::STICKYCMP.bits()
            | Self::STICKYERR.bits();
        /// Both power-up acknowledges
        const POWERED = Self::CSYSPWRUPACK.bits() | Self::CDBGPWRUPACK.bits();
    }
}

// ============================================================================
// MEM-AP registers
// ============================================================================

/// MEM-AP registers
///
/// The high nibble of the address is the bank, which must be selected with a
/// prior write of `DP SELECT`; bits 3:2 travel in the APACC shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApReg {
    /// Control/status word
    Csw = 0x00,
    /// Transfer address
    Tar = 0x04,
    /// Data read/write
    Drw = 0x0C,
    /// Banked data +0
    Bd0 = 0x10,
    /// Banked data +4
    Bd1 = 0x14,
    /// Banked data +8
    Bd2 = 0x18,
    /// Banked data +12
    Bd3 = 0x1C,
    /// Configuration (read-only)
    Cfg = 0xF4,
    /// Debug base address (read-only)
    Base = 0xF8,
    /// Identification (read-only)
    Idr = 0xFC,
}

impl ApReg {
    /// Register address
    pub fn addr(self) -> u8 {
        self as u8
    }

    /// Bank to write into `DP SELECT` before accessing this register
    pub fn bank(self) -> u32 {
        (self as u32) & 0xF0
    }

    /// Register name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            ApReg::Csw => "CSW",
            ApReg::Tar => "TAR",
            ApReg::Drw => "DRW",
            ApReg::Bd0 => "BD0",
            ApReg::Bd1 => "BD1",
            ApReg::Bd2 => "BD2",
            ApReg::Bd3 => "BD3",
            ApReg::Cfg => "CFG",
            ApReg::Base => "BASE",
            ApReg::Idr => "IDR",
        }
    }
}

bitflags! {
    /// Fields of the MEM-AP CSW register for Cortex-M3
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Csw: u32 {
        /// 16-bit access size
        const SIZE_16BIT     = 1;
        /// 32-bit access size
        const SIZE_32BIT     = 2;
        /// Single address auto-increment
        const ADDRINC_SINGLE = 1 << 4;
        /// Packed address auto-increment
        const ADDRINC_PACKED = 2 << 4;
        /// MEM transfers permitted
        const DEVICE_EN      = 1 << 6;
        /// Transfer in progress
        const TRIN_PROG      = 1 << 7;
        /// User/privilege control
        const HPROT          = 1 << 25;
        /// Allow the debugger to halt the core
        const MASTER_DEBUG   = 1 << 29;

        /// 32-bit auto-incrementing privileged debug access
        const DEBUG_ACCESS = Self::MASTER_DEBUG.bits()
            | Self::HPROT.bits()
            | Self::SIZE_32BIT.bits()
            | Self::ADDRINC_SINGLE.bits();
    }
}

/// MEM-AP CFG: big-endian memory
pub const CFG_BIGENDIAN: u32 = 1;

/// MEM-AP identifiers known to work (Cortex-M3 AHB-AP)
pub const KNOWN_AP_IDS: &[u32] = &[0x2477_0011];

// ============================================================================
// Cortex-M3 system registers
// ============================================================================

/// Interrupt clear-enable register 0
pub const ICER0: u32 = 0xE000_E180;

/// CPU identification
pub const CPUID: u32 = 0xE000_ED00;

/// Application interrupt and reset control
pub const AIRCR: u32 = 0xE000_ED0C;

/// AIRCR write key
pub const AIRCR_VECTKEY: u32 = 0x05FA << 16;

/// AIRCR system reset request
pub const AIRCR_SYSRESETREQ: u32 = 1 << 2;

/// Debug halting control and status
pub const DHCSR: u32 = 0xE000_EDF0;

bitflags! {
    /// Fields of DHCSR (without the write key)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Dhcsr: u32 {
        /// Enable halting debug
        const C_DEBUGEN  = 1 << 0;
        /// Halt the core
        const C_HALT     = 1 << 1;
        /// Single step
        const C_STEP     = 1 << 2;
        /// Mask interrupts while stepping
        const C_MASKINTS = 1 << 3;
        /// Break a stalled load/store
        const C_SNAPSTALL = 1 << 5;
        /// Register transfer complete
        const S_REGRDY   = 1 << 16;
        /// Core is halted
        const S_HALT     = 1 << 17;
        /// Core is sleeping
        const S_SLEEP    = 1 << 18;
        /// Core is locked up
        const S_LOCKUP   = 1 << 19;

        /// Control bits written to halt the core
        const HALT_REQUEST = Self::C_DEBUGEN.bits()
            | Self::C_HALT.bits()
            | Self::C_MASKINTS.bits()
            | Self::C_SNAPSTALL.bits();
        /// Low 24 bits read back once the core is halted
        const HALTED = Self::HALT_REQUEST.bits()
            | Self::S_REGRDY.bits()
            | Self::S_HALT.bits();
    }
}

/// DHCSR write key
pub const DBGKEY: u32 = 0xA05F << 16;

// ============================================================================
// Milandr 1986BE9x peripherals
// ============================================================================

/// Peripheral clock enable
pub const PER_CLOCK: u32 = 0x4002_001C;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_decode() {
        assert_eq!(Ack::from_reply(0x1234_5672), Ack::Ok);
        assert_eq!(Ack::from_reply(0x1), Ack::Wait);
        assert_eq!(Ack::from_reply(0x7), Ack::Invalid(7));
        assert_eq!(Ack::from_reply(0x0), Ack::Invalid(0));
    }

    #[test]
    fn test_composite_flags() {
        assert_eq!(CtrlStat::POWER_UP.bits(), 0x5000_0033);
        assert_eq!(Csw::DEBUG_ACCESS.bits(), 0x2200_0012);
        assert_eq!(Dhcsr::HALTED.bits(), 0x0003_002B);
    }

    #[test]
    fn test_ap_bank() {
        assert_eq!(ApReg::Idr.bank(), 0xF0);
        assert_eq!(ApReg::Cfg.bank(), 0xF0);
        assert_eq!(ApReg::Drw.bank(), 0x00);
    }
}
