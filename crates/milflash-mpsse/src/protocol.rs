//! FTDI MPSSE protocol constants
//!
//! Based on the FTDI MPSSE command reference (AN_108) and the SIO vendor
//! requests of the FT2232 family.

// ============================================================================
// USB VID/PID constants
// ============================================================================

/// Olimex vendor ID
pub const OLIMEX_VID: u16 = 0x15BA;

/// Olimex ARM-USB-TINY product ID
pub const OLIMEX_ARM_TINY_PID: u16 = 0x0004;

/// Olimex ARM-USB-TINY-H product ID
pub const OLIMEX_ARM_TINY_H_PID: u16 = 0x002A;

/// Interface carrying the JTAG channel (channel A)
pub const JTAG_INTERFACE: u8 = 0;

/// Bulk OUT endpoint of channel A
pub const BULK_OUT_EP: u8 = 0x02;

/// Bulk IN endpoint of channel A
pub const BULK_IN_EP: u8 = 0x81;

// ============================================================================
// SIO vendor requests
// ============================================================================

/// Reset the port
pub const SIO_RESET: u8 = 0;

/// Set the latency timer
pub const SIO_SET_LATENCY_TIMER: u8 = 9;

/// Read the latency timer
pub const SIO_GET_LATENCY_TIMER: u8 = 10;

/// Set the bit mode
pub const SIO_SET_BITMODE: u8 = 11;

/// `wValue` of SIO_RESET: reset the SIO part
pub const SIO_RESET_SIO: u16 = 0;

/// `wValue` of SIO_SET_BITMODE: MPSSE mode, pins 0, 1, 3 as outputs
pub const BITMODE_MPSSE: u16 = 0x020B;

/// `wIndex` addressing channel A in vendor requests
pub const CHANNEL_A: u16 = 1;

// ============================================================================
// MPSSE shift opcode flags
// ============================================================================

/// Write on the negative clock edge
pub const CLKWNEG: u8 = 0x01;

/// Bit mode (transfer bits instead of bytes)
pub const BITMODE: u8 = 0x02;

/// LSB first
pub const LSB: u8 = 0x08;

/// Write TDI
pub const WTDI: u8 = 0x10;

/// Read TDO
pub const RTDO: u8 = 0x20;

/// Write TMS
pub const WTMS: u8 = 0x40;

/// Clock bits out on TMS (0x4b)
pub const TMS_OUT: u8 = WTMS | BITMODE | CLKWNEG | LSB;

/// Clock bits out on TMS while reading TDO (0x6b)
pub const TMS_OUT_IN: u8 = WTMS | RTDO | BITMODE | CLKWNEG | LSB;

/// Clock bytes out on TDI (0x19)
pub const BYTES_OUT: u8 = WTDI | CLKWNEG | LSB;

/// Clock bytes out on TDI while reading TDO (0x39)
pub const BYTES_OUT_IN: u8 = WTDI | RTDO | CLKWNEG | LSB;

/// Clock bits out on TDI (0x1b)
pub const BITS_OUT: u8 = WTDI | BITMODE | CLKWNEG | LSB;

/// Clock bits out on TDI while reading TDO (0x3b)
pub const BITS_OUT_IN: u8 = WTDI | RTDO | BITMODE | CLKWNEG | LSB;

// ============================================================================
// MPSSE setup commands
// ============================================================================

/// Set data bits low byte
pub const SET_BITS_LOW: u8 = 0x80;

/// Set data bits high byte
pub const SET_BITS_HIGH: u8 = 0x82;

/// Disable loopback mode
pub const LOOPBACK_END: u8 = 0x85;

/// Set clock divisor
pub const TCK_DIVISOR: u8 = 0x86;

// ============================================================================
// Buffer sizes and timeouts
// ============================================================================

/// Size of the command buffer sent in one bulk transfer
pub const OUTPUT_BUFFER_SIZE: usize = 4096;

/// Largest command sequence emitted for one shift (6 + 8 + 3 + 3 + 3)
pub const MAX_SHIFT_PACKET: usize = 23;

/// Status bytes prefixed to every bulk IN packet
pub const MODEM_STATUS_SIZE: usize = 2;

/// Bulk OUT timeout in milliseconds
pub const WRITE_TIMEOUT_MS: u64 = 1000;

/// Bulk IN timeout in milliseconds
pub const READ_TIMEOUT_MS: u64 = 2000;

/// Control transfer timeout in milliseconds
pub const CONTROL_TIMEOUT_MS: u64 = 1000;

// ============================================================================
// Pin assignments
//
// Low byte: TCK is bit 0, TDI bit 1, TDO bit 2, TMS bit 3, GPIOL0 bit 4.
// High byte on the ARM-USB-TINY: nTRST bit 0, nSRST bit 1, LED bit 3.
// ============================================================================

/// Low byte output: TMS high, TCK idle low
pub const LOW_OUTPUT: u8 = 0x08;

/// Low byte direction: TCK, TDI, TMS, GPIOL0 outputs
pub const LOW_DIRECTION: u8 = 0x1B;

/// High byte direction: nTRST, nSRST, bits 2 and 3 outputs
pub const HIGH_DIRECTION: u8 = 0x0F;

/// High byte: TRST released
pub const HIGH_TRST_N: u8 = 0x01;

/// High byte: system reset asserted
pub const HIGH_SRST: u8 = 0x02;

/// High byte: LED on
pub const HIGH_LED: u8 = 0x08;

/// MPSSE base clock of the full-speed FT2232 in Hz
pub const BASE_CLOCK_HZ: u32 = 6_000_000;

/// Default TCK divisor (3 MHz, 500 ns between edges)
pub const DEFAULT_DIVISOR: u16 = 1;

/// Default latency timer in milliseconds
pub const DEFAULT_LATENCY: u8 = 1;

// ============================================================================
// Supported device types
// ============================================================================

/// Supported MPSSE adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpsseDeviceType {
    /// Olimex ARM-USB-TINY (FT2232D, full speed)
    ArmUsbTiny,
    /// Olimex ARM-USB-TINY-H (FT2232H, high speed)
    ArmUsbTinyH,
}

impl MpsseDeviceType {
    /// All supported adapters, in probe order
    pub const ALL: [MpsseDeviceType; 2] =
        [MpsseDeviceType::ArmUsbTiny, MpsseDeviceType::ArmUsbTinyH];

    /// Get the vendor ID for this device type
    pub fn vendor_id(&self) -> u16 {
        OLIMEX_VID
    }

    /// Get the product ID for this device type
    pub fn product_id(&self) -> u16 {
        match self {
            MpsseDeviceType::ArmUsbTiny => OLIMEX_ARM_TINY_PID,
            MpsseDeviceType::ArmUsbTinyH => OLIMEX_ARM_TINY_H_PID,
        }
    }

    /// Look up a device type by VID/PID
    pub fn from_ids(vid: u16, pid: u16) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.vendor_id() == vid && t.product_id() == pid)
    }

    /// Parse device type from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tiny" | "arm-usb-tiny" => Some(MpsseDeviceType::ArmUsbTiny),
            "tiny-h" | "arm-usb-tiny-h" => Some(MpsseDeviceType::ArmUsbTinyH),
            _ => None,
        }
    }

    /// Get the name of this device type
    pub fn name(&self) -> &'static str {
        match self {
            MpsseDeviceType::ArmUsbTiny => "ARM-USB-TINY",
            MpsseDeviceType::ArmUsbTinyH => "ARM-USB-TINY-H",
        }
    }
}
