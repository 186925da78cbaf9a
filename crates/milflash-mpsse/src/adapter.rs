//! JTAG-DP access over an MPSSE adapter
//!
//! Implements [`Adapter`] on top of [`MpsseQueue`]. Every DP/AP access is an
//! IR scan selecting DPACC or APACC followed by a 35-bit DR scan: RnW, two
//! address bits and 32 data bits, with the acknowledge of the previous
//! access coming back in the low three bits.

use milflash_core::adapter::{Adapter, READ_DATA_MAX_WORDS};
use milflash_core::adi::{Ack, ApReg, DpReg, JtagIr, DPACC_BITS};
use milflash_core::error::Result as CoreResult;

use crate::encoder::{MpsseQueue, Shift};
use crate::error::{MpsseError, Result};
use crate::protocol::*;
use crate::transport::{Transport, UsbTransport};

/// MPSSE adapter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpsseConfig {
    /// Restrict the search to one adapter model
    pub device_type: Option<MpsseDeviceType>,
    /// Which of the matching adapters to open (0-indexed)
    pub index: usize,
    /// TCK divisor: TCK = 6 MHz / (divisor + 1)
    pub divisor: u16,
    /// USB latency timer in milliseconds
    pub latency: u8,
}

impl Default for MpsseConfig {
    fn default() -> Self {
        Self {
            device_type: None,
            index: 0,
            divisor: DEFAULT_DIVISOR,
            latency: DEFAULT_LATENCY,
        }
    }
}

impl MpsseConfig {
    /// TCK frequency in Hz
    pub fn tck_hz(&self) -> u32 {
        BASE_CLOCK_HZ / (self.divisor as u32 + 1)
    }
}

/// Parse `key=value` programmer options into a configuration
///
/// Keys: `type` (`tiny`, `tiny-h`), `index`, `divisor`, `latency`.
pub fn parse_options(options: &[(&str, &str)]) -> Result<MpsseConfig> {
    let mut config = MpsseConfig::default();

    for (key, value) in options {
        match *key {
            "type" => {
                config.device_type = Some(MpsseDeviceType::parse(value).ok_or_else(|| {
                    MpsseError::InvalidParameter(format!(
                        "Unknown device type '{}'. Valid types: tiny, tiny-h",
                        value
                    ))
                })?);
            }
            "index" => {
                config.index = value.parse().map_err(|_| {
                    MpsseError::InvalidParameter(format!("Invalid index '{}'", value))
                })?;
            }
            "divisor" => {
                config.divisor = value.parse().map_err(|_| {
                    MpsseError::InvalidParameter(format!("Invalid divisor '{}'", value))
                })?;
            }
            "latency" => {
                let latency: u8 = value.parse().map_err(|_| {
                    MpsseError::InvalidParameter(format!("Invalid latency '{}'", value))
                })?;
                if latency == 0 {
                    return Err(MpsseError::InvalidParameter(
                        "Latency timer must be at least 1 ms".into(),
                    ));
                }
                config.latency = latency;
            }
            _ => {
                log::warn!("Unknown MPSSE option: {}={}", key, value);
            }
        }
    }

    Ok(config)
}

/// Open the first matching USB adapter
pub fn open(config: &MpsseConfig) -> Result<MpsseAdapter<UsbTransport>> {
    let transport = UsbTransport::open(config)?;
    log::debug!("MPSSE: using {}", transport.device_type().name());
    MpsseAdapter::new(transport, config)
}

/// ARM JTAG-DP driven through an MPSSE engine
pub struct MpsseAdapter<T: Transport> {
    /// Byte pipe to the engine
    transport: T,
    /// Commands awaiting a flush
    queue: MpsseQueue,
    /// Last read was not acknowledged
    stalled: bool,
    /// Pins released, no further traffic
    closed: bool,
}

impl<T: Transport> MpsseAdapter<T> {
    /// Configure the MPSSE engine and reset the TAP
    pub fn new(transport: T, config: &MpsseConfig) -> Result<Self> {
        let mut adapter = Self {
            transport,
            queue: MpsseQueue::new(),
            stalled: false,
            closed: false,
        };
        adapter.init(config)?;
        Ok(adapter)
    }

    fn init(&mut self, config: &MpsseConfig) -> Result<()> {
        self.set_pins(false, false, true)?;

        log::debug!(
            "MPSSE: divisor {}, TCK {} Hz",
            config.divisor,
            config.tck_hz()
        );
        let d = config.divisor;
        self.transport
            .write(&[TCK_DIVISOR, (d & 0xFF) as u8, (d >> 8) as u8])?;
        self.transport.write(&[LOOPBACK_END])?;

        // Pulse TRST and system reset
        self.set_pins(true, true, true)?;
        self.set_pins(false, false, true)?;

        self.queue.send(&mut self.transport, Shift::tap_reset())
    }

    /// Drive the reset and LED lines
    fn set_pins(&mut self, trst: bool, sysrst: bool, led: bool) -> Result<()> {
        let mut high = 0;
        if !trst {
            high |= HIGH_TRST_N;
        }
        if sysrst {
            high |= HIGH_SRST;
        }
        if led {
            high |= HIGH_LED;
        }
        log::trace!(
            "MPSSE pins: trst={} sysrst={} high=0x{:02x}",
            trst,
            sysrst,
            high
        );
        self.transport.write(&[
            SET_BITS_LOW,
            LOW_OUTPUT,
            LOW_DIRECTION,
            SET_BITS_HIGH,
            high,
            HIGH_DIRECTION,
        ])
    }

    fn ir(&mut self, instruction: JtagIr) -> Result<()> {
        self.queue
            .send(&mut self.transport, Shift::ir(instruction as u8))
    }

    fn dpacc(&mut self, value: u64, capture: bool) -> Result<()> {
        let shift = Shift::dr(DPACC_BITS, value);
        let shift = if capture { shift.capture() } else { shift };
        self.queue.send(&mut self.transport, shift)
    }

    /// Queue an access: A[3:2] and RnW in the low bits, data above
    fn access(
        &mut self,
        ir: JtagIr,
        addr: u8,
        read: bool,
        value: u32,
        capture: bool,
    ) -> Result<()> {
        self.ir(ir)?;
        let request = ((addr >> 1) & 6) as u64 | read as u64 | (value as u64) << 3;
        self.dpacc(request, capture)
    }

    /// Read the pipelined result out of RDBUFF
    fn rdbuff(&mut self) -> Result<u64> {
        self.access(JtagIr::DpAcc, DpReg::RdBuff.addr(), true, 0, true)?;
        self.queue.recv(&mut self.transport)
    }

    /// Release the pins and stop talking to the adapter
    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let flushed = self.queue.flush(&mut self.transport).map(|_| ());
        let released = self.set_pins(false, false, false);
        flushed.and(released)
    }
}

impl<T: Transport> Adapter for MpsseAdapter<T> {
    fn idcode(&mut self) -> CoreResult<u32> {
        self.queue.send(&mut self.transport, Shift::idcode())?;
        let idcode = self.queue.recv(&mut self.transport)? as u32;
        Ok(idcode)
    }

    fn reset_cpu(&mut self) -> CoreResult<()> {
        // Forget the unfinished transaction
        self.queue.clear();
        self.set_pins(false, true, true)?;
        self.set_pins(false, false, true)?;
        Ok(())
    }

    fn dp_write(&mut self, reg: DpReg, value: u32) -> CoreResult<()> {
        self.access(JtagIr::DpAcc, reg.addr(), false, value, false)?;
        log::trace!("DP write {:08x} to {}", value, reg.name());
        Ok(())
    }

    fn dp_read(&mut self, reg: DpReg) -> CoreResult<u32> {
        self.access(JtagIr::DpAcc, reg.addr(), true, 0, false)?;
        let reply = self.rdbuff()?;

        // A WAIT here is the previous MEM-AP transaction still completing
        self.stalled = !matches!(Ack::from_reply(reply), Ack::Ok | Ack::Wait);
        if self.stalled {
            log::trace!("DP read <<<WAIT>>> from {}", reg.name());
            return Ok(0);
        }
        let value = (reply >> 3) as u32;
        log::trace!("DP read {:08x} from {}", value, reg.name());
        Ok(value)
    }

    fn ap_write(&mut self, reg: ApReg, value: u32) -> CoreResult<()> {
        self.access(JtagIr::ApAcc, reg.addr(), false, value, false)?;
        log::trace!("MEM-AP write {:08x} to {}", value, reg.name());
        Ok(())
    }

    fn ap_read(&mut self, reg: ApReg) -> CoreResult<u32> {
        self.access(JtagIr::ApAcc, reg.addr(), true, 0, false)?;
        let reply = self.rdbuff()?;

        self.stalled = Ack::from_reply(reply) != Ack::Ok;
        if self.stalled {
            log::trace!("MEM-AP read <<<WAIT>>> from {}", reg.name());
            return Ok(0);
        }
        let value = (reply >> 3) as u32;
        log::trace!("MEM-AP read {:08x} from {}", value, reg.name());
        Ok(value)
    }

    fn read_data(&mut self, addr: u32, data: &mut [u32]) -> CoreResult<()> {
        debug_assert!(data.len() <= READ_DATA_MAX_WORDS);
        self.ap_write(ApReg::Tar, addr)?;

        // The first DRW read only primes the pipeline
        let drw = ApReg::Drw.addr();
        self.access(JtagIr::ApAcc, drw, true, 0, false)?;
        for _ in 0..data.len() {
            self.access(JtagIr::ApAcc, drw, true, 0, true)?;
        }

        let replies = self.queue.flush(&mut self.transport)?;
        if replies.len() < data.len() {
            return Err(MpsseError::ShortReply {
                got: replies.len(),
                expected: data.len(),
            }
            .into());
        }
        for (slot, &reply) in data.iter_mut().zip(&replies) {
            self.stalled = Ack::from_reply(reply) != Ack::Ok;
            *slot = (reply >> 3) as u32;
        }
        log::trace!("MEM-AP read {} words at {:08x}", data.len(), addr);
        Ok(())
    }

    fn stalled(&self) -> bool {
        self.stalled
    }

    fn close(&mut self) -> CoreResult<()> {
        self.shutdown()?;
        Ok(())
    }
}

impl<T: Transport> Drop for MpsseAdapter<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Failed to release adapter pins: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::tests::Loopback;
    use crate::encoder::ReplyLayout;
    use std::collections::VecDeque;

    /// Turn a 35-bit DR value into the bytes MPSSE would return for it
    fn wire(value: u64) -> Vec<u8> {
        let layout = ReplyLayout::new(DPACC_BITS, true);
        let partial = layout.partial_bits;
        let whole = (layout.shifted_bits / 8) as usize;
        let mut out = Vec::with_capacity(layout.bytes);
        for i in 0..whole {
            out.push((value >> (8 * i)) as u8);
        }
        let rest = (value >> (8 * whole)) as u8 & ((1 << partial) - 1);
        out.push(rest << (8 - partial));
        let last = ((value >> layout.shifted_bits) & 1) as u8;
        out.push(last << 6 | last << 7);
        out
    }

    /// Answers every captured DPACC scan with the next scripted value
    #[derive(Default)]
    struct Scripted {
        replies: VecDeque<u64>,
        writes: Vec<Vec<u8>>,
    }

    impl Scripted {
        fn with(replies: &[u64]) -> Self {
            Self {
                replies: replies.iter().copied().collect(),
                writes: Vec::new(),
            }
        }
    }

    impl Transport for Scripted {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.writes.push(data.to_vec());
            Ok(())
        }

        fn read(&mut self, len: usize) -> Result<Vec<u8>> {
            let per_word = ReplyLayout::new(DPACC_BITS, true).bytes;
            assert_eq!(len % per_word, 0);
            let mut out = Vec::with_capacity(len);
            for _ in 0..len / per_word {
                let value = self.replies.pop_front().expect("script exhausted");
                out.extend(wire(value));
            }
            Ok(out)
        }
    }

    fn reply(value: u32, ack: u8) -> u64 {
        (value as u64) << 3 | ack as u64
    }

    fn adapter(replies: &[u64]) -> MpsseAdapter<Scripted> {
        MpsseAdapter::new(Scripted::with(replies), &MpsseConfig::default()).unwrap()
    }

    #[test]
    fn test_wire_decodes() {
        let layout = ReplyLayout::new(DPACC_BITS, true);
        for value in [0u64, 1, 0x7_FFFF_FFFF, 0x4_0000_0002, 0x2_2345_6789] {
            assert_eq!(layout.decode(&wire(value)), value);
        }
    }

    #[test]
    fn test_init_sequence() {
        let a = adapter(&[]);
        let writes = &a.transport.writes;
        assert_eq!(writes[0], [0x80, 0x08, 0x1B, 0x82, 0x09, 0x0F]);
        assert_eq!(writes[1], [0x86, 0x01, 0x00]);
        assert_eq!(writes[2], [0x85]);
        assert_eq!(writes[3], [0x80, 0x08, 0x1B, 0x82, 0x0A, 0x0F]);
        assert_eq!(writes[4], [0x80, 0x08, 0x1B, 0x82, 0x09, 0x0F]);
        assert_eq!(writes.len(), 5);
        // TAP reset is queued, not sent
        assert_eq!(a.queue.output(), &[0x4B, 5, 0x1F]);
    }

    #[test]
    fn test_dp_read_accepts_ok_and_wait() {
        let mut a = adapter(&[reply(0xF000_0000, 2), reply(0x1234_5678, 1)]);
        assert_eq!(a.dp_read(DpReg::CtrlStat).unwrap(), 0xF000_0000);
        assert!(!a.stalled());
        assert_eq!(a.dp_read(DpReg::CtrlStat).unwrap(), 0x1234_5678);
        assert!(!a.stalled());
    }

    #[test]
    fn test_dp_read_rejects_other_acks() {
        for ack in [0, 3, 4, 5, 6, 7] {
            let mut a = adapter(&[reply(0xDEAD_BEEF, ack)]);
            assert_eq!(a.dp_read(DpReg::CtrlStat).unwrap(), 0);
            assert!(a.stalled(), "ack {}", ack);
        }
    }

    #[test]
    fn test_ap_read_accepts_only_ok() {
        let mut a = adapter(&[reply(0x2477_0011, 2), reply(0x2477_0011, 1)]);
        assert_eq!(a.ap_read(ApReg::Idr).unwrap(), 0x2477_0011);
        assert!(!a.stalled());
        assert_eq!(a.ap_read(ApReg::Idr).unwrap(), 0);
        assert!(a.stalled());
    }

    #[test]
    fn test_read_data_stall_follows_last_word() {
        let mut a = adapter(&[reply(1, 2), reply(2, 2), reply(3, 1)]);
        let mut data = [0u32; 3];
        a.read_data(0x0800_0000, &mut data).unwrap();
        assert_eq!(data, [1, 2, 3]);
        assert!(a.stalled());

        let mut a = adapter(&[reply(1, 1), reply(2, 2)]);
        let mut data = [0u32; 2];
        a.read_data(0x0800_0000, &mut data).unwrap();
        assert!(!a.stalled());
    }

    #[test]
    fn test_reset_cpu_drops_queue() {
        let mut a = adapter(&[]);
        a.dp_write(DpReg::Select, 0xF0).unwrap();
        assert!(!a.queue.output().is_empty());
        a.reset_cpu().unwrap();
        assert!(a.queue.output().is_empty());
        let writes = &a.transport.writes;
        assert_eq!(writes[writes.len() - 2][4], 0x0B);
        assert_eq!(writes[writes.len() - 1][4], 0x09);
    }

    #[test]
    fn test_idcode_over_loopback() {
        // TDI is zero during the IDCODE scan, so the loopback answers zero
        let mut a = MpsseAdapter::new(Loopback::default(), &MpsseConfig::default()).unwrap();
        assert_eq!(a.idcode().unwrap(), 0);
    }

    #[test]
    fn test_close_releases_pins_once() {
        let mut a = adapter(&[]);
        a.close().unwrap();
        let n = a.transport.writes.len();
        assert_eq!(a.transport.writes[n - 1], [0x80, 0x08, 0x1B, 0x82, 0x01, 0x0F]);
        a.close().unwrap();
        assert_eq!(a.transport.writes.len(), n);
    }

    #[test]
    fn test_parse_options() {
        let config =
            parse_options(&[("type", "tiny-h"), ("divisor", "5"), ("index", "1")]).unwrap();
        assert_eq!(config.device_type, Some(MpsseDeviceType::ArmUsbTinyH));
        assert_eq!(config.divisor, 5);
        assert_eq!(config.index, 1);
        assert_eq!(config.tck_hz(), 1_000_000);

        assert!(parse_options(&[("type", "jtagkey")]).is_err());
        assert!(parse_options(&[("latency", "0")]).is_err());
        assert_eq!(parse_options(&[]).unwrap(), MpsseConfig::default());
    }
}
