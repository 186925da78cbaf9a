//! MPSSE JTAG shift encoder and reply decoder
//!
//! A JTAG access is described by a [`Shift`]: some TMS bits to walk the TAP
//! to the right state, then a data-register (or instruction-register) shift
//! on TDI, optionally capturing TDO. [`MpsseQueue`] turns shifts into MPSSE
//! commands and batches them until the output buffer is full or a reply is
//! needed.
//!
//! MPSSE returns captured bits in awkward places. Whole bytes arrive as they
//! are, but a trailing partial byte arrives left-justified, and the last data
//! bit is sampled by the TMS command that leaves Shift-DR, so it lands in a
//! byte of its own. [`ReplyLayout`] records where each piece went so the
//! value can be stitched back together.

use crate::error::{MpsseError, Result};
use crate::protocol::*;
use crate::transport::Transport;

/// One JTAG scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    /// TMS bits clocked before the scan
    pub tms_bits: u32,
    /// TMS values, LSB first
    pub tms: u32,
    /// Number of TDI bits (0 for a pure TMS sequence)
    pub tdi_bits: u32,
    /// TDI value, LSB first
    pub tdi: u64,
    /// Capture TDO during the scan
    pub capture: bool,
}

impl Shift {
    /// Clock a TMS sequence without a scan
    pub fn tms(nbits: u32, value: u32) -> Self {
        Self {
            tms_bits: nbits,
            tms: value,
            tdi_bits: 0,
            tdi: 0,
            capture: false,
        }
    }

    /// Reset the TAP (TMS 1-1-1-1-1-0), leaving it in Run-Test/Idle
    pub fn tap_reset() -> Self {
        Self::tms(6, 0x1F)
    }

    /// Shift a 4-bit instruction into IR
    pub fn ir(instruction: u8) -> Self {
        // From Update/Idle: Select-DR, then Select-IR
        Self {
            tms_bits: 1,
            tms: 1,
            tdi_bits: 4,
            tdi: instruction as u64,
            capture: false,
        }
    }

    /// Shift `nbits` through the selected data register
    pub fn dr(nbits: u32, value: u64) -> Self {
        Self {
            tms_bits: 0,
            tms: 0,
            tdi_bits: nbits,
            tdi: value,
            capture: false,
        }
    }

    /// Reset the TAP, then shift 32 bits out of the IDCODE register
    pub fn idcode() -> Self {
        Self {
            tdi_bits: 32,
            tdi: 0,
            capture: true,
            ..Self::tap_reset()
        }
    }

    /// Same scan with TDO captured
    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }
}

/// Position of one captured scan inside the reply stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyLayout {
    /// Reply bytes occupied by the scan
    pub bytes: usize,
    /// Data bits shifted before the exit bit
    pub shifted_bits: u32,
    /// Bits in the trailing partial byte, 0 if the data ends on a byte
    pub partial_bits: u32,
    /// Raw bit position of the sample taken on the exit clock
    pub exit_bit: Option<u32>,
}

impl ReplyLayout {
    /// Layout of a `tdi_bits` scan
    ///
    /// With `exit_bit`, the last bit is clocked together with TMS=1 and its
    /// sample arrives in a separate byte.
    pub fn new(tdi_bits: u32, exit_bit: bool) -> Self {
        let shifted_bits = if exit_bit {
            tdi_bits.saturating_sub(1)
        } else {
            tdi_bits
        };
        let whole = shifted_bits / 8;
        let partial_bits = shifted_bits % 8;
        let data_bytes = whole + (partial_bits > 0) as u32;
        Self {
            bytes: (data_bytes + exit_bit as u32) as usize,
            shifted_bits,
            partial_bits,
            // The exit command clocks two bits; the first one is ours
            exit_bit: exit_bit.then_some(data_bytes * 8 + 6),
        }
    }

    /// Total bits of the decoded value
    pub fn value_bits(&self) -> u32 {
        self.shifted_bits + self.exit_bit.is_some() as u32
    }

    /// Rebuild the captured value from its reply bytes
    pub fn decode(&self, raw: &[u8]) -> u64 {
        let mut window = [0u8; 16];
        let n = raw.len().min(self.bytes).min(16);
        window[..n].copy_from_slice(&raw[..n]);
        let mut word = u128::from_le_bytes(window);

        let fix = match self.exit_bit {
            Some(pos) => word & (1u128 << pos) != 0,
            None => false,
        };

        if self.partial_bits > 0 {
            let mask = 0xFFu128 << ((self.shifted_bits / 8) * 8);
            let high = mask & ((word & mask) >> (8 - self.partial_bits));
            word = (word & !mask) | high;
        }

        word &= (1u128 << self.shifted_bits) - 1;
        if fix {
            word |= 1u128 << self.shifted_bits;
        }
        word as u64
    }
}

/// Queue of MPSSE commands awaiting a bulk transfer
///
/// Captured scans are decoded in the order they were queued. Nothing can be
/// read back before a flush has sent the commands that produce it.
#[derive(Debug, Default)]
pub struct MpsseQueue {
    /// Commands not yet sent
    output: Vec<u8>,
    /// Captured scans whose reply has not been received
    pending: Vec<ReplyLayout>,
    /// Reply bytes the pending scans will produce
    bytes_to_read: usize,
    /// Values decoded by flushes forced while queueing
    decoded: Vec<u64>,
}

impl MpsseQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            output: Vec::with_capacity(OUTPUT_BUFFER_SIZE),
            ..Default::default()
        }
    }

    /// Commands queued so far
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Reply bytes expected from the next flush
    pub fn bytes_to_read(&self) -> usize {
        self.bytes_to_read
    }

    /// Forget everything queued, including decoded but unread values
    pub fn clear(&mut self) {
        self.output.clear();
        self.pending.clear();
        self.bytes_to_read = 0;
        self.decoded.clear();
    }

    /// Queue one scan
    ///
    /// Flushes first when the buffer might not hold the largest command
    /// sequence a scan can produce.
    pub fn send<T: Transport + ?Sized>(&mut self, transport: &mut T, shift: Shift) -> Result<()> {
        if self.output.len() > OUTPUT_BUFFER_SIZE - MAX_SHIFT_PACKET {
            let values = self.flush(transport)?;
            self.decoded.extend(values);
        }
        self.encode(shift);
        Ok(())
    }

    fn encode(&mut self, shift: Shift) {
        let Shift {
            mut tms_bits,
            mut tms,
            tdi_bits,
            mut tdi,
            capture,
        } = shift;
        let scan = tdi_bits > 0;

        if scan {
            // Select-DR, Capture-DR, Shift-DR (or the IR path after the
            // caller's extra Select)
            tms |= 1 << tms_bits;
            tms_bits += 3;
        }

        if tms_bits > 0 {
            if tms_bits < 8 {
                self.output
                    .extend_from_slice(&[TMS_OUT, (tms_bits - 1) as u8, tms as u8]);
            } else {
                // One TMS command carries at most 7 bits
                self.output.extend_from_slice(&[
                    TMS_OUT,
                    6,
                    (tms & 0x7F) as u8,
                    TMS_OUT,
                    (tms_bits - 8) as u8,
                    (tms >> 7) as u8,
                ]);
            }
        }

        if !scan {
            return;
        }

        // The last bit leaves Shift-DR with TMS=1
        let layout = ReplyLayout::new(tdi_bits, true);
        let whole = layout.shifted_bits / 8;
        let partial = layout.partial_bits;

        if whole > 0 {
            let n = whole - 1;
            self.output.extend_from_slice(&[
                if capture { BYTES_OUT_IN } else { BYTES_OUT },
                n as u8,
                (n >> 8) as u8,
            ]);
            for _ in 0..whole {
                self.output.push(tdi as u8);
                tdi >>= 8;
            }
        }

        if partial > 0 {
            self.output.extend_from_slice(&[
                if capture { BITS_OUT_IN } else { BITS_OUT },
                (partial - 1) as u8,
                tdi as u8,
            ]);
            tdi >>= partial;
        }

        // Two TMS clocks: Exit1-DR, then Update-DR. TDI holds the last bit.
        self.output.extend_from_slice(&[
            if capture { TMS_OUT_IN } else { TMS_OUT },
            1,
            ((tdi as u8) << 7) | 0b11,
        ]);

        if capture {
            self.bytes_to_read += layout.bytes;
            self.pending.push(layout);
        }
    }

    /// Send all queued commands and decode every captured scan
    pub fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Vec<u64>> {
        let mut values = std::mem::take(&mut self.decoded);
        if self.output.is_empty() {
            return Ok(values);
        }

        transport.write(&self.output)?;
        self.output.clear();

        if self.bytes_to_read > 0 {
            let expected = self.bytes_to_read;
            let input = transport.read(expected)?;
            self.bytes_to_read = 0;
            if input.len() < expected {
                self.pending.clear();
                return Err(MpsseError::ShortReply {
                    got: input.len(),
                    expected,
                });
            }

            let mut offset = 0;
            for layout in self.pending.drain(..) {
                values.push(layout.decode(&input[offset..]));
                offset += layout.bytes;
            }
        }
        Ok(values)
    }

    /// Flush and return the first captured value
    pub fn recv<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<u64> {
        let values = self.flush(transport)?;
        values.first().copied().ok_or(MpsseError::ShortReply {
            got: 0,
            expected: 1,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// MPSSE engine with TDO wired to TDI
    ///
    /// Unused low bits of partial reply bytes are filled with garbage, as
    /// the real engine leaves whatever was shifted in before.
    #[derive(Default)]
    pub(crate) struct Loopback {
        pub writes: Vec<Vec<u8>>,
        reply: VecDeque<u8>,
    }

    impl Loopback {
        fn run(&mut self, data: &[u8]) {
            const GARBAGE: u8 = 0xA5;
            let mut i = 0;
            while i < data.len() {
                let op = data[i];
                match op {
                    SET_BITS_LOW | SET_BITS_HIGH | TCK_DIVISOR => i += 3,
                    LOOPBACK_END => i += 1,
                    TMS_OUT | BITS_OUT => i += 3,
                    BYTES_OUT => {
                        let n = data[i + 1] as usize + ((data[i + 2] as usize) << 8) + 1;
                        i += 3 + n;
                    }
                    BYTES_OUT_IN => {
                        let n = data[i + 1] as usize + ((data[i + 2] as usize) << 8) + 1;
                        self.reply.extend(&data[i + 3..i + 3 + n]);
                        i += 3 + n;
                    }
                    BITS_OUT_IN => {
                        let n = data[i + 1] as u32 + 1;
                        let bits = data[i + 2] & ((1u16 << n) - 1) as u8;
                        let junk = GARBAGE & ((1u16 << (8 - n)) - 1) as u8;
                        self.reply.push_back((bits << (8 - n)) | junk);
                        i += 3;
                    }
                    TMS_OUT_IN => {
                        let n = data[i + 1] as u32 + 1;
                        let tdi = data[i + 2] >> 7;
                        let mut byte = GARBAGE & ((1u16 << (8 - n)) - 1) as u8;
                        for k in 0..n {
                            byte |= tdi << (8 - n + k);
                        }
                        self.reply.push_back(byte);
                        i += 3;
                    }
                    other => panic!("unexpected MPSSE opcode {:#04x}", other),
                }
            }
        }
    }

    impl Transport for Loopback {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.writes.push(data.to_vec());
            self.run(data);
            Ok(())
        }

        fn read(&mut self, len: usize) -> Result<Vec<u8>> {
            assert!(self.reply.len() >= len, "read beyond reply");
            Ok(self.reply.drain(..len).collect())
        }
    }

    fn mask(bits: u32) -> u64 {
        if bits == 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }

    #[test]
    fn test_loopback_all_widths() {
        let patterns = [
            0xFFFF_FFFF_FFFF_FFFFu64,
            0x0123_4567_89AB_CDEF,
            0x8000_0000_0000_0001,
            0x5555_5555_5555_5555,
            0,
        ];
        for bits in 1..=64 {
            for &pattern in &patterns {
                let mut link = Loopback::default();
                let mut q = MpsseQueue::new();
                q.send(&mut link, Shift::dr(bits, pattern).capture())
                    .unwrap();
                let value = q.recv(&mut link).unwrap();
                assert_eq!(
                    value,
                    pattern & mask(bits),
                    "width {} pattern {:#x}",
                    bits,
                    pattern
                );
            }
        }
    }

    #[test]
    fn test_identity_layout_for_whole_bytes() {
        let raw = [0x78, 0x56, 0x34, 0x12, 0xEE];
        for bytes in 1..=4u32 {
            let layout = ReplyLayout::new(bytes * 8, false);
            assert_eq!(layout.partial_bits, 0);
            assert_eq!(layout.exit_bit, None);
            assert_eq!(layout.bytes, bytes as usize);
            let expected = u64::from_le_bytes([
                raw[0],
                if bytes > 1 { raw[1] } else { 0 },
                if bytes > 2 { raw[2] } else { 0 },
                if bytes > 3 { raw[3] } else { 0 },
                0,
                0,
                0,
                0,
            ]);
            assert_eq!(layout.decode(&raw), expected);
        }
    }

    #[test]
    fn test_dpacc_layout() {
        let layout = ReplyLayout::new(35, true);
        assert_eq!(layout.bytes, 6);
        assert_eq!(layout.partial_bits, 2);
        assert_eq!(layout.exit_bit, Some(46));
        assert_eq!(layout.value_bits(), 35);
    }

    #[test]
    fn test_ir_encoding() {
        let mut q = MpsseQueue::new();
        let mut link = Loopback::default();
        q.send(&mut link, Shift::ir(0xA)).unwrap();
        // TMS 1-1-0-0, 3 bits of IR, then the last IR bit with TMS 1-1
        assert_eq!(
            q.output(),
            &[0x4B, 3, 0x03, 0x1B, 2, 0x0A, 0x4B, 1, 0x83]
        );
        assert_eq!(q.bytes_to_read(), 0);
    }

    #[test]
    fn test_idcode_encoding() {
        let mut q = MpsseQueue::new();
        let mut link = Loopback::default();
        q.send(&mut link, Shift::idcode()).unwrap();
        assert_eq!(
            q.output(),
            &[
                0x4B, 6, 0x5F, 0x4B, 1, 0x00, // reset, idle, Select/Capture/Shift-DR
                0x39, 2, 0, 0, 0, 0, // 24 bits
                0x3B, 6, 0, // 7 bits
                0x6B, 1, 0x03, // last bit, exit
            ]
        );
        assert_eq!(q.bytes_to_read(), 5);
    }

    #[test]
    fn test_tms_only_has_no_scan() {
        let mut q = MpsseQueue::new();
        let mut link = Loopback::default();
        q.send(&mut link, Shift::tap_reset()).unwrap();
        assert_eq!(q.output(), &[0x4B, 5, 0x1F]);
        assert!(q.flush(&mut link).unwrap().is_empty());
    }

    #[test]
    fn test_buffer_bound() {
        let mut q = MpsseQueue::new();
        let mut link = Loopback::default();
        let mut seed = 0x1234_5678u32;
        for i in 0..5000 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let bits = (seed >> 16) % 64 + 1;
            let shift = match i % 3 {
                0 => Shift::ir((seed & 0xF) as u8),
                1 => Shift::dr(bits, seed as u64),
                _ => Shift::dr(bits, seed as u64).capture(),
            };
            q.send(&mut link, shift).unwrap();
            assert!(q.output().len() <= OUTPUT_BUFFER_SIZE);
        }
        assert!(link.writes.len() > 1);
        assert!(link.writes.iter().all(|w| w.len() <= OUTPUT_BUFFER_SIZE));
    }

    #[test]
    fn test_forced_flush_keeps_captures() {
        let mut q = MpsseQueue::new();
        let mut link = Loopback::default();
        let mut expected = Vec::new();
        for i in 0..400u64 {
            let value = i * 0x0101_0101 + 7;
            q.send(&mut link, Shift::dr(35, value).capture()).unwrap();
            expected.push(value & mask(35));
        }
        assert!(!link.writes.is_empty());
        assert_eq!(q.flush(&mut link).unwrap(), expected);
        assert_eq!(q.bytes_to_read(), 0);
    }
}
