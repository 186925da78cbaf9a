//! USB transport to the FTDI chip
//!
//! The encoder only needs two primitives: push a block of command bytes and
//! pull a number of reply bytes. [`Transport`] captures them so that the
//! encoder and the JTAG layer can be tested against an in-memory device.

use std::time::{Duration, Instant};

use nusb::transfer::{Buffer, Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Endpoint, Interface, MaybeFuture};

use crate::adapter::MpsseConfig;
use crate::error::{MpsseError, Result};
use crate::protocol::*;

/// Byte pipe to an MPSSE engine
pub trait Transport {
    /// Send command bytes
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Receive exactly `len` reply bytes, status bytes removed
    fn read(&mut self, len: usize) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        (**self).read(len)
    }
}

/// Bulk endpoints of an FTDI channel in MPSSE mode
pub struct UsbTransport {
    /// Claimed JTAG interface
    interface: Interface,
    /// Bulk OUT endpoint
    out_ep: Endpoint<Bulk, Out>,
    /// Bulk IN endpoint
    in_ep: Endpoint<Bulk, In>,
    /// Adapter model
    device_type: MpsseDeviceType,
}

impl UsbTransport {
    /// Find, open and switch an adapter to MPSSE mode
    pub fn open(config: &MpsseConfig) -> Result<Self> {
        let devices: Vec<_> = nusb::list_devices()
            .wait()
            .map_err(|e| MpsseError::OpenFailed(e.to_string()))?
            .filter_map(|d| {
                let device_type = MpsseDeviceType::from_ids(d.vendor_id(), d.product_id())?;
                match config.device_type {
                    Some(wanted) if wanted != device_type => None,
                    _ => Some((d, device_type)),
                }
            })
            .collect();

        let (device_info, device_type) = devices
            .into_iter()
            .nth(config.index)
            .ok_or(MpsseError::DeviceNotFound)?;

        log::info!(
            "Opening {} at bus {} address {}",
            device_type.name(),
            device_info.busnum(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| MpsseError::OpenFailed(e.to_string()))?;

        let interface = device
            .claim_interface(JTAG_INTERFACE)
            .wait()
            .map_err(|e| MpsseError::ClaimFailed(e.to_string()))?;

        let out_ep = interface
            .endpoint::<Bulk, Out>(BULK_OUT_EP)
            .map_err(|e| MpsseError::ClaimFailed(e.to_string()))?;
        let in_ep = interface
            .endpoint::<Bulk, In>(BULK_IN_EP)
            .map_err(|e| MpsseError::ClaimFailed(e.to_string()))?;

        let mut transport = Self {
            interface,
            out_ep,
            in_ep,
            device_type,
        };
        transport.setup(config)?;
        Ok(transport)
    }

    /// Adapter model
    pub fn device_type(&self) -> MpsseDeviceType {
        self.device_type
    }

    /// Reset the channel, enter MPSSE mode and set the latency timer
    fn setup(&mut self, config: &MpsseConfig) -> Result<()> {
        self.control_out(SIO_RESET, SIO_RESET_SIO)
            .map_err(|e| MpsseError::ConfigFailed(format!("FTDI reset failed: {}", e)))?;
        self.control_out(SIO_SET_BITMODE, BITMODE_MPSSE)
            .map_err(|e| MpsseError::ConfigFailed(format!("Can't set sync MPSSE mode: {}", e)))?;
        self.control_out(SIO_SET_LATENCY_TIMER, config.latency as u16)
            .map_err(|e| {
                MpsseError::ConfigFailed(format!("Unable to set latency timer: {}", e))
            })?;

        let latency = self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: SIO_GET_LATENCY_TIMER,
                    value: 0,
                    index: CHANNEL_A,
                    length: 1,
                },
                Duration::from_millis(CONTROL_TIMEOUT_MS),
            )
            .wait()
            .map_err(|e| {
                MpsseError::ConfigFailed(format!("Unable to get latency timer: {}", e))
            })?;
        match latency.first() {
            Some(ms) => log::debug!("MPSSE: latency timer: {} ms", ms),
            None => {
                return Err(MpsseError::ConfigFailed(
                    "Unable to get latency timer: empty reply".into(),
                ))
            }
        }
        Ok(())
    }

    fn control_out(&self, request: u8, value: u16) -> Result<()> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index: CHANNEL_A,
                    data: &[],
                },
                Duration::from_millis(CONTROL_TIMEOUT_MS),
            )
            .wait()
            .map_err(|e| MpsseError::TransferFailed(e.to_string()))
    }
}

impl Transport for UsbTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        log::trace!("usb bulk write {} bytes: {:02x?}", data.len(), data);

        let mut out_buf = Buffer::new(data.len());
        out_buf.extend_from_slice(data);
        self.out_ep
            .transfer_blocking(out_buf, Duration::from_millis(WRITE_TIMEOUT_MS))
            .into_result()
            .map_err(|e| MpsseError::TransferFailed(format!("Bulk write failed: {}", e)))?;
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        let max_packet_size = self.in_ep.max_packet_size();
        let deadline = Instant::now() + Duration::from_millis(READ_TIMEOUT_MS);
        let mut result = Vec::with_capacity(len);

        while result.len() < len {
            let remaining = len - result.len();
            // Every packet starts with two modem status bytes
            let payload_per_packet = max_packet_size - MODEM_STATUS_SIZE;
            let packets = remaining.div_ceil(payload_per_packet);
            let request_len = packets * max_packet_size;

            let mut in_buf = Buffer::new(request_len);
            in_buf.set_requested_len(request_len);
            let data = self
                .in_ep
                .transfer_blocking(in_buf, Duration::from_millis(READ_TIMEOUT_MS))
                .into_result()
                .map_err(|e| MpsseError::TransferFailed(format!("Bulk read failed: {}", e)))?;

            for packet in data.chunks(max_packet_size) {
                if packet.len() > MODEM_STATUS_SIZE {
                    let payload = &packet[MODEM_STATUS_SIZE..];
                    let take = payload.len().min(len - result.len());
                    result.extend_from_slice(&payload[..take]);
                }
            }

            if result.len() < len && Instant::now() >= deadline {
                return Err(MpsseError::ShortReply {
                    got: result.len(),
                    expected: len,
                });
            }
        }

        log::trace!("usb bulk read {} bytes: {:02x?}", result.len(), result);
        Ok(result)
    }
}
