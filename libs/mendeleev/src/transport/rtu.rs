//! Serial (RTU) transport
//!
//! Frames travel over a serial line opened through `tokio-serial`. The line
//! is a bus: every frame carries destination and source addresses, so the
//! transport verifies who answered and filters indications by address.
//!
//! Waiting for data is done with a small read-ahead buffer: `select` reads
//! whatever arrives first into it, `recv` hands it out.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use super::{addressed_to, check_response_addresses, Transport};
use crate::constants::MAX_MESSAGE_LENGTH;
use crate::error::{MendeleevError, Result};
use crate::frame::{self, SequenceCounter};

/// Electrical interface of the serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialMode {
    #[default]
    Rs232,
    Rs485,
}

/// RS-485 direction control through the RTS line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtsMode {
    /// RTS is left alone
    #[default]
    None,
    /// RTS high while transmitting
    Up,
    /// RTS low while transmitting
    Down,
}

/// Replaces the built-in RTS toggle, e.g. to drive a GPIO instead
pub type RtsHook = Box<dyn Fn(bool) + Send + Sync>;

/// Serial transport
pub struct RtuTransport {
    device: String,
    baud_rate: u32,
    parity: tokio_serial::Parity,
    data_bits: tokio_serial::DataBits,
    stop_bits: tokio_serial::StopBits,
    own_address: u8,
    serial_mode: SerialMode,
    rts: RtsMode,
    rts_delay: Duration,
    custom_rts: Option<RtsHook>,
    sequence: SequenceCounter,
    port: Option<SerialStream>,
    /// Bytes read by `select` and not yet handed out by `recv`
    pending: BytesMut,
    /// `select` saw end of stream; the next `recv` reports it
    eof: bool,
}

impl fmt::Debug for RtuTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtuTransport")
            .field("device", &self.device)
            .field("baud_rate", &self.baud_rate)
            .field("parity", &self.parity)
            .field("data_bits", &self.data_bits)
            .field("stop_bits", &self.stop_bits)
            .field("own_address", &self.own_address)
            .field("serial_mode", &self.serial_mode)
            .field("rts", &self.rts)
            .field("rts_delay", &self.rts_delay)
            .field("connected", &self.port.is_some())
            .finish()
    }
}

/// Convert a parity letter ('N', 'E', 'O') to tokio_serial parity
fn parse_parity(parity: char) -> Result<tokio_serial::Parity> {
    match parity.to_ascii_uppercase() {
        'N' => Ok(tokio_serial::Parity::None),
        'E' => Ok(tokio_serial::Parity::Even),
        'O' => Ok(tokio_serial::Parity::Odd),
        other => Err(MendeleevError::invalid_argument(format!(
            "Parity must be N, E or O, got '{}'",
            other
        ))),
    }
}

fn parse_data_bits(data_bits: u8) -> Result<tokio_serial::DataBits> {
    match data_bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(MendeleevError::invalid_argument(format!(
            "Data bits must be 5, 6, 7 or 8, got {}",
            other
        ))),
    }
}

fn parse_stop_bits(stop_bits: u8) -> Result<tokio_serial::StopBits> {
    match stop_bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(MendeleevError::invalid_argument(format!(
            "Stop bits must be 1 or 2, got {}",
            other
        ))),
    }
}

fn data_bits_count(bits: tokio_serial::DataBits) -> u64 {
    match bits {
        tokio_serial::DataBits::Five => 5,
        tokio_serial::DataBits::Six => 6,
        tokio_serial::DataBits::Seven => 7,
        tokio_serial::DataBits::Eight => 8,
    }
}

impl RtuTransport {
    /// Describe a serial line; nothing is opened until `connect`
    pub fn new(
        device: impl Into<String>,
        baud_rate: u32,
        parity: char,
        data_bits: u8,
        stop_bits: u8,
    ) -> Result<Self> {
        let device = device.into();
        if device.is_empty() {
            return Err(MendeleevError::invalid_argument("Device path cannot be empty"));
        }
        if baud_rate == 0 {
            return Err(MendeleevError::invalid_argument(
                "Baud rate must be greater than zero",
            ));
        }

        let mut transport = Self {
            device,
            baud_rate,
            parity: parse_parity(parity)?,
            data_bits: parse_data_bits(data_bits)?,
            stop_bits: parse_stop_bits(stop_bits)?,
            own_address: 0x00,
            serial_mode: SerialMode::default(),
            rts: RtsMode::default(),
            rts_delay: Duration::ZERO,
            custom_rts: None,
            sequence: SequenceCounter::new(),
            port: None,
            pending: BytesMut::with_capacity(MAX_MESSAGE_LENGTH),
            eof: false,
        };
        transport.rts_delay = transport.char_time();
        Ok(transport)
    }

    /// Address written as source of every request
    pub fn with_own_address(mut self, own_address: u8) -> Self {
        self.own_address = own_address;
        self
    }

    pub fn own_address(&self) -> u8 {
        self.own_address
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Time on the wire for one character: start bit, data, parity, stop bits
    pub fn char_time(&self) -> Duration {
        let parity_bits = u64::from(self.parity != tokio_serial::Parity::None);
        let stop_bits = match self.stop_bits {
            tokio_serial::StopBits::One => 1,
            tokio_serial::StopBits::Two => 2,
        };
        let bits = 1 + data_bits_count(self.data_bits) + parity_bits + stop_bits;
        Duration::from_micros(1_000_000 * bits / u64::from(self.baud_rate))
    }

    pub fn set_serial_mode(&mut self, mode: SerialMode) {
        self.serial_mode = mode;
    }

    pub fn serial_mode(&self) -> SerialMode {
        self.serial_mode
    }

    pub fn set_rts(&mut self, mode: RtsMode) -> Result<()> {
        self.rts = mode;
        if mode != RtsMode::None {
            // Idle level: not transmitting
            self.apply_rts(mode != RtsMode::Up)?;
        }
        Ok(())
    }

    pub fn rts(&self) -> RtsMode {
        self.rts
    }

    pub fn set_custom_rts(&mut self, hook: RtsHook) {
        self.custom_rts = Some(hook);
    }

    pub fn set_rts_delay(&mut self, delay: Duration) {
        self.rts_delay = delay;
    }

    pub fn rts_delay(&self) -> Duration {
        self.rts_delay
    }

    fn apply_rts(&mut self, on: bool) -> Result<()> {
        if let Some(hook) = &self.custom_rts {
            hook(on);
            return Ok(());
        }
        if let Some(port) = self.port.as_mut() {
            port.write_request_to_send(on)
                .map_err(|e| MendeleevError::Io(io::Error::other(e)))?;
        }
        Ok(())
    }

    async fn write_port(&mut self, msg: &[u8]) -> Result<usize> {
        let port = self.port_mut()?;
        Ok(port.write(msg).await?)
    }

    fn port_mut(&mut self) -> Result<&mut SerialStream> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected).into())
    }
}

#[async_trait]
impl Transport for RtuTransport {
    fn transport_type(&self) -> &'static str {
        "rtu"
    }

    fn set_slave(&mut self, slave: u8) -> Result<()> {
        if slave == self.own_address {
            return Err(MendeleevError::invalid_argument(format!(
                "Slave address 0x{:02X} is the link's own address",
                slave
            )));
        }
        Ok(())
    }

    fn build_request_basis(&mut self, slave: u8, command: u8, req: &mut [u8]) -> usize {
        let seq = self.sequence.next_sequence();
        frame::write_request_basis(req, slave, self.own_address, seq, command)
    }

    fn send_msg_pre(&self, msg: &mut [u8], msg_length: usize) -> usize {
        frame::append_checksum(msg, msg_length)
    }

    async fn send(&mut self, msg: &[u8]) -> Result<usize> {
        if self.rts == RtsMode::None {
            return self.write_port(msg).await;
        }

        self.apply_rts(self.rts == RtsMode::Up)?;
        tokio::time::sleep(self.rts_delay).await;

        let result = self.write_port(msg).await;

        // Keep the driver enabled until the last character has left the UART,
        // then release the bus even when the write failed
        let written = result.as_ref().map_or(0, |n| *n);
        let drain = self.char_time() * written as u32 + self.rts_delay;
        tokio::time::sleep(drain).await;
        let released = self.apply_rts(self.rts != RtsMode::Up);

        let written = result?;
        released?;
        Ok(written)
    }

    async fn select(&mut self, wait: Duration) -> Result<()> {
        if !self.pending.is_empty() || self.eof {
            return Ok(());
        }

        let port = self
            .port
            .as_mut()
            .ok_or_else(|| MendeleevError::from(io::Error::from(io::ErrorKind::NotConnected)))?;
        match timeout(wait, port.read_buf(&mut self.pending)).await {
            Ok(Ok(0)) => {
                self.eof = true;
                Ok(())
            },
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(MendeleevError::Timeout),
        }
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending.is_empty() {
            if self.eof {
                self.eof = false;
                return Ok(0);
            }
            let port = self.port_mut()?;
            return Ok(port.read(buf).await?);
        }

        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }

    fn check_integrity(&self, msg: &[u8]) -> Result<usize> {
        frame::verify_frame(msg)
    }

    fn pre_check_confirmation(&self, req: &[u8], rsp: &[u8]) -> Result<()> {
        check_response_addresses(req, rsp)
    }

    fn accepts_indication(&self, msg: &[u8]) -> bool {
        addressed_to(self.own_address, msg)
    }

    async fn connect(&mut self) -> Result<()> {
        debug!("Opening serial port: {}", self.device);

        let port = tokio_serial::new(&self.device, self.baud_rate)
            .data_bits(self.data_bits)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                MendeleevError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("Failed to open serial port {}: {}", self.device, e),
                ))
            })?;

        #[cfg(unix)]
        let port = {
            let mut port = port;
            if let Err(e) = port.set_exclusive(false) {
                warn!("Failed to clear exclusive mode on {}: {}", self.device, e);
            }
            port
        };

        self.port = Some(port);
        self.pending.clear();
        self.eof = false;

        if self.rts != RtsMode::None {
            self.apply_rts(self.rts != RtsMode::Up)?;
        }

        info!(
            "Opened serial port {} at {} baud ({:?})",
            self.device, self.baud_rate, self.serial_mode
        );
        Ok(())
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed serial port: {}", self.device);
        }
        self.pending.clear();
        self.eof = false;
    }

    async fn flush(&mut self) -> Result<usize> {
        let mut dropped = self.pending.len();
        self.pending.clear();
        self.eof = false;

        let port = self
            .port
            .as_mut()
            .ok_or_else(|| MendeleevError::from(io::Error::from(io::ErrorKind::NotConnected)))?;
        match port.bytes_to_read() {
            Ok(queued) => dropped += queued as usize,
            Err(e) => warn!("Failed to query input queue of {}: {}", self.device, e),
        }
        port.clear(ClearBuffer::All)
            .map_err(|e| MendeleevError::Io(io::Error::other(e)))?;
        Ok(dropped)
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}
