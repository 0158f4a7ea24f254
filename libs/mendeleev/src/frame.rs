//! Frame codec
//!
//! Pure functions over byte slices: header layout, big-endian field access,
//! expected confirmation sizes and the CRC-16 trailer. Transports call into
//! this module from `build_request_basis`, `send_msg_pre` and
//! `check_integrity`; the engine uses it to correlate confirmations.

use crc::{Crc, CRC_16_MODBUS};

use crate::constants::*;
use crate::error::{MendeleevError, Result};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Command codes understood by Mendeleev devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    SetColor = 0x00,
    SetMode = 0x01,
    Ota = 0x02,
    GetVersion = 0x03,
    SetOutput = 0x04,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::SetColor),
            0x01 => Some(Self::SetMode),
            0x02 => Some(Self::Ota),
            0x03 => Some(Self::GetVersion),
            0x04 => Some(Self::SetOutput),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SetColor => "set-color",
            Self::SetMode => "set-mode",
            Self::Ota => "ota",
            Self::GetVersion => "get-version",
            Self::SetOutput => "set-output",
        }
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> Self {
        cmd.code()
    }
}

/// Expected total length of the confirmation to a request command
///
/// `None` means the reply carries a variable payload and the exact length
/// check is skipped. Unknown commands are expected to answer without payload.
pub fn compute_response_length(command: u8) -> Option<usize> {
    let payload = match Command::from_code(command) {
        Some(Command::GetVersion) => return None,
        Some(Command::SetColor | Command::SetMode | Command::SetOutput | Command::Ota) => 0,
        None => 0,
    };
    Some(DATA_OFFSET + payload + CHECKSUM_LENGTH)
}

/// Read a big-endian u16 at `offset`
pub fn read_u16_be(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Write a big-endian u16 at `offset`
pub fn write_u16_be(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn destination(msg: &[u8]) -> u8 {
    msg[DEST_OFFSET]
}

pub fn source(msg: &[u8]) -> u8 {
    msg[SRC_OFFSET]
}

pub fn sequence(msg: &[u8]) -> u16 {
    read_u16_be(msg, SEQNR_OFFSET)
}

pub fn command(msg: &[u8]) -> u8 {
    msg[CMD_OFFSET]
}

/// Declared payload length; `msg` must hold at least `DATA_OFFSET` bytes
pub fn data_length(msg: &[u8]) -> usize {
    read_u16_be(msg, DATALEN_OFFSET) as usize
}

/// Payload slice as declared by the header
pub fn payload(msg: &[u8]) -> &[u8] {
    let len = data_length(msg);
    &msg[DATA_OFFSET..DATA_OFFSET + len]
}

/// Lay out preamble, addresses, sequence number and command
///
/// Returns the offset of the data-length field.
pub fn write_request_basis(
    req: &mut [u8],
    destination: u8,
    source: u8,
    sequence: u16,
    command: u8,
) -> usize {
    req[PREAMBLE_OFFSET..PREAMBLE_OFFSET + PREAMBLE_LENGTH].fill(PREAMBLE);
    req[DEST_OFFSET] = destination;
    req[SRC_OFFSET] = source;
    write_u16_be(req, SEQNR_OFFSET, sequence);
    req[CMD_OFFSET] = command;
    DATALEN_OFFSET
}

/// CRC-16/MODBUS over `data`
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Append the checksum of `msg[..msg_length]` and return the final length
pub fn append_checksum(msg: &mut [u8], msg_length: usize) -> usize {
    let crc = crc16(&msg[..msg_length]);
    write_u16_be(msg, msg_length, crc);
    msg_length + CHECKSUM_LENGTH
}

/// Validate minimum size, preamble and checksum of a complete frame
pub fn verify_frame(msg: &[u8]) -> Result<usize> {
    if msg.len() < MIN_MESSAGE_LENGTH {
        return Err(MendeleevError::bad_data(format!(
            "Frame too short: {} bytes",
            msg.len()
        )));
    }

    if msg[PREAMBLE_OFFSET..PREAMBLE_OFFSET + PREAMBLE_LENGTH]
        .iter()
        .any(|&b| b != PREAMBLE)
    {
        return Err(MendeleevError::bad_data("Invalid preamble"));
    }

    let body = msg.len() - CHECKSUM_LENGTH;
    let expected = crc16(&msg[..body]);
    let received = read_u16_be(msg, body);
    if expected != received {
        return Err(MendeleevError::BadCrc { expected, received });
    }

    Ok(msg.len())
}

/// Build a complete frame, checksum included
///
/// Fails with `TooManyData` when the payload does not fit in a frame.
pub fn encode_frame(
    destination: u8,
    source: u8,
    sequence: u16,
    command: u8,
    data: &[u8],
) -> Result<Vec<u8>> {
    if data.len() > MAX_DATA_LENGTH {
        return Err(MendeleevError::too_many_data(format!(
            "{} bytes exceed the {} byte payload limit",
            data.len(),
            MAX_DATA_LENGTH
        )));
    }

    let mut frame = vec![0u8; MSG_OVERHEAD + data.len()];
    let mut len = write_request_basis(&mut frame, destination, source, sequence, command);
    write_u16_be(&mut frame, len, data.len() as u16);
    len += DATALEN_LENGTH;
    frame[len..len + data.len()].copy_from_slice(data);
    len += data.len();
    let total = append_checksum(&mut frame, len);
    debug_assert_eq!(total, frame.len());

    Ok(frame)
}

/// Per-link sequence number generator
///
/// Starts at 1 and wraps from 0xFFFF back to 1; zero is never issued.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u16,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Start from a specific value (zero is bumped to one)
    pub fn starting_at(next: u16) -> Self {
        Self { next: next.max(1) }
    }

    pub fn next_sequence(&mut self) -> u16 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        if self.next == 0 {
            self.next = 1;
        }
        id
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
