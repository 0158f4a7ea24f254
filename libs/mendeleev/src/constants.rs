//! Mendeleev frame layout constants
//!
//! ```text
//! [preamble(8)][dest(1)][src(1)][seq(2)][cmd(1)][datalen(2)][data(N)][checksum(2)]
//! ```

use std::time::Duration;

/// Byte repeated over the whole preamble
pub const PREAMBLE: u8 = 0xA5;

/// Destination address that every device accepts
pub const BROADCAST_ADDRESS: u8 = 0xFF;

pub const PREAMBLE_LENGTH: usize = 8;
pub const ADDR_LENGTH: usize = 1;
pub const SEQNR_LENGTH: usize = 2;
pub const CMD_LENGTH: usize = 1;
pub const DATALEN_LENGTH: usize = 2;
pub const CHECKSUM_LENGTH: usize = 2;

/// Preamble, destination, source and sequence number
pub const HEADER_LENGTH: usize = PREAMBLE_LENGTH + 2 * ADDR_LENGTH + SEQNR_LENGTH;

pub const PREAMBLE_OFFSET: usize = 0;
pub const DEST_OFFSET: usize = PREAMBLE_OFFSET + PREAMBLE_LENGTH;
pub const SRC_OFFSET: usize = DEST_OFFSET + ADDR_LENGTH;
pub const SEQNR_OFFSET: usize = SRC_OFFSET + ADDR_LENGTH;
pub const CMD_OFFSET: usize = SEQNR_OFFSET + SEQNR_LENGTH;
pub const DATALEN_OFFSET: usize = CMD_OFFSET + CMD_LENGTH;
/// Also the number of bytes the receiver needs before it knows the frame size
pub const DATA_OFFSET: usize = DATALEN_OFFSET + DATALEN_LENGTH;

/// Bytes of every frame that are not payload (17)
pub const MSG_OVERHEAD: usize = HEADER_LENGTH + CMD_LENGTH + DATALEN_LENGTH + CHECKSUM_LENGTH;

/// Size of a frame without payload, i.e. every fixed-size confirmation
pub const MIN_MESSAGE_LENGTH: usize = DATA_OFFSET + CHECKSUM_LENGTH;

/// Largest frame the engine sends or accepts
pub const MAX_MESSAGE_LENGTH: usize = 260;

/// Largest payload a single request can carry (243)
pub const MAX_DATA_LENGTH: usize = MAX_MESSAGE_LENGTH - MSG_OVERHEAD;

/// Default time to first byte of a confirmation
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_micros(500_000);

/// Default time allowed between two bytes of the same frame
pub const DEFAULT_BYTE_TIMEOUT: Duration = Duration::from_micros(500_000);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        assert_eq!(DEST_OFFSET, 8);
        assert_eq!(SRC_OFFSET, 9);
        assert_eq!(SEQNR_OFFSET, 10);
        assert_eq!(CMD_OFFSET, 12);
        assert_eq!(DATALEN_OFFSET, 13);
        assert_eq!(DATA_OFFSET, 15);
        assert_eq!(MSG_OVERHEAD, 17);
        assert_eq!(MIN_MESSAGE_LENGTH, 17);
        assert_eq!(MAX_DATA_LENGTH, 243);
    }
}
