//! Receive engine
//!
//! Reads one frame of unknown length. The first `DATA_OFFSET` bytes carry the
//! declared payload length; once they are in, the engine knows how much is
//! left. Two budgets bound the waits:
//!
//! - `response_timeout`: time to the first byte, and to the whole frame when
//!   the byte timeout is zero.
//! - `byte_timeout`: re-armed after every read while bytes are missing.

use std::io;

use tokio::time::Instant;
use tracing::{debug, warn};

use common::hex::encode_spaced;

use crate::constants::{CHECKSUM_LENGTH, DATA_OFFSET};
use crate::context::{Context, ErrorRecovery};
use crate::error::{MendeleevError, Result};
use crate::frame;

impl Context {
    /// Read one complete, integrity-checked frame into `msg`
    ///
    /// Returns the frame length. `msg` must hold at least `DATA_OFFSET` bytes;
    /// a declared length that would not fit is rejected with `TooManyData`.
    pub(crate) async fn receive_msg(&mut self, msg: &mut [u8]) -> Result<usize> {
        if self.debug {
            debug!("Waiting for a confirmation...");
        }

        let mut length_to_read = DATA_OFFSET;
        let mut msg_length = 0;
        let mut deadline = Instant::now() + self.response_timeout;

        while length_to_read != 0 {
            let wait = deadline.saturating_duration_since(Instant::now());
            if let Err(e) = self.transport.select(wait).await {
                self.recover_wait_failure(&e).await;
                return Err(e);
            }

            let received = match self
                .transport
                .recv(&mut msg[msg_length..msg_length + length_to_read])
                .await
            {
                Ok(0) => Err(MendeleevError::ConnectionReset),
                other => other,
            };
            let n = match received {
                Ok(n) => n,
                Err(e) => {
                    self.recover_read_failure(&e).await;
                    return Err(e);
                },
            };

            if self.debug {
                debug!(
                    hex_data = %encode_spaced(&msg[msg_length..msg_length + n]),
                    length = n,
                    direction = "recv",
                    "[Mendeleev] Raw packet"
                );
            }

            msg_length += n;
            length_to_read -= n;

            if length_to_read == 0 {
                let total = DATA_OFFSET + frame::data_length(msg) + CHECKSUM_LENGTH;
                if total > msg.len() {
                    self.recover_protocol().await;
                    return Err(MendeleevError::too_many_data(format!(
                        "Declared frame length {} exceeds {} bytes",
                        total,
                        msg.len()
                    )));
                }
                if msg_length < total {
                    length_to_read = total - msg_length;
                }
            }

            if length_to_read > 0 && !self.byte_timeout.is_zero() {
                deadline = Instant::now() + self.byte_timeout;
            }
        }

        match self.transport.check_integrity(&msg[..msg_length]) {
            Ok(length) => Ok(length),
            Err(e) => {
                if self.debug {
                    debug!("Integrity check failed: {}", e);
                }
                self.recover_protocol().await;
                Err(e)
            },
        }
    }

    async fn recover_wait_failure(&mut self, err: &MendeleevError) {
        if !self.error_recovery.contains(ErrorRecovery::LINK) {
            return;
        }
        match err.io_kind() {
            Some(io::ErrorKind::TimedOut) => {
                warn!("No response within {:?}, flushing", self.response_timeout);
                self.sleep_response_timeout().await;
                self.recovery_flush().await;
            },
            Some(io::ErrorKind::NotConnected) => {
                warn!("Link lost while waiting: {}", err);
                self.reconnect().await;
            },
            _ => {},
        }
    }

    async fn recover_read_failure(&mut self, err: &MendeleevError) {
        if !self.error_recovery.contains(ErrorRecovery::LINK) {
            return;
        }
        if matches!(
            err.io_kind(),
            Some(
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::NotConnected
            )
        ) {
            warn!("Read failed: {}, reconnecting", err);
            self.reconnect().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use std::time::Duration;

    use tracing_test::traced_test;

    use crate::constants::MAX_MESSAGE_LENGTH;
    use crate::transport::{MockHandle, MockTransport};

    use super::*;

    async fn connected() -> (Context, MockHandle) {
        let (mock, handle) = MockTransport::new();
        let mut ctx = Context::new(mock);
        ctx.connect().await.unwrap();
        (ctx, handle)
    }

    #[tokio::test]
    async fn test_reads_declared_payload() {
        let (mut ctx, handle) = connected().await;
        let frame = frame::encode_frame(0x00, 0x01, 1, 0x03, b"v1.2").unwrap();
        handle.push_data(frame.clone());

        let mut buf = [0u8; MAX_MESSAGE_LENGTH];
        let len = ctx.receive_msg(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], frame.as_slice());
    }

    #[tokio::test]
    async fn test_zero_length_read_is_reset() {
        let (mut ctx, handle) = connected().await;
        handle.push_closed();

        let mut buf = [0u8; MAX_MESSAGE_LENGTH];
        let err = ctx.receive_msg(&mut buf).await.unwrap_err();
        assert!(matches!(err, MendeleevError::ConnectionReset));
        // No recovery without LINK
        assert_eq!(handle.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_declared_length_larger_than_buffer() {
        let (mut ctx, handle) = connected().await;
        ctx.set_error_recovery(ErrorRecovery::PROTOCOL);

        let mut header = frame::encode_frame(0x00, 0x01, 1, 0x03, &[]).unwrap();
        header.truncate(DATA_OFFSET);
        frame::write_u16_be(&mut header, crate::constants::DATALEN_OFFSET, 0xFFFF);
        handle.push_data(header);

        let mut buf = [0u8; MAX_MESSAGE_LENGTH];
        let err = ctx.receive_msg(&mut buf).await.unwrap_err();
        assert!(matches!(err, MendeleevError::TooManyData(_)));
        assert_eq!(handle.flushes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_mid_frame_times_out() {
        let (mut ctx, handle) = connected().await;
        ctx.set_byte_timeout(0, 100_000).unwrap();
        let frame = frame::encode_frame(0x00, 0x01, 1, 0x03, b"abc").unwrap();
        handle.push_data(frame[..DATA_OFFSET + 1].to_vec());
        handle.push_silence();

        let mut buf = [0u8; MAX_MESSAGE_LENGTH];
        let err = ctx.receive_msg(&mut buf).await.unwrap_err();
        assert!(matches!(err, MendeleevError::Timeout));
        assert_eq!(
            handle.select_timeouts().last().copied(),
            Some(Duration::from_millis(100))
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_debug_dumps_received_bytes() {
        let (mut ctx, handle) = connected().await;
        ctx.set_debug(true);
        handle.push_data(frame::encode_frame(0x00, 0x01, 1, 0x00, &[]).unwrap());

        let mut buf = [0u8; MAX_MESSAGE_LENGTH];
        ctx.receive_msg(&mut buf).await.unwrap();

        assert!(logs_contain("Waiting for a confirmation"));
        assert!(logs_contain("A5 A5 A5 A5 A5 A5 A5 A5 00 01"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_no_dumps_without_debug() {
        let (mut ctx, handle) = connected().await;
        handle.push_data(frame::encode_frame(0x00, 0x01, 1, 0x00, &[]).unwrap());

        let mut buf = [0u8; MAX_MESSAGE_LENGTH];
        ctx.receive_msg(&mut buf).await.unwrap();

        assert!(!logs_contain("Raw packet"));
    }
}
