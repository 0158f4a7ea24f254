//! Transport Layer
//!
//! The engine never touches a serial port or socket directly. Everything it
//! needs from the link is expressed by the [`Transport`] trait, bound once
//! when the [`Context`](crate::Context) is built.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │   Context (receive engine, validator, ...)    │
//! └───────────────────────────────────────────────┘
//!                        │
//!                        ▼
//! ┌───────────────────────────────────────────────┐
//! │             Transport (trait)                 │
//! │ connect / send / select / recv / integrity    │
//! └───────────────────────────────────────────────┘
//!          │                 │               │
//!          ▼                 ▼               ▼
//!   ┌─────────────┐   ┌─────────────┐  ┌───────────┐
//!   │ RtuTransport│   │ TcpTransport│  │   Mock    │
//!   │ (serial)    │   │ (stream)    │  │ (tests)   │
//!   └─────────────┘   └─────────────┘  └───────────┘
//! ```

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
#[cfg(feature = "rtu")]
pub mod rtu;
pub mod tcp;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::constants::BROADCAST_ADDRESS;
use crate::error::{MendeleevError, Result};
use crate::frame;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockEvent, MockHandle, MockTransport};
#[cfg(feature = "rtu")]
pub use rtu::{RtsMode, RtuTransport, SerialMode};
pub use tcp::TcpTransport;

/// Operations the engine invokes on a concrete link
///
/// Implementations own their descriptor exclusively. All I/O methods take
/// `&mut self`, so one round trip at a time is enforced by the borrow checker.
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Short identifier used in traces ("rtu", "tcp", "mock")
    fn transport_type(&self) -> &'static str;

    /// Validate a slave address for this addressing mode
    fn set_slave(&mut self, slave: u8) -> Result<()>;

    /// Write the header up to the command byte with a fresh sequence number
    ///
    /// Returns the offset where the data-length field starts.
    fn build_request_basis(&mut self, slave: u8, command: u8, req: &mut [u8]) -> usize;

    /// Complete an outgoing frame (checksum trailer) and return its final length
    fn send_msg_pre(&self, msg: &mut [u8], msg_length: usize) -> usize;

    /// Raw send; returns the number of bytes written
    async fn send(&mut self, msg: &[u8]) -> Result<usize>;

    /// Wait until data can be read, at most `timeout`
    ///
    /// Fails with [`MendeleevError::Timeout`](crate::MendeleevError::Timeout)
    /// when nothing arrives in time.
    async fn select(&mut self, timeout: Duration) -> Result<()>;

    /// Raw receive into `buf`; `Ok(0)` means the peer closed the link
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Validate a complete frame and return its length
    fn check_integrity(&self, msg: &[u8]) -> Result<usize>;

    /// Transport specific correlation run before the generic checks
    fn pre_check_confirmation(&self, _req: &[u8], _rsp: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Whether a received indication is addressed to this end of the link
    fn accepts_indication(&self, _msg: &[u8]) -> bool {
        true
    }

    async fn connect(&mut self) -> Result<()>;

    async fn close(&mut self);

    /// Discard pending input; returns the number of bytes dropped when known
    async fn flush(&mut self) -> Result<usize>;

    fn is_connected(&self) -> bool;
}

/// Address check shared by the addressed (bus) transports
///
/// The confirmation must come from the slave the request was sent to and be
/// addressed back to the request's source. Broadcast requests are not checked.
pub(crate) fn check_response_addresses(req: &[u8], rsp: &[u8]) -> Result<()> {
    let requested = frame::destination(req);
    if requested == BROADCAST_ADDRESS {
        return Ok(());
    }

    let responder = frame::source(rsp);
    if responder != requested {
        return Err(MendeleevError::BadSlave {
            expected: requested,
            received: responder,
        });
    }

    let own = frame::source(req);
    if frame::destination(rsp) != own {
        return Err(MendeleevError::bad_data(format!(
            "Response addressed to 0x{:02X}, not to 0x{:02X}",
            frame::destination(rsp),
            own
        )));
    }

    Ok(())
}

/// Indication filter for the addressed transports
pub(crate) fn addressed_to(own_address: u8, msg: &[u8]) -> bool {
    let dest = frame::destination(msg);
    dest == own_address || dest == BROADCAST_ADDRESS
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn req(dest: u8) -> Vec<u8> {
        frame::encode_frame(dest, 0x00, 5, 0x01, &[]).unwrap()
    }

    #[test]
    fn test_response_from_requested_slave() {
        let rsp = frame::encode_frame(0x00, 0x01, 5, 0x01, &[]).unwrap();
        assert!(check_response_addresses(&req(0x01), &rsp).is_ok());
    }

    #[test]
    fn test_response_from_other_slave() {
        let rsp = frame::encode_frame(0x00, 0x02, 5, 0x01, &[]).unwrap();
        let err = check_response_addresses(&req(0x01), &rsp).unwrap_err();
        assert!(matches!(
            err,
            MendeleevError::BadSlave {
                expected: 0x01,
                received: 0x02
            }
        ));
    }

    #[test]
    fn test_response_to_other_master() {
        let rsp = frame::encode_frame(0x09, 0x01, 5, 0x01, &[]).unwrap();
        assert!(matches!(
            check_response_addresses(&req(0x01), &rsp).unwrap_err(),
            MendeleevError::BadData(_)
        ));
    }

    #[test]
    fn test_broadcast_request_skips_check() {
        let rsp = frame::encode_frame(0x09, 0x02, 5, 0x01, &[]).unwrap();
        assert!(check_response_addresses(&req(BROADCAST_ADDRESS), &rsp).is_ok());
    }

    #[test]
    fn test_addressed_to() {
        let mine = frame::encode_frame(0x10, 0x01, 1, 0x00, &[]).unwrap();
        let broadcast = frame::encode_frame(BROADCAST_ADDRESS, 0x01, 1, 0x00, &[]).unwrap();
        let other = frame::encode_frame(0x11, 0x01, 1, 0x00, &[]).unwrap();

        assert!(addressed_to(0x10, &mine));
        assert!(addressed_to(0x10, &broadcast));
        assert!(!addressed_to(0x10, &other));
    }
}
