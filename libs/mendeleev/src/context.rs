//! Master context
//!
//! One [`Context`] per logical connection. It owns the transport, the target
//! slave address, the two timeouts, the recovery policy and the debug flag.
//! The round-trip machinery lives in `receive`, `confirm` and `dispatch`,
//! each adding methods to `Context`.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::constants::{DEFAULT_BYTE_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT};
use crate::error::{MendeleevError, Result};
use crate::transport::{TcpTransport, Transport};

#[cfg(feature = "rtu")]
use crate::transport::RtuTransport;

/// Error recovery policy
///
/// `LINK` reconnects, flushes and retries sends after transport failures.
/// `PROTOCOL` sleeps and flushes after a malformed or uncorrelated frame.
/// The error that triggered recovery is always the one returned.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ErrorRecovery(u8);

impl ErrorRecovery {
    pub const NONE: Self = Self(0);
    pub const LINK: Self = Self(1 << 1);
    pub const PROTOCOL: Self = Self(1 << 2);

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build from raw bits; unknown bits are rejected
    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !(Self::LINK.0 | Self::PROTOCOL.0) == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ErrorRecovery {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ErrorRecovery {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ErrorRecovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::LINK) {
            names.push("LINK");
        }
        if self.contains(Self::PROTOCOL) {
            names.push("PROTOCOL");
        }
        if names.is_empty() {
            write!(f, "ErrorRecovery(NONE)")
        } else {
            write!(f, "ErrorRecovery({})", names.join(" | "))
        }
    }
}

/// Convert a (seconds, microseconds) pair, microseconds below one second
fn timeout_from_parts(sec: u32, usec: u32) -> Result<Duration> {
    if usec > 999_999 {
        return Err(MendeleevError::invalid_argument(format!(
            "Timeout microseconds must be below 1000000, got {}",
            usec
        )));
    }
    Ok(Duration::from_secs(u64::from(sec)) + Duration::from_micros(u64::from(usec)))
}

fn timeout_to_parts(timeout: Duration) -> (u32, u32) {
    (timeout.as_secs() as u32, timeout.subsec_micros())
}

/// Master side of a Mendeleev link
pub struct Context {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) slave: Option<u8>,
    pub(crate) debug: bool,
    pub(crate) error_recovery: ErrorRecovery,
    pub(crate) response_timeout: Duration,
    pub(crate) byte_timeout: Duration,
    pub(crate) send_retry_limit: Option<u32>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("transport", &self.transport)
            .field("slave", &self.slave)
            .field("debug", &self.debug)
            .field("error_recovery", &self.error_recovery)
            .field("response_timeout", &self.response_timeout)
            .field("byte_timeout", &self.byte_timeout)
            .field("send_retry_limit", &self.send_retry_limit)
            .finish()
    }
}

impl Context {
    /// Bind a context to a transport; the link is not opened yet
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            slave: None,
            debug: false,
            error_recovery: ErrorRecovery::NONE,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            byte_timeout: DEFAULT_BYTE_TIMEOUT,
            send_retry_limit: None,
        }
    }

    /// Context over a serial line; parity is 'N', 'E' or 'O'
    #[cfg(feature = "rtu")]
    pub fn new_rtu(
        device: &str,
        baud_rate: u32,
        parity: char,
        data_bits: u8,
        stop_bits: u8,
    ) -> Result<Self> {
        Ok(Self::new(RtuTransport::new(
            device, baud_rate, parity, data_bits, stop_bits,
        )?))
    }

    /// Context over a TCP connection
    pub fn new_tcp(host: &str, port: u16) -> Result<Self> {
        Ok(Self::new(TcpTransport::new(host, port)?))
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    /// Set the device every request is addressed to
    pub fn set_slave(&mut self, slave: u8) -> Result<()> {
        self.transport.set_slave(slave)?;
        self.slave = Some(slave);
        Ok(())
    }

    pub fn slave(&self) -> Option<u8> {
        self.slave
    }

    pub fn set_error_recovery(&mut self, error_recovery: ErrorRecovery) {
        self.error_recovery = error_recovery;
    }

    pub fn error_recovery(&self) -> ErrorRecovery {
        self.error_recovery
    }

    /// Time allowed for the first byte of a confirmation; must be non-zero
    pub fn set_response_timeout(&mut self, sec: u32, usec: u32) -> Result<()> {
        if sec == 0 && usec == 0 {
            return Err(MendeleevError::invalid_argument(
                "Response timeout must be greater than zero",
            ));
        }
        self.response_timeout = timeout_from_parts(sec, usec)?;
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Response timeout as (seconds, microseconds)
    pub fn response_timeout_parts(&self) -> (u32, u32) {
        timeout_to_parts(self.response_timeout)
    }

    /// Time allowed between two bytes of a frame; zero disables it
    pub fn set_byte_timeout(&mut self, sec: u32, usec: u32) -> Result<()> {
        self.byte_timeout = timeout_from_parts(sec, usec)?;
        Ok(())
    }

    pub fn byte_timeout(&self) -> Duration {
        self.byte_timeout
    }

    pub fn byte_timeout_parts(&self) -> (u32, u32) {
        timeout_to_parts(self.byte_timeout)
    }

    /// Cap LINK send retries; `None` retries until the send succeeds
    pub fn set_send_retry_limit(&mut self, limit: Option<u32>) {
        self.send_retry_limit = limit;
    }

    pub fn send_retry_limit(&self) -> Option<u32> {
        self.send_retry_limit
    }

    /// Enable frame dumps and round-trip traces at debug level
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn transport_type(&self) -> &'static str {
        self.transport.transport_type()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    // ------------------------------------------------------------------------
    // Link lifecycle
    // ------------------------------------------------------------------------

    pub async fn connect(&mut self) -> Result<()> {
        if self.debug {
            debug!("Connecting {} transport", self.transport.transport_type());
        }
        self.transport.connect().await
    }

    pub async fn close(&mut self) {
        self.transport.close().await;
    }

    /// Close the link and release the context
    pub async fn free(mut self) {
        self.transport.close().await;
    }

    /// Discard pending input; returns the number of bytes dropped when known
    pub async fn flush(&mut self) -> Result<usize> {
        let flushed = self.transport.flush().await?;
        if self.debug {
            debug!("Bytes flushed ({})", flushed);
        }
        Ok(flushed)
    }

    // ------------------------------------------------------------------------
    // Recovery helpers
    // ------------------------------------------------------------------------

    pub(crate) fn sleep_response_timeout(&self) -> tokio::time::Sleep {
        tokio::time::sleep(self.response_timeout)
    }

    /// Flush during recovery; a failing flush never masks the original error
    pub(crate) async fn recovery_flush(&mut self) {
        if let Err(e) = self.flush().await {
            warn!("Flush during recovery failed: {}", e);
        }
    }

    /// Replace the link; a failing reconnect is left for the next call to hit
    pub(crate) async fn reconnect(&mut self) {
        self.transport.close().await;
        match self.transport.connect().await {
            Ok(()) => info!("Reconnected {} transport", self.transport.transport_type()),
            Err(e) => error!("Reconnect failed: {}", e),
        }
    }

    /// Under PROTOCOL recovery: wait out the rest of the frame, then flush
    pub(crate) async fn recover_protocol(&mut self) {
        if self.error_recovery.contains(ErrorRecovery::PROTOCOL) {
            warn!("Protocol error, flushing after {:?}", self.response_timeout);
            self.sleep_response_timeout().await;
            self.recovery_flush().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn mock_context() -> Context {
        let (mock, _handle) = MockTransport::new();
        Context::new(mock)
    }

    #[test]
    fn test_defaults() {
        let ctx = mock_context();
        assert_eq!(ctx.slave(), None);
        assert!(!ctx.debug());
        assert!(ctx.error_recovery().is_empty());
        assert_eq!(ctx.response_timeout(), Duration::from_millis(500));
        assert_eq!(ctx.byte_timeout_parts(), (0, 500_000));
        assert_eq!(ctx.send_retry_limit(), None);
        assert_eq!(ctx.transport_type(), "mock");
    }

    #[test]
    fn test_response_timeout_validation() {
        let mut ctx = mock_context();
        assert!(matches!(
            ctx.set_response_timeout(0, 0).unwrap_err(),
            MendeleevError::InvalidArgument(_)
        ));
        assert!(ctx.set_response_timeout(0, 1_000_000).is_err());
        // Rejected values leave the previous setting in place
        assert_eq!(ctx.response_timeout_parts(), (0, 500_000));

        ctx.set_response_timeout(2, 999_999).unwrap();
        assert_eq!(ctx.response_timeout_parts(), (2, 999_999));
    }

    #[test]
    fn test_byte_timeout_may_be_zero() {
        let mut ctx = mock_context();
        ctx.set_byte_timeout(0, 0).unwrap();
        assert!(ctx.byte_timeout().is_zero());
        assert!(ctx.set_byte_timeout(1, 1_000_000).is_err());
        assert!(ctx.byte_timeout().is_zero());
    }

    #[test]
    fn test_set_slave_goes_through_transport() {
        let mut ctx = mock_context();
        // The mock's own address is 0x00
        assert!(ctx.set_slave(0x00).is_err());
        assert_eq!(ctx.slave(), None);
        ctx.set_slave(0x01).unwrap();
        assert_eq!(ctx.slave(), Some(0x01));
    }

    #[test]
    fn test_error_recovery_bits() {
        let both = ErrorRecovery::LINK | ErrorRecovery::PROTOCOL;
        assert!(both.contains(ErrorRecovery::LINK));
        assert!(both.contains(ErrorRecovery::PROTOCOL));
        assert_eq!(both.bits(), 0b110);
        assert_eq!(ErrorRecovery::from_bits(0b110), Some(both));
        assert_eq!(ErrorRecovery::from_bits(0b001), None);
        assert_eq!(format!("{:?}", both), "ErrorRecovery(LINK | PROTOCOL)");

        let mut policy = ErrorRecovery::NONE;
        policy |= ErrorRecovery::PROTOCOL;
        assert!(!policy.contains(ErrorRecovery::LINK));
    }

    #[tokio::test]
    async fn test_connect_close_free() {
        let (mock, handle) = MockTransport::new();
        let mut ctx = Context::new(mock);

        ctx.connect().await.unwrap();
        assert!(ctx.is_connected());
        ctx.close().await;
        assert!(!ctx.is_connected());
        ctx.connect().await.unwrap();
        ctx.free().await;

        assert_eq!(handle.connects(), 2);
        assert_eq!(handle.closes(), 2);
    }

    #[tokio::test]
    async fn test_flush_reports_dropped_bytes() {
        let (mock, handle) = MockTransport::new();
        let mut ctx = Context::new(mock);
        handle.push_data(vec![0xA5; 5]);
        assert_eq!(ctx.flush().await.unwrap(), 5);
        assert_eq!(handle.pending(), 0);
    }

    #[cfg(feature = "rtu")]
    #[test]
    fn test_new_rtu_validates_serial_settings() {
        assert!(Context::new_rtu("/dev/ttyUSB0", 115_200, 'N', 8, 1).is_ok());
        assert!(Context::new_rtu("/dev/ttyUSB0", 115_200, 'Z', 8, 1).is_err());
        let ctx = Context::new_tcp("127.0.0.1", 4001).unwrap();
        assert_eq!(ctx.transport_type(), "tcp");
    }
}
