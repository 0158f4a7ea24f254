//! Mendeleev error types
//!
//! Transport failures and protocol failures share one error type so the
//! caller sees a single channel. Recovery code classifies errors through
//! [`MendeleevError::io_kind`] instead of matching on raw OS codes.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type for Mendeleev operations
pub type Result<T> = std::result::Result<T, MendeleevError>;

/// Protocol exception codes a device may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveOrServerFailure = 0x04,
    Acknowledge = 0x05,
    SlaveOrServerBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParity = 0x08,
    NotDefined = 0x09,
    GatewayPath = 0x0A,
    GatewayTarget = 0x0B,
}

impl ExceptionCode {
    /// Raw exception code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::SlaveOrServerFailure => "Slave device or server failure",
            Self::Acknowledge => "Acknowledge",
            Self::SlaveOrServerBusy => "Slave device or server is busy",
            Self::NegativeAcknowledge => "Negative acknowledge",
            Self::MemoryParity => "Memory parity error",
            Self::NotDefined => "Not defined",
            Self::GatewayPath => "Gateway path unavailable",
            Self::GatewayTarget => "Target device failed to respond",
        }
    }
}

impl TryFrom<u8> for ExceptionCode {
    type Error = MendeleevError;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::SlaveOrServerFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::SlaveOrServerBusy,
            0x07 => Self::NegativeAcknowledge,
            0x08 => Self::MemoryParity,
            0x09 => Self::NotDefined,
            0x0A => Self::GatewayPath,
            0x0B => Self::GatewayTarget,
            other => return Err(MendeleevError::UnknownException(other)),
        })
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.code())
    }
}

/// Mendeleev errors
#[derive(Debug, Error)]
pub enum MendeleevError {
    /// Rejected before any I/O took place
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No data within the response or byte timeout
    #[error("Connection timed out")]
    Timeout,

    /// Peer closed the link (zero-length read)
    #[error("Connection reset by peer")]
    ConnectionReset,

    /// Transport-level failure reported by the operating system
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Well-formed exception frame: the device declined the command
    #[error("Protocol exception: {0}")]
    Exception(ExceptionCode),

    /// Checksum trailer does not match the frame content
    #[error("Invalid CRC: expected 0x{expected:04X}, got 0x{received:04X}")]
    BadCrc { expected: u16, received: u16 },

    /// Frame does not correlate with the request or is malformed
    #[error("Invalid data: {0}")]
    BadData(String),

    /// High-bit command that is not a valid exception frame
    #[error("Invalid exception code: 0x{0:02X}")]
    BadException(u8),

    /// Exception code outside the known range
    #[error("Unknown exception code: 0x{0:02X}")]
    UnknownException(u8),

    /// Payload or declared length exceeds the frame capacity
    #[error("Too many data: {0}")]
    TooManyData(String),

    /// Response source does not match the addressed slave
    #[error("Response not from requested slave: expected {expected}, got {received}")]
    BadSlave { expected: u8, received: u8 },
}

impl MendeleevError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn bad_data(msg: impl Into<String>) -> Self {
        Self::BadData(msg.into())
    }

    pub fn too_many_data(msg: impl Into<String>) -> Self {
        Self::TooManyData(msg.into())
    }

    /// Short description of the error class, without details
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "Invalid argument",
            Self::Timeout => "Connection timed out",
            Self::ConnectionReset => "Connection reset by peer",
            Self::Io(_) => "Input/output error",
            Self::Exception(code) => code.description(),
            Self::BadCrc { .. } => "Invalid CRC",
            Self::BadData(_) => "Invalid data",
            Self::BadException(_) => "Invalid exception code",
            Self::UnknownException(_) => "Unknown exception code",
            Self::TooManyData(_) => "Too many data",
            Self::BadSlave { .. } => "Response not from requested slave",
        }
    }

    /// I/O classification used by the link recovery policy
    ///
    /// `NotConnected` stands for a bad or closed descriptor.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Timeout => Some(io::ErrorKind::TimedOut),
            Self::ConnectionReset => Some(io::ErrorKind::ConnectionReset),
            Self::Io(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Transport or timing failure
    pub fn is_link_error(&self) -> bool {
        self.io_kind().is_some()
    }

    /// Framing, integrity or correlation failure
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::BadCrc { .. }
                | Self::BadData(_)
                | Self::BadException(_)
                | Self::UnknownException(_)
                | Self::TooManyData(_)
                | Self::BadSlave { .. }
        )
    }

    /// The exception code when the device answered with an exception frame
    pub fn exception(&self) -> Option<ExceptionCode> {
        match self {
            Self::Exception(code) => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_exception_code_round_trip_and_descriptions() {
        let codes = [
            (0x01, "Illegal function"),
            (0x02, "Illegal data address"),
            (0x03, "Illegal data value"),
            (0x04, "Slave device or server failure"),
            (0x05, "Acknowledge"),
            (0x06, "Slave device or server is busy"),
            (0x07, "Negative acknowledge"),
            (0x08, "Memory parity error"),
            (0x0A, "Gateway path unavailable"),
            (0x0B, "Target device failed to respond"),
        ];

        for (raw, desc) in codes {
            let code = ExceptionCode::try_from(raw).unwrap();
            assert_eq!(code.code(), raw);
            assert_eq!(code.description(), desc);
        }
    }

    #[test]
    fn test_unknown_exception_code() {
        let err = ExceptionCode::try_from(0x0C).unwrap_err();
        assert!(matches!(err, MendeleevError::UnknownException(0x0C)));
        assert!(ExceptionCode::try_from(0x00).is_err());
    }

    #[test]
    fn test_io_kind_classification() {
        assert_eq!(
            MendeleevError::Timeout.io_kind(),
            Some(io::ErrorKind::TimedOut)
        );
        assert_eq!(
            MendeleevError::ConnectionReset.io_kind(),
            Some(io::ErrorKind::ConnectionReset)
        );
        let pipe = MendeleevError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(pipe.io_kind(), Some(io::ErrorKind::BrokenPipe));
        assert!(pipe.is_link_error());
        assert_eq!(MendeleevError::bad_data("x").io_kind(), None);
    }

    #[test]
    fn test_protocol_vs_link_errors() {
        assert!(MendeleevError::BadCrc {
            expected: 1,
            received: 2
        }
        .is_protocol_error());
        assert!(MendeleevError::BadSlave {
            expected: 1,
            received: 2
        }
        .is_protocol_error());
        assert!(!MendeleevError::Timeout.is_protocol_error());
        assert!(!MendeleevError::Exception(ExceptionCode::NegativeAcknowledge).is_protocol_error());
        assert!(!MendeleevError::invalid_argument("x").is_link_error());
    }

    #[test]
    fn test_display_messages() {
        let err = MendeleevError::Exception(ExceptionCode::NegativeAcknowledge);
        assert_eq!(
            err.to_string(),
            "Protocol exception: Negative acknowledge (0x07)"
        );
        assert_eq!(err.description(), "Negative acknowledge");
        assert_eq!(
            err.exception(),
            Some(ExceptionCode::NegativeAcknowledge)
        );

        let crc = MendeleevError::BadCrc {
            expected: 0x1234,
            received: 0xABCD,
        };
        assert_eq!(crc.to_string(), "Invalid CRC: expected 0x1234, got 0xABCD");
        assert_eq!(crc.description(), "Invalid CRC");
    }
}
