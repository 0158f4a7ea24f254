//! Client configuration
//!
//! Serde model of everything needed to build a [`Context`]: the transport
//! and the engine settings. Loaded by the tools through
//! `common::load_config` (defaults, then file, then `MENDELEEV_*` variables).
//!
//! ```yaml
//! slave: 1
//! response_timeout_ms: 500
//! byte_timeout_ms: 500
//! error_recovery: [link, protocol]
//! transport:
//!   type: rtu
//!   device: /dev/ttyUSB0
//!   baud_rate: 115200
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{Context, ErrorRecovery};
use crate::error::{MendeleevError, Result};
use crate::transport::tcp::DEFAULT_CONNECT_TIMEOUT;
use crate::transport::TcpTransport;

#[cfg(feature = "rtu")]
use crate::transport::{RtsMode, RtuTransport, SerialMode};

/// One entry of the recovery policy list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    Link,
    Protocol,
}

/// Serial line settings
#[cfg(feature = "rtu")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuConfig {
    /// Serial device path (e.g. "/dev/ttyUSB0", "COM1")
    pub device: String,
    pub baud_rate: u32,
    /// 'N', 'E' or 'O'
    pub parity: char,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub serial_mode: SerialMode,
    pub rts: RtsMode,
    /// RTS settle time; one character time when unset
    pub rts_delay_us: Option<u64>,
    /// Source address of outgoing requests
    pub own_address: u8,
}

#[cfg(feature = "rtu")]
impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            parity: 'N',
            data_bits: 8,
            stop_bits: 1,
            serial_mode: SerialMode::Rs232,
            rts: RtsMode::None,
            rts_delay_us: None,
            own_address: 0x00,
        }
    }
}

/// TCP peer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub own_address: u8,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4001,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            own_address: 0x00,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    #[cfg(feature = "rtu")]
    Rtu(RtuConfig),
    Tcp(TcpConfig),
}

impl Default for TransportConfig {
    #[cfg(feature = "rtu")]
    fn default() -> Self {
        Self::Rtu(RtuConfig::default())
    }

    #[cfg(not(feature = "rtu"))]
    fn default() -> Self {
        Self::Tcp(TcpConfig::default())
    }
}

/// Engine and transport settings for one context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target device; commands are rejected while unset
    pub slave: Option<u8>,
    pub response_timeout_ms: u64,
    /// Zero disables the inter-byte timeout
    pub byte_timeout_ms: u64,
    pub error_recovery: Vec<RecoveryMode>,
    /// Cap on LINK send retries; unbounded when unset
    pub send_retry_limit: Option<u32>,
    pub debug: bool,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            slave: None,
            response_timeout_ms: 500,
            byte_timeout_ms: 500,
            error_recovery: Vec::new(),
            send_retry_limit: None,
            debug: false,
            transport: TransportConfig::default(),
        }
    }
}

/// Split milliseconds into the (seconds, microseconds) pair the setters take
fn millis_to_parts(ms: u64) -> Result<(u32, u32)> {
    let sec = u32::try_from(ms / 1000)
        .map_err(|_| MendeleevError::invalid_argument(format!("Timeout {} ms is too large", ms)))?;
    Ok((sec, (ms % 1000) as u32 * 1000))
}

impl ClientConfig {
    /// Check settings that the setters would reject, without building anything
    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(MendeleevError::invalid_argument(
                "response_timeout_ms must be greater than zero",
            ));
        }
        millis_to_parts(self.response_timeout_ms)?;
        millis_to_parts(self.byte_timeout_ms)?;

        match &self.transport {
            #[cfg(feature = "rtu")]
            TransportConfig::Rtu(rtu) => {
                if self.slave == Some(rtu.own_address) {
                    return Err(MendeleevError::invalid_argument(format!(
                        "Slave 0x{:02X} equals the own address",
                        rtu.own_address
                    )));
                }
                if rtu.device.is_empty() {
                    return Err(MendeleevError::invalid_argument("device cannot be empty"));
                }
            },
            TransportConfig::Tcp(tcp) => {
                if tcp.host.is_empty() {
                    return Err(MendeleevError::invalid_argument("host cannot be empty"));
                }
                if tcp.connect_timeout_ms == 0 {
                    return Err(MendeleevError::invalid_argument(
                        "connect_timeout_ms must be greater than zero",
                    ));
                }
            },
        }
        Ok(())
    }

    pub fn recovery(&self) -> ErrorRecovery {
        self.error_recovery
            .iter()
            .fold(ErrorRecovery::NONE, |acc, mode| match mode {
                RecoveryMode::Link => acc | ErrorRecovery::LINK,
                RecoveryMode::Protocol => acc | ErrorRecovery::PROTOCOL,
            })
    }
}

impl Context {
    /// Build a context from configuration; the link is not opened yet
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut ctx = match &config.transport {
            #[cfg(feature = "rtu")]
            TransportConfig::Rtu(rtu) => {
                let mut transport = RtuTransport::new(
                    rtu.device.clone(),
                    rtu.baud_rate,
                    rtu.parity,
                    rtu.data_bits,
                    rtu.stop_bits,
                )?
                .with_own_address(rtu.own_address);
                transport.set_serial_mode(rtu.serial_mode);
                transport.set_rts(rtu.rts)?;
                if let Some(us) = rtu.rts_delay_us {
                    transport.set_rts_delay(Duration::from_micros(us));
                }
                Context::new(transport)
            },
            TransportConfig::Tcp(tcp) => {
                let transport = TcpTransport::new(tcp.host.clone(), tcp.port)?
                    .with_own_address(tcp.own_address)
                    .with_connect_timeout(Duration::from_millis(tcp.connect_timeout_ms));
                Context::new(transport)
            },
        };

        let (sec, usec) = millis_to_parts(config.response_timeout_ms)?;
        ctx.set_response_timeout(sec, usec)?;
        let (sec, usec) = millis_to_parts(config.byte_timeout_ms)?;
        ctx.set_byte_timeout(sec, usec)?;
        ctx.set_error_recovery(config.recovery());
        ctx.set_send_retry_limit(config.send_retry_limit);
        ctx.set_debug(config.debug);
        if let Some(slave) = config.slave {
            ctx.set_slave(slave)?;
        }

        debug!(
            transport = ctx.transport_type(),
            slave = ?config.slave,
            "Context built from configuration"
        );
        Ok(ctx)
    }
}
