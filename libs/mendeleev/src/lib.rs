//! Mendeleev protocol master
//!
//! Client side of the Mendeleev request/response protocol, a Modbus-style
//! framing with a small command set (set-color, set-mode, set-output, OTA,
//! get-version) carried over a serial bus or a TCP stream.
//!
//! # Frame
//!
//! ```text
//! [preamble 8 x 0xA5][dest][src][seq BE16][cmd][datalen BE16][data..][crc BE16]
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mendeleev::{Context, ErrorRecovery};
//!
//! # async fn run() -> mendeleev::Result<()> {
//! let mut ctx = Context::new_tcp("192.168.1.20", 4001)?;
//! ctx.set_slave(1)?;
//! ctx.set_error_recovery(ErrorRecovery::LINK | ErrorRecovery::PROTOCOL);
//! ctx.connect().await?;
//!
//! let version = ctx.get_version().await?;
//! println!("{}", String::from_utf8_lossy(&version));
//! ctx.free().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod confirm;
pub mod constants;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod receive;
pub mod transport;

pub use config::{ClientConfig, RecoveryMode, TcpConfig, TransportConfig};
pub use context::{Context, ErrorRecovery};
pub use error::{ExceptionCode, MendeleevError, Result};
pub use frame::{compute_response_length, encode_frame, Command};
pub use transport::{TcpTransport, Transport};

#[cfg(feature = "rtu")]
pub use config::RtuConfig;
#[cfg(feature = "rtu")]
pub use transport::{RtsMode, RtuTransport, SerialMode};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::{MockEvent, MockHandle, MockTransport};
