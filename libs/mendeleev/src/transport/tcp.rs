//! Stream (TCP) transport
//!
//! Same framing and checksum as the serial line, carried over a TCP
//! connection to a gateway or device. The stream is point to point, so no
//! address pre-check is performed.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info};

use super::Transport;
use crate::error::{MendeleevError, Result};
use crate::frame::{self, SequenceCounter};

/// Default time allowed for the TCP handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP transport
#[derive(Debug)]
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    own_address: u8,
    sequence: SequenceCounter,
    stream: Option<TcpStream>,
    /// End of the wait budget handed to the last `select`
    read_deadline: Option<Instant>,
}

impl TcpTransport {
    /// Describe a TCP peer; nothing is opened until `connect`
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(MendeleevError::invalid_argument("Host cannot be empty"));
        }
        if port == 0 {
            return Err(MendeleevError::invalid_argument("Port cannot be zero"));
        }

        Ok(Self {
            host,
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            own_address: 0x00,
            sequence: SequenceCounter::new(),
            stream: None,
            read_deadline: None,
        })
    }

    pub fn with_own_address(mut self, own_address: u8) -> Self {
        self.own_address = own_address;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn own_address(&self) -> u8 {
        self.own_address
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected).into())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn transport_type(&self) -> &'static str {
        "tcp"
    }

    fn set_slave(&mut self, _slave: u8) -> Result<()> {
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
        let stream = self.stream_mut()?;
        Ok(stream.write(msg).await?)
    }

    async fn select(&mut self, wait: Duration) -> Result<()> {
        self.read_deadline = Some(Instant::now() + wait);
        let stream = self.stream_mut()?;
        match timeout(wait, stream.readable()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(MendeleevError::Timeout),
        }
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = self.read_deadline;
        let stream = self.stream_mut()?;
        loop {
            match stream.try_read(buf) {
                Ok(n) => return Ok(n),
                // Readiness can be spurious; wait again within the select budget
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let deadline = deadline.ok_or(MendeleevError::Timeout)?;
                    match timeout_at(deadline, stream.readable()).await {
                        Ok(ready) => ready?,
                        Err(_) => return Err(MendeleevError::Timeout),
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn check_integrity(&self, msg: &[u8]) -> Result<usize> {
        frame::verify_frame(msg)
    }

    async fn connect(&mut self) -> Result<()> {
        let address = self.address();
        debug!("Connecting to {}", address);

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("Connection to {} timed out", address),
                )
                .into())
            },
        };
        stream.set_nodelay(true)?;

        self.stream = Some(stream);
        self.read_deadline = None;
        info!("Connected to {}", address);
        Ok(())
    }

    async fn close(&mut self) {
        self.read_deadline = None;
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!("Closed connection to {}", self.address());
        }
    }

    async fn flush(&mut self) -> Result<usize> {
        let stream = self.stream_mut()?;
        let mut scratch = [0u8; 256];
        let mut dropped = 0;
        loop {
            match stream.try_read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => dropped += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(dropped)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
