//! Mock Transport for Testing
//!
//! Scripted in-memory link. Tests queue what the "device" does next
//! (a chunk of bytes, a silent period, a hang-up, an I/O failure) and
//! inspect what the engine sent, waited for and recovered through a
//! cloneable [`MockHandle`].

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{addressed_to, check_response_addresses, Transport};
use crate::error::{MendeleevError, Result};
use crate::frame::{self, SequenceCounter};

/// Next thing the scripted peer does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// Bytes become readable; `recv` may split them across calls
    Data(Vec<u8>),
    /// Nothing arrives before the next wait expires
    Silence,
    /// The next event happens after this much time; a shorter wait times out
    Delay(Duration),
    /// Peer hangs up: the next read returns zero bytes
    Closed,
    /// The next wait fails with this I/O error
    Fail(io::ErrorKind),
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<MockEvent> + Send>;

#[derive(Default)]
struct MockState {
    connected: bool,
    incoming: VecDeque<MockEvent>,
    sent: Vec<Vec<u8>>,
    send_attempts: usize,
    send_failures: VecDeque<io::ErrorKind>,
    short_send: Option<usize>,
    connect_failures: VecDeque<io::ErrorKind>,
    select_timeouts: Vec<Duration>,
    connects: usize,
    closes: usize,
    flushes: usize,
    responder: Option<Responder>,
}

impl fmt::Debug for MockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockState")
            .field("connected", &self.connected)
            .field("incoming", &self.incoming.len())
            .field("sent", &self.sent.len())
            .field("connects", &self.connects)
            .field("closes", &self.closes)
            .field("flushes", &self.flushes)
            .field("responder", &self.responder.is_some())
            .finish()
    }
}

/// Test-side view of a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn push_event(&self, event: MockEvent) {
        self.state.lock().incoming.push_back(event);
    }

    pub fn push_data(&self, data: impl Into<Vec<u8>>) {
        self.push_event(MockEvent::Data(data.into()));
    }

    /// Queue a frame delivered as several separately readable chunks
    pub fn push_chunks(&self, data: &[u8], chunk_sizes: &[usize]) {
        let mut state = self.state.lock();
        let mut offset = 0;
        for &size in chunk_sizes {
            let end = (offset + size).min(data.len());
            state
                .incoming
                .push_back(MockEvent::Data(data[offset..end].to_vec()));
            offset = end;
        }
        if offset < data.len() {
            state
                .incoming
                .push_back(MockEvent::Data(data[offset..].to_vec()));
        }
    }

    pub fn push_silence(&self) {
        self.push_event(MockEvent::Silence);
    }

    pub fn push_closed(&self) {
        self.push_event(MockEvent::Closed);
    }

    pub fn push_failure(&self, kind: io::ErrorKind) {
        self.push_event(MockEvent::Fail(kind));
    }

    /// Fail the next `count` sends with `kind`
    pub fn fail_sends(&self, kind: io::ErrorKind, count: usize) {
        let mut state = self.state.lock();
        state
            .send_failures
            .extend(std::iter::repeat(kind).take(count));
    }

    /// Report only `written` bytes on the next send
    pub fn short_send(&self, written: usize) {
        self.state.lock().short_send = Some(written);
    }

    /// Fail the next connect with `kind`
    pub fn fail_connect(&self, kind: io::ErrorKind) {
        self.state.lock().connect_failures.push_back(kind);
    }

    /// Answer every successfully sent frame with the events `responder` returns
    pub fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<MockEvent> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    /// Frames written in full or in part, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.state.lock().sent.last().cloned()
    }

    /// Sends attempted, including the failed ones
    pub fn send_attempts(&self) -> usize {
        self.state.lock().send_attempts
    }

    /// Timeout passed to every wait, in order
    pub fn select_timeouts(&self) -> Vec<Duration> {
        self.state.lock().select_timeouts.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }

    /// Events not yet consumed by the engine
    pub fn pending(&self) -> usize {
        self.state.lock().incoming.len()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

/// In-memory transport with RTU-style addressing
#[derive(Debug)]
pub struct MockTransport {
    own_address: u8,
    sequence: SequenceCounter,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a mock whose own address is 0x00
    pub fn new() -> (Self, MockHandle) {
        Self::with_address(0x00)
    }

    pub fn with_address(own_address: u8) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let handle = MockHandle {
            state: Arc::clone(&state),
        };
        (
            Self {
                own_address,
                sequence: SequenceCounter::new(),
                state,
            },
            handle,
        )
    }

    pub fn own_address(&self) -> u8 {
        self.own_address
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_type(&self) -> &'static str {
        "mock"
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
        let mut state = self.state.lock();
        state.send_attempts += 1;

        if !state.connected {
            return Err(io::Error::from(io::ErrorKind::NotConnected).into());
        }
        if let Some(kind) = state.send_failures.pop_front() {
            debug!(error = ?kind, "Mock send failure");
            return Err(io::Error::from(kind).into());
        }
        if let Some(written) = state.short_send.take() {
            let written = written.min(msg.len());
            state.sent.push(msg[..written].to_vec());
            return Ok(written);
        }

        state.sent.push(msg.to_vec());
        if let Some(mut responder) = state.responder.take() {
            let events = responder(msg);
            state.incoming.extend(events);
            state.responder = Some(responder);
        }
        Ok(msg.len())
    }

    async fn select(&mut self, timeout: Duration) -> Result<()> {
        self.state.lock().select_timeouts.push(timeout);
        let mut remaining = timeout;

        loop {
            let step = {
                let mut state = self.state.lock();
                match state.incoming.front() {
                    Some(MockEvent::Data(_)) | Some(MockEvent::Closed) => return Ok(()),
                    Some(MockEvent::Fail(kind)) => {
                        let kind = *kind;
                        state.incoming.pop_front();
                        return Err(io::Error::from(kind).into());
                    },
                    Some(MockEvent::Delay(delay)) => {
                        let delay = *delay;
                        state.incoming.pop_front();
                        if delay > remaining {
                            // Still pending once this wait gives up
                            state
                                .incoming
                                .push_front(MockEvent::Delay(delay - remaining));
                            None
                        } else {
                            Some(delay)
                        }
                    },
                    Some(MockEvent::Silence) => {
                        state.incoming.pop_front();
                        None
                    },
                    None => None,
                }
            };

            match step {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    remaining -= delay;
                },
                None => {
                    tokio::time::sleep(remaining).await;
                    return Err(MendeleevError::Timeout);
                },
            }
        }
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        match state.incoming.pop_front() {
            Some(MockEvent::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    state.incoming.push_front(MockEvent::Data(rest));
                }
                Ok(n)
            },
            Some(MockEvent::Closed) | None => Ok(0),
            Some(other) => {
                state.incoming.push_front(other);
                Err(io::Error::from(io::ErrorKind::WouldBlock).into())
            },
        }
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
        let mut state = self.state.lock();
        state.connects += 1;
        if let Some(kind) = state.connect_failures.pop_front() {
            return Err(io::Error::from(kind).into());
        }
        state.connected = true;
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.state.lock();
        state.closes += 1;
        state.connected = false;
    }

    /// Drops readable data up to the next non-data event
    async fn flush(&mut self) -> Result<usize> {
        let mut state = self.state.lock();
        state.flushes += 1;
        let mut dropped = 0;
        while let Some(MockEvent::Data(data)) = state.incoming.front() {
            dropped += data.len();
            state.incoming.pop_front();
        }
        Ok(dropped)
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}
