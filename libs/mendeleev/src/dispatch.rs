//! Command dispatcher
//!
//! Builds a request, sends it under the LINK policy, then receives and
//! validates the confirmation. Also hosts the passive receive entry points.

use std::io;

use tracing::{debug, error, warn};

use common::hex::encode_spaced;

use crate::constants::{
    CHECKSUM_LENGTH, DATALEN_LENGTH, MAX_DATA_LENGTH, MAX_MESSAGE_LENGTH,
};
use crate::context::{Context, ErrorRecovery};
use crate::error::{MendeleevError, Result};
use crate::frame::{self, Command};

impl Context {
    /// Finalize and send a frame, retrying under LINK recovery
    async fn send_msg(&mut self, msg: &mut [u8], msg_length: usize) -> Result<usize> {
        let msg_length = self.transport.send_msg_pre(msg, msg_length);

        if self.debug {
            debug!(
                hex_data = %encode_spaced(&msg[..msg_length]),
                length = msg_length,
                direction = "send",
                "[Mendeleev] Raw packet"
            );
        }

        let mut retries = 0u32;
        let written = loop {
            let err = match self.transport.send(&msg[..msg_length]).await {
                Ok(written) => break written,
                Err(e) => e,
            };

            if !self.error_recovery.contains(ErrorRecovery::LINK) {
                return Err(err);
            }

            warn!("Send failed: {}", err);
            match err.io_kind() {
                Some(
                    io::ErrorKind::NotConnected
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe,
                ) => {
                    self.transport.close().await;
                    self.sleep_response_timeout().await;
                    self.reconnect_after_close().await;
                },
                _ => {
                    self.sleep_response_timeout().await;
                    self.recovery_flush().await;
                },
            }

            if let Some(limit) = self.send_retry_limit {
                if retries >= limit {
                    return Err(err);
                }
            }
            retries += 1;
        };

        if written != msg_length {
            return Err(MendeleevError::bad_data(format!(
                "Partial send: {} of {} bytes written",
                written, msg_length
            )));
        }

        Ok(written)
    }

    async fn reconnect_after_close(&mut self) {
        if let Err(e) = self.transport.connect().await {
            error!("Reconnect failed: {}", e);
        }
    }

    /// Send `command` with `data` to the configured slave
    ///
    /// Copies the confirmation payload into `rsp` and returns its length.
    /// Arguments are validated before any I/O.
    pub async fn send_command(&mut self, command: u8, data: &[u8], rsp: &mut [u8]) -> Result<usize> {
        if data.len() > MAX_DATA_LENGTH {
            return Err(MendeleevError::invalid_argument(format!(
                "Payload of {} bytes exceeds the {} byte limit",
                data.len(),
                MAX_DATA_LENGTH
            )));
        }
        let slave = self
            .slave
            .ok_or_else(|| MendeleevError::invalid_argument("Slave address not set"))?;

        let mut req = [0u8; MAX_MESSAGE_LENGTH];
        let mut req_length = self.transport.build_request_basis(slave, command, &mut req);
        frame::write_u16_be(&mut req, req_length, data.len() as u16);
        req_length += DATALEN_LENGTH;
        req[req_length..req_length + data.len()].copy_from_slice(data);
        req_length += data.len();

        self.send_msg(&mut req, req_length).await?;
        let req = &req[..req_length + CHECKSUM_LENGTH];

        let mut buf = [0u8; MAX_MESSAGE_LENGTH];
        let rsp_length = self.receive_msg(&mut buf).await?;
        let confirmation = &buf[..rsp_length];
        self.check_confirmation(req, confirmation).await?;

        let payload = frame::payload(confirmation);
        if payload.len() > rsp.len() {
            return Err(MendeleevError::too_many_data(format!(
                "{} byte payload does not fit a {} byte buffer",
                payload.len(),
                rsp.len()
            )));
        }
        rsp[..payload.len()].copy_from_slice(payload);
        Ok(payload.len())
    }

    /// Like [`send_command`](Self::send_command), returning an owned payload
    pub async fn request(&mut self, command: u8, data: &[u8]) -> Result<Vec<u8>> {
        let mut rsp = [0u8; MAX_DATA_LENGTH];
        let len = self.send_command(command, data, &mut rsp).await?;
        Ok(rsp[..len].to_vec())
    }

    pub async fn set_color(&mut self, data: &[u8]) -> Result<()> {
        self.request(Command::SetColor.code(), data).await.map(drop)
    }

    pub async fn set_mode(&mut self, data: &[u8]) -> Result<()> {
        self.request(Command::SetMode.code(), data).await.map(drop)
    }

    pub async fn set_output(&mut self, data: &[u8]) -> Result<()> {
        self.request(Command::SetOutput.code(), data).await.map(drop)
    }

    /// Push one over-the-air update block
    pub async fn ota(&mut self, block: &[u8]) -> Result<()> {
        self.request(Command::Ota.code(), block).await.map(drop)
    }

    /// Firmware version string as reported by the device
    pub async fn get_version(&mut self) -> Result<Vec<u8>> {
        self.request(Command::GetVersion.code(), &[]).await
    }

    /// Wait for an indication addressed to this end of the link
    ///
    /// Frames for other addresses are dropped and the wait starts over.
    pub async fn receive(&mut self, req: &mut [u8]) -> Result<usize> {
        check_frame_buffer(req)?;
        loop {
            let len = self.receive_msg(req).await?;
            if self.transport.accepts_indication(&req[..len]) {
                return Ok(len);
            }
            if self.debug {
                debug!(
                    "Ignoring frame addressed to 0x{:02X}",
                    frame::destination(&req[..len])
                );
            }
        }
    }

    /// Read the next frame without correlating it with any request
    pub async fn receive_confirmation(&mut self, rsp: &mut [u8]) -> Result<usize> {
        check_frame_buffer(rsp)?;
        self.receive_msg(rsp).await
    }
}

fn check_frame_buffer(buf: &[u8]) -> Result<()> {
    if buf.len() < MAX_MESSAGE_LENGTH {
        return Err(MendeleevError::invalid_argument(format!(
            "Frame buffer must hold {} bytes, got {}",
            MAX_MESSAGE_LENGTH,
            buf.len()
        )));
    }
    Ok(())
}
