//! Confirmation validator
//!
//! Correlates a received frame with the request that provoked it. Checks run
//! in a fixed order: transport pre-check, exception detection, length,
//! command, sequence number. The first failing check decides the error.

use tracing::debug;

use crate::constants::MIN_MESSAGE_LENGTH;
use crate::context::Context;
use crate::error::{ExceptionCode, MendeleevError, Result};
use crate::frame;

/// Commands with the high bit set are exception replies
const EXCEPTION_BIT: u8 = 0x80;

impl Context {
    pub(crate) async fn check_confirmation(&mut self, req: &[u8], rsp: &[u8]) -> Result<()> {
        if let Err(e) = self.transport.pre_check_confirmation(req, rsp) {
            if self.debug {
                debug!("Confirmation pre-check failed: {}", e);
            }
            self.recover_protocol().await;
            return Err(e);
        }

        let expected_length = frame::compute_response_length(frame::command(req));
        let function = frame::command(rsp);
        let req_function = frame::command(req);

        if function >= EXCEPTION_BIT {
            let err = if rsp.len() == MIN_MESSAGE_LENGTH && function == req_function | EXCEPTION_BIT
            {
                MendeleevError::Exception(ExceptionCode::NegativeAcknowledge)
            } else {
                MendeleevError::BadException(function)
            };
            if self.debug {
                debug!("{}", err);
            }
            return Err(err);
        }

        if let Some(expected) = expected_length {
            if rsp.len() != expected {
                return Err(self
                    .mismatch(format!(
                        "Message length not corresponding to the computed length ({} != {})",
                        rsp.len(),
                        expected
                    ))
                    .await);
            }
        }

        if function != req_function {
            return Err(self
                .mismatch(format!(
                    "Received function not corresponding to the request (0x{:X} != 0x{:X})",
                    function, req_function
                ))
                .await);
        }

        let rsp_sequence = frame::sequence(rsp);
        let req_sequence = frame::sequence(req);
        if rsp_sequence != req_sequence {
            return Err(self
                .mismatch(format!(
                    "Received sequence number not corresponding to the request (0x{:X} != 0x{:X})",
                    rsp_sequence, req_sequence
                ))
                .await);
        }

        Ok(())
    }

    async fn mismatch(&mut self, detail: String) -> MendeleevError {
        if self.debug {
            debug!("{}", detail);
        }
        self.recover_protocol().await;
        MendeleevError::BadData(detail)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::context::ErrorRecovery;
    use crate::frame::Command;
    use crate::transport::{MockHandle, MockTransport};

    fn context() -> (Context, MockHandle) {
        let (mock, handle) = MockTransport::new();
        (Context::new(mock), handle)
    }

    fn request(command: u8, seq: u16) -> Vec<u8> {
        frame::encode_frame(0x01, 0x00, seq, command, &[]).unwrap()
    }

    fn reply(command: u8, seq: u16, data: &[u8]) -> Vec<u8> {
        frame::encode_frame(0x00, 0x01, seq, command, data).unwrap()
    }

    #[tokio::test]
    async fn test_matching_confirmation() {
        let (mut ctx, _) = context();
        let req = request(Command::SetColor.code(), 7);
        assert!(ctx.check_confirmation(&req, &reply(0x00, 7, &[])).await.is_ok());
    }

    #[tokio::test]
    async fn test_variable_length_reply_skips_length_check() {
        let (mut ctx, _) = context();
        let req = request(Command::GetVersion.code(), 3);
        let rsp = reply(Command::GetVersion.code(), 3, b"1.0.4");
        assert!(ctx.check_confirmation(&req, &rsp).await.is_ok());
    }

    #[tokio::test]
    async fn test_negative_acknowledge() {
        let (mut ctx, _) = context();
        let req = request(0x01, 1);
        let err = ctx
            .check_confirmation(&req, &reply(0x81, 1, &[]))
            .await
            .unwrap_err();
        assert_eq!(err.exception(), Some(ExceptionCode::NegativeAcknowledge));
    }

    #[tokio::test]
    async fn test_malformed_exceptions() {
        let (mut ctx, _) = context();
        let req = request(0x01, 1);

        // Wrong command echoed
        let err = ctx
            .check_confirmation(&req, &reply(0x82, 1, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, MendeleevError::BadException(0x82)));

        // Exception frames never carry a payload
        let err = ctx
            .check_confirmation(&req, &reply(0x81, 1, &[0x07]))
            .await
            .unwrap_err();
        assert!(matches!(err, MendeleevError::BadException(0x81)));
    }

    #[tokio::test]
    async fn test_exception_wins_over_sequence_mismatch() {
        let (mut ctx, _) = context();
        let req = request(0x01, 1);
        let err = ctx
            .check_confirmation(&req, &reply(0x81, 99, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, MendeleevError::Exception(_)));
    }

    #[tokio::test]
    async fn test_length_checked_before_command() {
        let (mut ctx, _) = context();
        let req = request(Command::SetMode.code(), 1);
        let err = ctx
            .check_confirmation(&req, &reply(0x02, 1, &[0xAA]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("length"));
    }

    #[tokio::test]
    async fn test_command_and_sequence_mismatch() {
        let (mut ctx, _) = context();
        let req = request(Command::SetMode.code(), 1);

        let err = ctx
            .check_confirmation(&req, &reply(0x02, 1, &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("function"));

        let err = ctx
            .check_confirmation(&req, &reply(0x01, 2, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, MendeleevError::BadData(_)));
        assert!(err.to_string().contains("sequence"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_recovery_flushes_on_mismatch() {
        let (mut ctx, handle) = context();
        ctx.connect().await.unwrap();

        let req = request(0x00, 1);
        ctx.check_confirmation(&req, &reply(0x00, 2, &[]))
            .await
            .unwrap_err();
        assert_eq!(handle.flushes(), 0);

        ctx.set_error_recovery(ErrorRecovery::PROTOCOL);
        ctx.check_confirmation(&req, &reply(0x00, 2, &[]))
            .await
            .unwrap_err();
        assert_eq!(handle.flushes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_check_runs_first() {
        let (mut ctx, handle) = context();
        ctx.connect().await.unwrap();
        ctx.set_error_recovery(ErrorRecovery::PROTOCOL);

        // From slave 2 instead of 1, and an exception on top
        let rsp = frame::encode_frame(0x00, 0x02, 1, 0x81, &[]).unwrap();
        let err = ctx
            .check_confirmation(&request(0x01, 1), &rsp)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MendeleevError::BadSlave {
                expected: 0x01,
                received: 0x02
            }
        ));
        assert_eq!(handle.flushes(), 1);
    }
}
