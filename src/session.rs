// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Session state machine.
//!
//! Owns the pending command and decides what every inbound chunk means.
//! The machine performs no I/O: callers feed it chunks and clock ticks and
//! carry out the returned [`Output`]s. At most one command is outstanding;
//! [`SessionMachine::begin`] refuses a second one.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::events::EventKind;
use crate::protocol::{
    decode_response, format_bytes, DecodedResponse, DeviceCommand, FrameCodec, OutboundFrame,
    SpectralAccumulator, SpectralPolicy,
};

/// Tunables for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Give up on a pending command after this long without inbound bytes.
    pub response_timeout: Option<Duration>,
    /// Maximum bytes requested per receive.
    pub read_buffer_size: usize,
    /// Check the checksum of inbound frames.
    pub verify_inbound_checksum: bool,
    /// Completion rule for spectral acquisitions.
    pub spectral_policy: SpectralPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            response_timeout: Some(Duration::from_secs(5)),
            read_buffer_size: 8192,
            verify_inbound_checksum: false,
            spectral_policy: SpectralPolicy::SampleCount(1024),
        }
    }
}

/// The command awaiting its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub command: DeviceCommand,
    pub is_write: bool,
    /// Set once the single resend has gone out.
    pub resent: bool,
    /// Last time the command was sent or made progress.
    pub last_activity: Instant,
}

/// Work for the caller to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Write this frame to the transport.
    Transmit(OutboundFrame),
    /// Publish this event.
    Emit(EventKind),
}

/// Single-outstanding-command protocol engine.
pub struct SessionMachine {
    codec: FrameCodec,
    pending: Option<PendingCommand>,
    spectral: SpectralAccumulator,
    response_timeout: Option<Duration>,
}

impl SessionMachine {
    /// Create a new machine.
    pub fn new(codec: FrameCodec, options: &SessionOptions) -> Self {
        Self {
            codec,
            pending: None,
            spectral: SpectralAccumulator::new(options.spectral_policy),
            response_timeout: options.response_timeout,
        }
    }

    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// Issue a command. Fails with [`SessionError::Busy`] while another is pending.
    pub fn begin(
        &mut self,
        command: DeviceCommand,
        is_write: bool,
        payload: &[u8],
        now: Instant,
    ) -> Result<OutboundFrame> {
        if let Some(pending) = &self.pending {
            return Err(SessionError::Busy {
                pending: pending.command,
            });
        }

        let frame = self.codec.encode(command, is_write, payload)?;
        if command.is_spectral() {
            self.spectral.reset();
        }
        self.pending = Some(PendingCommand {
            command,
            is_write,
            resent: false,
            last_activity: now,
        });
        Ok(frame)
    }

    /// Interpret one chunk read from the transport.
    pub fn on_chunk(&mut self, chunk: &[u8], now: Instant) -> Vec<Output> {
        let Some(pending) = self.pending.as_mut() else {
            warn!("Dropping {} bytes with no command pending", chunk.len());
            return vec![Output::Emit(EventKind::ProtocolViolation(format!(
                "{} bytes received with no command pending: {}",
                chunk.len(),
                format_bytes(chunk)
            )))];
        };

        if pending.command.is_spectral() {
            pending.last_activity = now;
            let command = pending.command;
            let progress = self.spectral.push(chunk);

            let mut outputs = Vec::with_capacity(2);
            if !progress.chunk.is_empty() {
                outputs.push(Output::Emit(EventKind::SpectralChunk(progress.chunk)));
            }
            if let Some(samples) = progress.complete {
                self.pending = None;
                outputs.push(Output::Emit(EventKind::CommandCompleted {
                    command,
                    response: DecodedResponse::Spectrum(samples),
                }));
            }
            return outputs;
        }

        match self.codec.validate(chunk, pending.command.code()) {
            Ok(frame) => {
                debug!("Data received: {}", format_bytes(frame.bytes()));
                let response = decode_response(pending.command, pending.is_write, &frame);
                let command = pending.command;
                self.pending = None;
                vec![Output::Emit(EventKind::CommandCompleted { command, response })]
            }
            Err(reason) if !pending.resent => {
                debug!(
                    "Rejected {}: {} ({})",
                    pending.command,
                    reason,
                    format_bytes(chunk)
                );
                pending.resent = true;
                pending.last_activity = now;
                let frame = self.codec.encode_request(pending.command, false);
                vec![
                    Output::Emit(EventKind::CommandRejected {
                        command: pending.command,
                        reason,
                        retrying: true,
                    }),
                    Output::Transmit(frame),
                ]
            }
            Err(reason) => {
                warn!("Rejected {} after resend: {}", pending.command, reason);
                let command = pending.command;
                self.pending = None;
                vec![Output::Emit(EventKind::CommandRejected {
                    command,
                    reason,
                    retrying: false,
                })]
            }
        }
    }

    /// When the pending command times out, if a timeout is configured.
    pub fn deadline(&self) -> Option<Instant> {
        let timeout = self.response_timeout?;
        self.pending
            .as_ref()
            .map(|pending| pending.last_activity + timeout)
    }

    /// Expire the pending command if its deadline has passed.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Output> {
        match self.deadline() {
            Some(deadline) if now >= deadline => {}
            _ => return Vec::new(),
        }

        match self.pending.take() {
            Some(pending) => {
                warn!("{} timed out", pending.command);
                self.spectral.reset();
                vec![Output::Emit(EventKind::CommandTimedOut {
                    command: pending.command,
                })]
            }
            None => Vec::new(),
        }
    }

    /// Abandon the pending command, e.g. on teardown or send failure.
    pub fn cancel(&mut self) -> Option<PendingCommand> {
        self.spectral.reset();
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Checksum, Crc8Maxim, FrameRejection};

    fn machine() -> SessionMachine {
        SessionMachine::new(FrameCodec::default(), &SessionOptions::default())
    }

    fn machine_with(policy: SpectralPolicy, timeout: Option<Duration>) -> SessionMachine {
        let options = SessionOptions {
            response_timeout: timeout,
            spectral_policy: policy,
            ..SessionOptions::default()
        };
        SessionMachine::new(FrameCodec::default(), &options)
    }

    fn ping_reply() -> Vec<u8> {
        let crc = Crc8Maxim.digest(&[0x00, 0x00, 0x4B]);
        vec![0x3C, 0x00, 0x00, 0x4B, crc, 0x3E]
    }

    #[test]
    fn test_ping_round_trip() {
        let mut m = machine();
        let now = Instant::now();

        let frame = m.begin(DeviceCommand::ConnectionPing, false, &[], now).unwrap();
        let crc = Crc8Maxim.digest(&[0x00, 0x01, 0x4B]);
        assert_eq!(frame.bytes(), &[0x3C, 0x00, 0x01, 0x4B, crc, 0x3E]);
        assert!(!m.is_idle());

        let outputs = m.on_chunk(&ping_reply(), now);
        assert_eq!(
            outputs,
            vec![Output::Emit(EventKind::CommandCompleted {
                command: DeviceCommand::ConnectionPing,
                response: DecodedResponse::Ack,
            })]
        );
        assert!(m.is_idle());
    }

    #[test]
    fn test_busy_guard() {
        let mut m = machine();
        let now = Instant::now();
        m.begin(DeviceCommand::ReadFirmwareRevision, false, &[], now)
            .unwrap();

        let err = m
            .begin(DeviceCommand::ConnectionPing, false, &[], now)
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Busy {
                pending: DeviceCommand::ReadFirmwareRevision
            }
        ));
        assert_eq!(
            m.pending().map(|p| p.command),
            Some(DeviceCommand::ReadFirmwareRevision)
        );
    }

    #[test]
    fn test_payload_too_long_leaves_session_idle() {
        let mut m = machine();
        let err = m
            .begin(DeviceCommand::LaserOn, true, &[0u8; 300], Instant::now())
            .unwrap_err();
        assert!(matches!(err, SessionError::PayloadTooLong(_)));
        assert!(m.is_idle());
    }

    #[test]
    fn test_unsolicited_bytes() {
        let mut m = machine();
        let outputs = m.on_chunk(&[0x01, 0x02], Instant::now());
        assert!(matches!(
            outputs.as_slice(),
            [Output::Emit(EventKind::ProtocolViolation(_))]
        ));
    }

    #[test]
    fn test_single_resend_then_give_up() {
        let mut m = machine();
        let now = Instant::now();
        m.begin(DeviceCommand::ReadFpgaRevision, false, &[], now)
            .unwrap();

        let outputs = m.on_chunk(&[0x3C, 0x00, 0x01], now);
        assert_eq!(outputs.len(), 2);
        assert_eq!(
            outputs[0],
            Output::Emit(EventKind::CommandRejected {
                command: DeviceCommand::ReadFpgaRevision,
                reason: FrameRejection::TooShort { len: 3 },
                retrying: true,
            })
        );
        match &outputs[1] {
            Output::Transmit(frame) => {
                assert_eq!(frame.command(), DeviceCommand::ReadFpgaRevision);
                assert!(frame.payload().is_empty());
            }
            other => panic!("expected resend, got {:?}", other),
        }
        assert!(m.pending().unwrap().resent);

        let outputs = m.on_chunk(&[0x3C, 0x00, 0x00, 0x4B, 0x00, 0x3E], now);
        assert_eq!(
            outputs,
            vec![Output::Emit(EventKind::CommandRejected {
                command: DeviceCommand::ReadFpgaRevision,
                reason: FrameRejection::CommandMismatch {
                    expected: 0x10,
                    actual: 0x4B
                },
                retrying: false,
            })]
        );
        assert!(m.is_idle());
    }

    #[test]
    fn test_resend_then_success() {
        let mut m = machine();
        let now = Instant::now();
        m.begin(DeviceCommand::ReadFirmwareRevision, false, &[], now)
            .unwrap();

        m.on_chunk(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05], now);
        let outputs = m.on_chunk(&[0x3C, 0x00, 0x06, 0x0D, 0x00, 1, 2, 3, 4, 0x00, 0x3E], now);
        assert_eq!(
            outputs,
            vec![Output::Emit(EventKind::CommandCompleted {
                command: DeviceCommand::ReadFirmwareRevision,
                response: DecodedResponse::FirmwareRevision("1.2.3.4".into()),
            })]
        );
    }

    #[test]
    fn test_resend_of_write_uses_read_form() {
        let mut m = machine();
        let now = Instant::now();
        m.begin(DeviceCommand::IntegrationTime, true, &[0x10, 0x00], now)
            .unwrap();

        let outputs = m.on_chunk(&[0xFF], now);
        match &outputs[1] {
            Output::Transmit(frame) => {
                assert!(!frame.is_write());
                assert_eq!(frame.bytes()[3], 0x11);
            }
            other => panic!("expected resend, got {:?}", other),
        }
    }

    #[test]
    fn test_write_flagged_echo_is_rejected() {
        let mut m = machine();
        let now = Instant::now();
        m.begin(DeviceCommand::LaserOn, true, &[0x01], now).unwrap();

        let outputs = m.on_chunk(&[0x3C, 0x00, 0x01, 0xB4, 0x00, 0x3E], now);
        assert_eq!(
            outputs[0],
            Output::Emit(EventKind::CommandRejected {
                command: DeviceCommand::LaserOn,
                reason: FrameRejection::CommandMismatch {
                    expected: 0x34,
                    actual: 0xB4
                },
                retrying: true,
            })
        );

        let outputs = m.on_chunk(&[0x3C, 0x00, 0x01, 0x34, 0x00, 0x3E], now);
        assert_eq!(
            outputs,
            vec![Output::Emit(EventKind::CommandCompleted {
                command: DeviceCommand::LaserOn,
                response: DecodedResponse::Ack,
            })]
        );
    }

    #[test]
    fn test_spectral_bypasses_framing() {
        let mut m = machine_with(SpectralPolicy::PerChunk, None);
        let now = Instant::now();
        m.begin(DeviceCommand::AcquireImage, false, &[], now).unwrap();

        let outputs = m.on_chunk(&[0x01, 0x00, 0xFF, 0x7F], now);
        assert_eq!(
            outputs,
            vec![
                Output::Emit(EventKind::SpectralChunk(vec![1, 32767])),
                Output::Emit(EventKind::CommandCompleted {
                    command: DeviceCommand::AcquireImage,
                    response: DecodedResponse::Spectrum(vec![1, 32767]),
                }),
            ]
        );
        assert!(m.is_idle());
    }

    #[test]
    fn test_spectral_sample_count_spans_chunks() {
        let mut m = machine_with(SpectralPolicy::SampleCount(3), None);
        let now = Instant::now();
        m.begin(DeviceCommand::AcquireImage, false, &[], now).unwrap();

        let outputs = m.on_chunk(&[0x3C, 0x00, 0x3E], now);
        assert_eq!(
            outputs,
            vec![Output::Emit(EventKind::SpectralChunk(vec![60]))]
        );
        assert!(!m.is_idle());

        let outputs = m.on_chunk(&[0x00, 0x05, 0x00], now);
        assert_eq!(
            outputs.last(),
            Some(&Output::Emit(EventKind::CommandCompleted {
                command: DeviceCommand::AcquireImage,
                response: DecodedResponse::Spectrum(vec![60, 62, 5]),
            }))
        );
        assert!(m.is_idle());
    }

    #[test]
    fn test_timeout() {
        let mut m = machine_with(SpectralPolicy::PerChunk, Some(Duration::from_millis(100)));
        let start = Instant::now();
        m.begin(DeviceCommand::ConnectionPing, false, &[], start)
            .unwrap();

        assert_eq!(m.deadline(), Some(start + Duration::from_millis(100)));
        assert!(m.on_tick(start + Duration::from_millis(50)).is_empty());
        assert!(!m.is_idle());

        let outputs = m.on_tick(start + Duration::from_millis(100));
        assert_eq!(
            outputs,
            vec![Output::Emit(EventKind::CommandTimedOut {
                command: DeviceCommand::ConnectionPing
            })]
        );
        assert!(m.is_idle());
        assert_eq!(m.deadline(), None);
    }

    #[test]
    fn test_no_timeout_configured() {
        let mut m = machine_with(SpectralPolicy::PerChunk, None);
        let start = Instant::now();
        m.begin(DeviceCommand::ConnectionPing, false, &[], start)
            .unwrap();
        assert_eq!(m.deadline(), None);
        assert!(m.on_tick(start + Duration::from_secs(3600)).is_empty());
        assert!(!m.is_idle());
    }

    #[test]
    fn test_cancel() {
        let mut m = machine();
        m.begin(DeviceCommand::AcquireImage, false, &[], Instant::now())
            .unwrap();
        let cancelled = m.cancel().unwrap();
        assert_eq!(cancelled.command, DeviceCommand::AcquireImage);
        assert!(m.is_idle());
        assert!(m.cancel().is_none());
    }
}
