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

//! Session event stream and its default consumer.
//!
//! Every outcome of the engine is reported as a timestamped [`SessionEvent`].
//! Presentation layers subscribe to the channel instead of the engine
//! writing to shared text.

use anyhow::Result;
use chrono::{DateTime, Local};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::protocol::{format_bytes, DecodedResponse, DeviceCommand, FrameRejection};
use crate::state::LinkState;

/// Why the listen loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Connection torn down by the caller.
    Cancelled,
    /// The device closed the stream.
    EndOfStream,
    /// The transport failed.
    TransportError(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "reading task was cancelled"),
            Self::EndOfStream => write!(f, "connection closed by device"),
            Self::TransportError(e) => write!(f, "transport error: {}", e),
        }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Opening a connection to an endpoint.
    Connecting { endpoint: String },
    /// Connection established, listener running.
    Connected { endpoint: String },
    /// Connection released.
    Disconnected,
    /// A frame was handed to the transport.
    CommandSent {
        command: DeviceCommand,
        frame: Vec<u8>,
    },
    /// The pending command's response was decoded.
    CommandCompleted {
        command: DeviceCommand,
        response: DecodedResponse,
    },
    /// A response was refused; `retrying` is set when a resend went out.
    CommandRejected {
        command: DeviceCommand,
        reason: FrameRejection,
        retrying: bool,
    },
    /// No response arrived within the configured timeout.
    CommandTimedOut { command: DeviceCommand },
    /// Samples decoded from one spectral chunk.
    SpectralChunk(Vec<i16>),
    /// Bytes arrived that no pending command explains.
    ProtocolViolation(String),
    /// The listen loop ended.
    ListenerStopped(StopReason),
    /// Transport failure.
    Error(String),
}

impl EventKind {
    /// Human-readable description.
    pub fn describe(&self) -> String {
        match self {
            Self::Connecting { endpoint } => format!("Connecting to {}", endpoint),
            Self::Connected { endpoint } => {
                format!("Successfully connected to bluetooth device {}", endpoint)
            }
            Self::Disconnected => "Disconnected".to_string(),
            Self::CommandSent { command, frame } => {
                format!("Data Sent: {} ({})", format_bytes(frame), command.as_str())
            }
            Self::CommandCompleted { command, response } => match response {
                DecodedResponse::Ack => format!("{} returned from device", command.as_str()),
                DecodedResponse::Spectrum(samples) => format!(
                    "Spectrum: {}",
                    samples
                        .iter()
                        .map(|s| s.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                ),
                other => format!("{}: {} returned from device", command.as_str(), other),
            },
            Self::CommandRejected {
                command,
                reason,
                retrying,
            } => {
                if *retrying {
                    format!("{} response rejected ({}), resending", command.as_str(), reason)
                } else {
                    format!("{} response rejected ({}), giving up", command.as_str(), reason)
                }
            }
            Self::CommandTimedOut { command } => {
                format!("{} timed out waiting for a response", command.as_str())
            }
            Self::SpectralChunk(samples) => format!("Spectral chunk: {} samples", samples.len()),
            Self::ProtocolViolation(msg) => format!("Protocol violation: {}", msg),
            Self::ListenerStopped(reason) => format!("Listener stopped: {}", reason),
            Self::Error(msg) => format!("ERROR: {}", msg),
        }
    }
}

/// A timestamped event.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub timestamp: DateTime<Local>,
    pub kind: EventKind,
}

impl SessionEvent {
    /// Stamp an event with the current local time.
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Local::now(),
            kind,
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.kind.describe()
        )
    }
}

/// Consumes session events: mirrors them into [`LinkState`] and writes a
/// line per event to a sink.
pub struct EventProcessor<W: Write> {
    state: Arc<LinkState>,
    sink: W,
    show_chunks: bool,
}

impl<W: Write> EventProcessor<W> {
    /// Create a new event processor.
    pub fn new(state: Arc<LinkState>, sink: W) -> Self {
        Self {
            state,
            sink,
            show_chunks: false,
        }
    }

    /// Also print every spectral chunk, not just finished spectra.
    pub fn with_chunks(mut self, show: bool) -> Self {
        self.show_chunks = show;
        self
    }

    /// Process a single event.
    pub fn process_event(&mut self, event: &SessionEvent) -> Result<()> {
        match &event.kind {
            EventKind::Connecting { endpoint } => {
                info!("Connecting to {}", endpoint);
                self.state.set_connecting(endpoint.clone());
            }
            EventKind::Connected { endpoint } => {
                info!("Connected to {}", endpoint);
                self.state.set_connected(endpoint.clone());
            }
            EventKind::Disconnected => {
                info!("Disconnected");
                self.state.set_disconnected();
            }
            EventKind::CommandSent { command, .. } => {
                debug!("Sent {}", command);
                self.state.set_pending(Some(*command));
            }
            EventKind::CommandCompleted { command, response } => {
                info!("{} completed: {}", command, response);
                self.state.record_response(response);
                self.state.set_pending(None);
            }
            EventKind::CommandRejected {
                command,
                reason,
                retrying,
            } => {
                warn!("{} rejected: {} (retrying: {})", command, reason, retrying);
                if !retrying {
                    self.state.set_pending(None);
                }
            }
            EventKind::CommandTimedOut { command } => {
                warn!("{} timed out", command);
                self.state.set_pending(None);
            }
            EventKind::SpectralChunk(samples) => {
                debug!("Spectral chunk of {} samples", samples.len());
                if !self.show_chunks {
                    return Ok(());
                }
            }
            EventKind::ProtocolViolation(msg) => {
                warn!("Protocol violation: {}", msg);
            }
            EventKind::ListenerStopped(reason) => {
                info!("Listener stopped: {}", reason);
                if *reason != StopReason::Cancelled {
                    self.state.set_disconnected();
                }
            }
            EventKind::Error(msg) => {
                error!("Session error: {}", msg);
                self.state.set_error();
            }
        }

        writeln!(self.sink, "{}", event)?;
        Ok(())
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LinkStatus;

    fn processor() -> EventProcessor<Vec<u8>> {
        EventProcessor::new(LinkState::new(), Vec::new())
    }

    fn output(p: &EventProcessor<Vec<u8>>) -> String {
        String::from_utf8(p.sink().clone()).unwrap()
    }

    #[test]
    fn test_describe_firmware() {
        let kind = EventKind::CommandCompleted {
            command: DeviceCommand::ReadFirmwareRevision,
            response: DecodedResponse::FirmwareRevision("1.2.3.4".into()),
        };
        assert_eq!(
            kind.describe(),
            "ReadFirmwareRevision: firmware revision 1.2.3.4 returned from device"
        );
    }

    #[test]
    fn test_describe_sent_frame() {
        let kind = EventKind::CommandSent {
            command: DeviceCommand::ConnectionPing,
            frame: vec![60, 0, 1, 75, 9, 62],
        };
        assert_eq!(kind.describe(), "Data Sent: 60 0 1 75 9 62 (ConnectionPing)");
    }

    #[test]
    fn test_event_display_has_timestamp() {
        let event = SessionEvent::now(EventKind::Disconnected);
        let line = event.to_string();
        assert!(line.ends_with(" : Disconnected"));
        assert_eq!(&line[4..5], "-");
    }

    #[test]
    fn test_processor_tracks_pending() {
        let mut p = processor();
        p.process_event(&SessionEvent::now(EventKind::Connected {
            endpoint: "Wasatch-D70B".into(),
        }))
        .unwrap();
        p.process_event(&SessionEvent::now(EventKind::CommandSent {
            command: DeviceCommand::ConnectionPing,
            frame: vec![],
        }))
        .unwrap();
        assert_eq!(p.state.get_status(), LinkStatus::AwaitingResponse);

        p.process_event(&SessionEvent::now(EventKind::CommandCompleted {
            command: DeviceCommand::ConnectionPing,
            response: DecodedResponse::Ack,
        }))
        .unwrap();
        assert_eq!(p.state.get_status(), LinkStatus::Idle);
        assert!(output(&p).contains("ConnectionPing returned from device"));
    }

    #[test]
    fn test_processor_records_revisions() {
        let mut p = processor();
        p.process_event(&SessionEvent::now(EventKind::CommandCompleted {
            command: DeviceCommand::ReadFpgaRevision,
            response: DecodedResponse::FpgaRevision("012-007".into()),
        }))
        .unwrap();
        assert_eq!(p.state.get_fpga_revision(), Some("012-007".to_string()));
    }

    #[test]
    fn test_processor_hides_chunks_by_default() {
        let mut p = processor();
        p.process_event(&SessionEvent::now(EventKind::SpectralChunk(vec![1, 2])))
            .unwrap();
        assert!(output(&p).is_empty());

        let mut p = processor().with_chunks(true);
        p.process_event(&SessionEvent::now(EventKind::SpectralChunk(vec![1, 2])))
            .unwrap();
        assert!(output(&p).contains("Spectral chunk: 2 samples"));
    }

    #[test]
    fn test_listener_stop_marks_disconnected() {
        let mut p = processor();
        p.process_event(&SessionEvent::now(EventKind::Connected {
            endpoint: "dev".into(),
        }))
        .unwrap();
        p.process_event(&SessionEvent::now(EventKind::ListenerStopped(
            StopReason::EndOfStream,
        )))
        .unwrap();
        assert_eq!(p.state.get_status(), LinkStatus::Disconnected);
    }
}
