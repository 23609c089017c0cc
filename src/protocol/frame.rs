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

//! Frame construction and validation.
//!
//! Outbound layout:
//!
//! ```text
//! '<' 0x00 <len> <cmd> [payload...] <crc> '>'
//! ```
//!
//! `len` is the payload length plus one (it counts the checksum byte) and
//! `crc` covers everything between the leading delimiter and itself.
//! Inbound frames share the delimiters and carry the echoed command at
//! offset 3.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::checksum::{Checksum, Crc8Maxim};
use super::command::DeviceCommand;

/// Leading frame delimiter (`'<'`).
pub const START_DELIMITER: u8 = b'<';

/// Trailing frame delimiter (`'>'`).
pub const END_DELIMITER: u8 = b'>';

/// Reserved byte following the leading delimiter.
pub const RESERVED: u8 = 0x00;

/// Offset of the command byte in both directions.
pub const COMMAND_INDEX: usize = 3;

/// Offset of the first payload byte.
pub const PAYLOAD_INDEX: usize = 4;

/// Shortest inbound buffer that can hold a frame.
pub const MIN_FRAME_LEN: usize = 6;

/// Largest payload whose length still fits the one-byte length field.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - 1;

/// Reasons an inbound buffer is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameRejection {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("bad delimiters: first 0x{first:02X}, last 0x{last:02X}")]
    BadDelimiters { first: u8, last: u8 },

    #[error("command mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    CommandMismatch { expected: u8, actual: u8 },

    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Payload does not fit the one-byte length field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload of {0} bytes exceeds the {max}-byte frame limit", max = MAX_PAYLOAD_LEN)]
pub struct PayloadTooLong(pub usize);

/// An encoded command ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    command: DeviceCommand,
    is_write: bool,
    bytes: Vec<u8>,
}

impl OutboundFrame {
    pub fn command(&self) -> DeviceCommand {
        self.command
    }

    pub fn is_write(&self) -> bool {
        self.is_write
    }

    /// Full wire bytes including delimiters.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Value of the length field.
    pub fn length_field(&self) -> u8 {
        self.bytes[2]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[PAYLOAD_INDEX..self.bytes.len() - 2]
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - 2]
    }
}

/// A validated inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    bytes: Vec<u8>,
}

impl InboundFrame {
    /// Echoed command byte.
    pub fn command_byte(&self) -> u8 {
        self.bytes[COMMAND_INDEX]
    }

    /// Bytes between the command byte and the checksum.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[PAYLOAD_INDEX..self.bytes.len() - 2]
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - 2]
    }

    /// Field of `len` bytes ending `end_offset` bytes before the end of the frame.
    ///
    /// Returns `None` when the field would reach into the frame header.
    pub fn tail(&self, end_offset: usize, len: usize) -> Option<&[u8]> {
        let end = self.bytes.len().checked_sub(end_offset)?;
        let start = end.checked_sub(len)?;
        if start < PAYLOAD_INDEX {
            return None;
        }
        Some(&self.bytes[start..end])
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encoder and validator for instrument frames.
#[derive(Clone)]
pub struct FrameCodec {
    checksum: Arc<dyn Checksum>,
    verify_inbound: bool,
}

impl fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCodec")
            .field("verify_inbound", &self.verify_inbound)
            .finish_non_exhaustive()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(Arc::new(Crc8Maxim))
    }
}

impl FrameCodec {
    /// Create a codec around a checksum provider.
    pub fn new(checksum: Arc<dyn Checksum>) -> Self {
        Self {
            checksum,
            verify_inbound: false,
        }
    }

    /// Also check the checksum of inbound frames.
    pub fn with_inbound_verification(mut self, verify: bool) -> Self {
        self.verify_inbound = verify;
        self
    }

    /// Build the wire frame for a command.
    pub fn encode(
        &self,
        command: DeviceCommand,
        is_write: bool,
        payload: &[u8],
    ) -> Result<OutboundFrame, PayloadTooLong> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(PayloadTooLong(payload.len()));
        }
        Ok(self.build(command, is_write, payload))
    }

    /// Build a frame with no payload.
    pub fn encode_request(&self, command: DeviceCommand, is_write: bool) -> OutboundFrame {
        self.build(command, is_write, &[])
    }

    fn build(&self, command: DeviceCommand, is_write: bool, payload: &[u8]) -> OutboundFrame {
        let mut bytes = Vec::with_capacity(payload.len() + MIN_FRAME_LEN + 1);
        bytes.push(START_DELIMITER);
        bytes.push(RESERVED);
        bytes.push((payload.len() + 1) as u8);
        bytes.push(command.wire_byte(is_write));
        bytes.extend_from_slice(payload);

        let crc = self.checksum.digest(&bytes[1..]);
        bytes.push(crc);
        bytes.push(END_DELIMITER);

        OutboundFrame {
            command,
            is_write,
            bytes,
        }
    }

    /// Check an inbound buffer against the command awaiting a response.
    ///
    /// `expected` is the pending command's code. The byte at offset 3 must
    /// equal it exactly; a write-flagged echo is a mismatch.
    pub fn validate(&self, buffer: &[u8], expected: u8) -> Result<InboundFrame, FrameRejection> {
        if buffer.len() < MIN_FRAME_LEN {
            return Err(FrameRejection::TooShort { len: buffer.len() });
        }

        let first = buffer[0];
        let last = buffer[buffer.len() - 1];
        if first != START_DELIMITER || last != END_DELIMITER {
            return Err(FrameRejection::BadDelimiters { first, last });
        }

        let actual = buffer[COMMAND_INDEX];
        if actual != expected {
            return Err(FrameRejection::CommandMismatch { expected, actual });
        }

        if self.verify_inbound {
            let crc_index = buffer.len() - 2;
            let computed = self.checksum.digest(&buffer[1..crc_index]);
            if computed != buffer[crc_index] {
                return Err(FrameRejection::ChecksumMismatch {
                    expected: computed,
                    actual: buffer[crc_index],
                });
            }
        }

        Ok(InboundFrame {
            bytes: buffer.to_vec(),
        })
    }
}

/// Render bytes as space-separated decimals for trace output.
pub fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
