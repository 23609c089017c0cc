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

//! Typed decoding of validated responses.

use std::fmt;
use tracing::warn;

use super::command::{DeviceCommand, ResponseShape, TailRender};
use super::frame::InboundFrame;

/// Result of decoding a response for the pending command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedResponse {
    /// Frame validated, nothing else to extract.
    Ack,
    /// Firmware revision, e.g. `"1.2.3.4"`.
    FirmwareRevision(String),
    /// FPGA revision text.
    FpgaRevision(String),
    /// Undecoded payload bytes.
    Payload(Vec<u8>),
    /// Complete spectrum.
    Spectrum(Vec<i16>),
}

impl fmt::Display for DecodedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "acknowledged"),
            Self::FirmwareRevision(rev) => write!(f, "firmware revision {}", rev),
            Self::FpgaRevision(rev) => write!(f, "FPGA revision {}", rev),
            Self::Payload(bytes) => write!(f, "payload {:02X?}", bytes),
            Self::Spectrum(samples) => write!(f, "spectrum of {} samples", samples.len()),
        }
    }
}

/// Decode a validated frame according to the pending command's shape.
///
/// A fixed-tail field that does not fit the frame falls back to the raw
/// payload. Spectral commands never reach this function.
pub fn decode_response(
    command: DeviceCommand,
    is_write: bool,
    frame: &InboundFrame,
) -> DecodedResponse {
    match command.response_shape(is_write) {
        ResponseShape::Acknowledge => DecodedResponse::Ack,
        ResponseShape::Payload => DecodedResponse::Payload(frame.payload().to_vec()),
        ResponseShape::FixedTail {
            end_offset,
            len,
            render,
        } => match frame.tail(end_offset, len) {
            Some(field) => {
                let text = render_tail(field, render);
                if command == DeviceCommand::ReadFirmwareRevision {
                    DecodedResponse::FirmwareRevision(text)
                } else {
                    DecodedResponse::FpgaRevision(text)
                }
            }
            None => {
                warn!(
                    "{} response of {} bytes too short for a {}-byte field",
                    command,
                    frame.len(),
                    len
                );
                DecodedResponse::Payload(frame.payload().to_vec())
            }
        },
        ResponseShape::RawSpectralStream => {
            warn!("{} routed through the framed decoder", command);
            DecodedResponse::Payload(frame.payload().to_vec())
        }
    }
}

fn render_tail(field: &[u8], render: TailRender) -> String {
    match render {
        // The leading byte of the revision field is not part of the version.
        TailRender::DottedVersion => field
            .iter()
            .skip(1)
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join("."),
        TailRender::Ascii => field
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '?'
                }
            })
            .collect(),
    }
}
