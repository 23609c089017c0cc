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

//! Spectrometer wire protocol.
//!
//! Framing, the command catalog, response decoding and the spectral
//! stream. Nothing in here performs I/O.

pub mod checksum;
pub mod command;
pub mod decoder;
pub mod frame;
pub mod spectral;

pub use checksum::{Checksum, Crc8Maxim};
pub use command::{DeviceCommand, ResponseShape, TailRender, WRITE_FLAG};
pub use decoder::{decode_response, DecodedResponse};
pub use frame::{
    format_bytes, FrameCodec, FrameRejection, InboundFrame, OutboundFrame, PayloadTooLong,
    MIN_FRAME_LEN,
};
pub use spectral::{SpectralAccumulator, SpectralPolicy, SpectralProgress};
