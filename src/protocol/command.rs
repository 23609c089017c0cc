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

//! Instrument command catalog.
//!
//! Every command carries the shape its response is decoded with, so a command
//! cannot be added without a decoding rule.

use std::fmt;

/// Flag OR'd into a command code to select the write variant.
pub const WRITE_FLAG: u8 = 0x80;

/// Commands understood by the spectrometer firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceCommand {
    AcquireImage = 0x0A,
    ReadFirmwareRevision = 0x0D,
    ReadFpgaRevision = 0x10,
    IntegrationTime = 0x11,
    CcdSignalOffset = 0x13,
    CcdSignalGain = 0x14,
    ReadPixelCount = 0x15,
    CcdTemperatureSetpoint = 0x16,
    LaserModulationDuration = 0x17,
    LaserModulationPulseDelay = 0x18,
    LaserModulationPeriod = 0x19,
    LaserModulationPulseWidth = 0x1E,
    GetActualIntegrationTime = 0x1F,
    GetActualFrameCount = 0x20,
    TriggerDelay = 0x28,
    OutputTestPattern = 0x30,
    SelectUsbFullSpeed = 0x32,
    LaserModulation = 0x33,
    LaserOn = 0x34,
    CcdTemperatureEnable = 0x38,
    LaserModLinkToIntegrationTime = 0x39,
    CcdTemperature = 0x49,
    PassFailLed = 0x4A,
    ConnectionPing = 0x4B,
    ClearAcquireButtonPressed = 0x4C,
}

/// How a fixed-position tail field is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailRender {
    /// Dotted decimal version built from every byte after the first.
    DottedVersion,
    /// Printable ASCII text.
    Ascii,
}

/// Response decoding strategy for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Fixed-size field ending `end_offset` bytes before the end of the frame.
    FixedTail {
        end_offset: usize,
        len: usize,
        render: TailRender,
    },
    /// No meaningful payload; a validated frame is the result.
    Acknowledge,
    /// Unframed little-endian sample stream, bypasses frame validation.
    RawSpectralStream,
    /// Payload bytes handed back undecoded.
    Payload,
}

impl DeviceCommand {
    /// Every command in code order.
    pub const ALL: [DeviceCommand; 25] = [
        Self::AcquireImage,
        Self::ReadFirmwareRevision,
        Self::ReadFpgaRevision,
        Self::IntegrationTime,
        Self::CcdSignalOffset,
        Self::CcdSignalGain,
        Self::ReadPixelCount,
        Self::CcdTemperatureSetpoint,
        Self::LaserModulationDuration,
        Self::LaserModulationPulseDelay,
        Self::LaserModulationPeriod,
        Self::LaserModulationPulseWidth,
        Self::GetActualIntegrationTime,
        Self::GetActualFrameCount,
        Self::TriggerDelay,
        Self::OutputTestPattern,
        Self::SelectUsbFullSpeed,
        Self::LaserModulation,
        Self::LaserOn,
        Self::CcdTemperatureEnable,
        Self::LaserModLinkToIntegrationTime,
        Self::CcdTemperature,
        Self::PassFailLed,
        Self::ConnectionPing,
        Self::ClearAcquireButtonPressed,
    ];

    /// Read code of the command.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Byte placed on the wire for the read or write variant.
    pub fn wire_byte(self, is_write: bool) -> u8 {
        if is_write {
            self.code() | WRITE_FLAG
        } else {
            self.code()
        }
    }

    /// Look up a command by its code. The write flag is ignored.
    pub fn from_code(byte: u8) -> Option<Self> {
        let code = byte & !WRITE_FLAG;
        Self::ALL.iter().copied().find(|cmd| cmd.code() == code)
    }

    /// Shape used to decode the response to the read or write variant.
    pub fn response_shape(self, is_write: bool) -> ResponseShape {
        match self {
            Self::AcquireImage => ResponseShape::RawSpectralStream,
            _ if is_write => ResponseShape::Acknowledge,
            Self::ReadFirmwareRevision => ResponseShape::FixedTail {
                end_offset: 2,
                len: 5,
                render: TailRender::DottedVersion,
            },
            Self::ReadFpgaRevision => ResponseShape::FixedTail {
                end_offset: 2,
                len: 7,
                render: TailRender::Ascii,
            },
            Self::ConnectionPing => ResponseShape::Acknowledge,
            _ => ResponseShape::Payload,
        }
    }

    /// Whether the response skips frame validation.
    pub fn is_spectral(self) -> bool {
        self.response_shape(false) == ResponseShape::RawSpectralStream
    }

    /// Parse from a command name.
    ///
    /// Accepts the short names used at the prompt as well as the full
    /// variant name in any case, with or without underscores.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "ping" => return Some(Self::ConnectionPing),
            "firmware" | "fw" => return Some(Self::ReadFirmwareRevision),
            "fpga" => return Some(Self::ReadFpgaRevision),
            "acquire" | "spectrum" => return Some(Self::AcquireImage),
            _ => {}
        }

        Self::ALL
            .iter()
            .copied()
            .find(|cmd| cmd.as_str().to_lowercase() == normalized)
    }

    /// Variant name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AcquireImage => "AcquireImage",
            Self::ReadFirmwareRevision => "ReadFirmwareRevision",
            Self::ReadFpgaRevision => "ReadFpgaRevision",
            Self::IntegrationTime => "IntegrationTime",
            Self::CcdSignalOffset => "CcdSignalOffset",
            Self::CcdSignalGain => "CcdSignalGain",
            Self::ReadPixelCount => "ReadPixelCount",
            Self::CcdTemperatureSetpoint => "CcdTemperatureSetpoint",
            Self::LaserModulationDuration => "LaserModulationDuration",
            Self::LaserModulationPulseDelay => "LaserModulationPulseDelay",
            Self::LaserModulationPeriod => "LaserModulationPeriod",
            Self::LaserModulationPulseWidth => "LaserModulationPulseWidth",
            Self::GetActualIntegrationTime => "GetActualIntegrationTime",
            Self::GetActualFrameCount => "GetActualFrameCount",
            Self::TriggerDelay => "TriggerDelay",
            Self::OutputTestPattern => "OutputTestPattern",
            Self::SelectUsbFullSpeed => "SelectUsbFullSpeed",
            Self::LaserModulation => "LaserModulation",
            Self::LaserOn => "LaserOn",
            Self::CcdTemperatureEnable => "CcdTemperatureEnable",
            Self::LaserModLinkToIntegrationTime => "LaserModLinkToIntegrationTime",
            Self::CcdTemperature => "CcdTemperature",
            Self::PassFailLed => "PassFailLed",
            Self::ConnectionPing => "ConnectionPing",
            Self::ClearAcquireButtonPressed => "ClearAcquireButtonPressed",
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.as_str(), self.code())
    }
}
