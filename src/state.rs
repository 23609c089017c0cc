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

//! Observable link state for presentation layers.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::protocol::{DecodedResponse, DeviceCommand};

/// Link status as seen from outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Idle,
    AwaitingResponse,
    Error,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Disconnected => "Disconnected",
            LinkStatus::Connecting => "Connecting...",
            LinkStatus::Idle => "Connected",
            LinkStatus::AwaitingResponse => "Awaiting response",
            LinkStatus::Error => "Error",
        }
    }

    /// Whether a connection is up.
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkStatus::Idle | LinkStatus::AwaitingResponse)
    }
}

/// Shared link state.
#[derive(Debug)]
pub struct LinkState {
    /// Current link status.
    pub status: RwLock<LinkStatus>,

    /// Endpoint name of the current or last connection.
    pub endpoint: RwLock<Option<String>>,

    /// Command awaiting a response.
    pub pending: RwLock<Option<DeviceCommand>>,

    /// Last firmware revision reported.
    pub firmware_revision: RwLock<Option<String>>,

    /// Last FPGA revision reported.
    pub fpga_revision: RwLock<Option<String>>,

    /// Last complete spectrum.
    pub last_spectrum: RwLock<Option<Vec<i16>>>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            status: RwLock::new(LinkStatus::Disconnected),
            endpoint: RwLock::new(None),
            pending: RwLock::new(None),
            firmware_revision: RwLock::new(None),
            fpga_revision: RwLock::new(None),
            last_spectrum: RwLock::new(None),
        }
    }
}

impl LinkState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connecting(&self, endpoint: String) {
        *self.status.write() = LinkStatus::Connecting;
        *self.endpoint.write() = Some(endpoint);
    }

    pub fn set_connected(&self, endpoint: String) {
        *self.status.write() = LinkStatus::Idle;
        *self.endpoint.write() = Some(endpoint);
        *self.pending.write() = None;
    }

    pub fn set_disconnected(&self) {
        *self.status.write() = LinkStatus::Disconnected;
        *self.pending.write() = None;
    }

    pub fn set_error(&self) {
        *self.status.write() = LinkStatus::Error;
    }

    /// Record the pending command. Only moves the status while connected.
    pub fn set_pending(&self, command: Option<DeviceCommand>) {
        let mut status = self.status.write();
        if status.is_connected() {
            *status = if command.is_some() {
                LinkStatus::AwaitingResponse
            } else {
                LinkStatus::Idle
            };
        }
        *self.pending.write() = command;
    }

    pub fn record_response(&self, response: &DecodedResponse) {
        match response {
            DecodedResponse::FirmwareRevision(rev) => {
                *self.firmware_revision.write() = Some(rev.clone())
            }
            DecodedResponse::FpgaRevision(rev) => *self.fpga_revision.write() = Some(rev.clone()),
            DecodedResponse::Spectrum(samples) => {
                *self.last_spectrum.write() = Some(samples.clone())
            }
            DecodedResponse::Ack | DecodedResponse::Payload(_) => {}
        }
    }

    pub fn get_status(&self) -> LinkStatus {
        *self.status.read()
    }

    pub fn get_endpoint(&self) -> Option<String> {
        self.endpoint.read().clone()
    }

    pub fn get_pending(&self) -> Option<DeviceCommand> {
        *self.pending.read()
    }

    pub fn get_firmware_revision(&self) -> Option<String> {
        self.firmware_revision.read().clone()
    }

    pub fn get_fpga_revision(&self) -> Option<String> {
        self.fpga_revision.read().clone()
    }

    pub fn get_last_spectrum(&self) -> Option<Vec<i16>> {
        self.last_spectrum.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_only_moves_connected_status() {
        let state = LinkState::new();
        state.set_pending(Some(DeviceCommand::ConnectionPing));
        assert_eq!(state.get_status(), LinkStatus::Disconnected);

        state.set_connected("dev".into());
        state.set_pending(Some(DeviceCommand::ConnectionPing));
        assert_eq!(state.get_status(), LinkStatus::AwaitingResponse);
        assert_eq!(state.get_pending(), Some(DeviceCommand::ConnectionPing));

        state.set_pending(None);
        assert_eq!(state.get_status(), LinkStatus::Idle);
    }

    #[test]
    fn test_disconnect_clears_pending() {
        let state = LinkState::new();
        state.set_connected("dev".into());
        state.set_pending(Some(DeviceCommand::AcquireImage));
        state.set_disconnected();

        assert_eq!(state.get_status(), LinkStatus::Disconnected);
        assert_eq!(state.get_pending(), None);
        assert_eq!(state.get_endpoint(), Some("dev".to_string()));
    }

    #[test]
    fn test_record_spectrum() {
        let state = LinkState::new();
        state.record_response(&DecodedResponse::Spectrum(vec![1, 2, 3]));
        assert_eq!(state.get_last_spectrum(), Some(vec![1, 2, 3]));
        assert_eq!(LinkStatus::AwaitingResponse.as_str(), "Awaiting response");
    }
}
