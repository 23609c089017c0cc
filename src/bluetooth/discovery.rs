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

//! Discovery of paired serial-port endpoints and RFCOMM connect.

use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, Address};
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SessionError};

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// RFCOMM channel the instrument listens on.
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// A paired device offering the serial port profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: Address,
    pub name: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.address)
    }
}

/// Pick an endpoint by name from a discovery result.
pub fn select_endpoint<'a>(endpoints: &'a [Endpoint], name: &str) -> Option<&'a Endpoint> {
    endpoints.iter().find(|e| e.name == name)
}

/// Lists endpoints known to the local adapter.
pub struct Discovery {
    _session: bluer::Session,
    adapter: Adapter,
}

impl Discovery {
    /// Open a BlueZ session on the default adapter.
    pub async fn new() -> Result<Self> {
        let session = bluer::Session::new().await?;
        debug!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        Ok(Self {
            _session: session,
            adapter,
        })
    }

    /// Paired devices that advertise the serial port profile.
    ///
    /// Devices whose service list is not cached yet are included.
    pub async fn discover(&self) -> Result<Vec<Endpoint>> {
        let mut endpoints = Vec::new();

        for address in self.adapter.device_addresses().await? {
            let device = self.adapter.device(address)?;
            if !device.is_paired().await? {
                continue;
            }

            let offers_spp = match device.uuids().await? {
                Some(uuids) => uuids.contains(&SPP_UUID),
                None => true,
            };
            if !offers_spp {
                debug!("Skipping {}: no serial port profile", address);
                continue;
            }

            let name = device
                .alias()
                .await
                .unwrap_or_else(|_| address.to_string());
            endpoints.push(Endpoint { address, name });
        }

        info!("Found {} serial port endpoints", endpoints.len());
        Ok(endpoints)
    }

    /// Find a paired endpoint by name.
    pub async fn find(&self, name: &str) -> Result<Endpoint> {
        let endpoints = self.discover().await?;
        select_endpoint(&endpoints, name)
            .cloned()
            .ok_or_else(|| SessionError::DeviceNotFound(name.to_string()))
    }
}

/// Open an RFCOMM byte stream to an endpoint.
pub async fn open_stream(endpoint: &Endpoint, channel: u8) -> Result<Stream> {
    info!("Opening RFCOMM channel {} to {}", channel, endpoint);
    let stream = Stream::connect(SocketAddr::new(endpoint.address, channel)).await?;
    Ok(stream)
}
