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

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::DEFAULT_RFCOMM_CHANNEL;
use crate::protocol::SpectralPolicy;
use crate::session::SessionOptions;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Protocol session settings.
    pub session: SessionConfig,

    /// Spectral acquisition settings.
    pub spectral: SpectralConfig,

    /// Tracing filter directive, e.g. `"spectro_link=debug"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Name of the instrument to connect to.
    pub device_name: String,

    /// RFCOMM channel of the serial port service.
    pub rfcomm_channel: u8,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_name: "Wasatch-D70B".to_string(),
            rfcomm_channel: DEFAULT_RFCOMM_CHANNEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Response timeout in milliseconds; 0 waits forever.
    pub response_timeout_ms: u64,

    /// Maximum bytes per receive.
    pub read_buffer_size: usize,

    /// Check inbound frame checksums.
    pub verify_inbound_checksum: bool,

    /// Ping the instrument right after connecting.
    pub ping_on_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5000,
            read_buffer_size: 8192,
            verify_inbound_checksum: false,
            ping_on_connect: true,
        }
    }
}

/// When an acquisition is considered finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralCompletion {
    PerChunk,
    SampleCount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub completion: SpectralCompletion,

    /// Samples per acquisition in `sample_count` mode.
    pub pixel_count: usize,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            completion: SpectralCompletion::SampleCount,
            pixel_count: 1024,
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spectro-link")
            .join("config.toml")
    }

    /// Load configuration from the default location or create it.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from a file, writing defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to a file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Session tunables derived from this configuration.
    pub fn session_options(&self) -> SessionOptions {
        let response_timeout = match self.session.response_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let spectral_policy = match self.spectral.completion {
            SpectralCompletion::PerChunk => SpectralPolicy::PerChunk,
            SpectralCompletion::SampleCount => {
                SpectralPolicy::from_pixel_count(self.spectral.pixel_count)
            }
        };

        SessionOptions {
            response_timeout,
            read_buffer_size: self.session.read_buffer_size.max(1),
            verify_inbound_checksum: self.session.verify_inbound_checksum,
            spectral_policy,
        }
    }
}
