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

//! Error types for the session engine.

use thiserror::Error;

use crate::protocol::{DeviceCommand, PayloadTooLong};

/// Errors surfaced to callers of the session API.
///
/// Frame rejections are not errors: they are recovered inside the session
/// and reported on the event stream.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connect, send or receive failed; the session is torn down.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// BlueZ refused a discovery or adapter operation.
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    /// A command is already awaiting its response.
    #[error("{pending} is still awaiting a response")]
    Busy { pending: DeviceCommand },

    /// No live connection.
    #[error("not connected")]
    NotConnected,

    /// No paired endpoint carries the requested name.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error(transparent)]
    PayloadTooLong(#[from] PayloadTooLong),
}

/// Result type alias using SessionError.
pub type Result<T> = std::result::Result<T, SessionError>;
