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

//! Bluetooth transport for the instrument.
//!
//! Discovers paired serial-port endpoints, opens RFCOMM streams and drives
//! the protocol engine over them.

mod connection;
mod discovery;

pub use connection::{PendingAck, Session, SessionConnection};
pub use discovery::{
    open_stream, select_endpoint, Discovery, Endpoint, DEFAULT_RFCOMM_CHANNEL, SPP_UUID,
};
