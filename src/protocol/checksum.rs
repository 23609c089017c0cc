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

//! Checksum provider used to seal outbound frames.
//!
//! The frame codec only relies on the [`Checksum`] contract: a deterministic
//! mapping from a byte range to a single digest byte.

/// Single-byte digest over a byte range.
pub trait Checksum: Send + Sync {
    /// Compute the digest of `bytes`.
    fn digest(&self, bytes: &[u8]) -> u8;
}

/// Reflected polynomial for CRC-8/MAXIM (x^8 + x^5 + x^4 + 1).
const MAXIM_POLY_REFLECTED: u8 = 0x8C;

/// CRC-8 Dallas/Maxim, the instrument firmware's frame checksum.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc8Maxim;

impl Checksum for Crc8Maxim {
    fn digest(&self, bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |crc, &byte| {
            let mut crc = crc ^ byte;
            for _ in 0..8 {
                crc = if crc & 0x01 != 0 {
                    (crc >> 1) ^ MAXIM_POLY_REFLECTED
                } else {
                    crc >> 1
                };
            }
            crc
        })
    }
}

impl<F> Checksum for F
where
    F: Fn(&[u8]) -> u8 + Send + Sync,
{
    fn digest(&self, bytes: &[u8]) -> u8 {
        self(bytes)
    }
}
