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

//! Assembly of the unframed spectral byte stream.
//!
//! The acquire-image response arrives as raw little-endian 16-bit samples
//! with no delimiters or checksum, and the transport may split it across
//! any number of reads.

use tracing::{debug, warn};

/// When an acquisition counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralPolicy {
    /// Every chunk completes the acquisition; an odd trailing byte is dropped.
    PerChunk,
    /// Complete once this many samples are held; odd bytes carry over.
    SampleCount(usize),
}

impl SpectralPolicy {
    /// Build from a configured pixel count, where zero means per-chunk.
    pub fn from_pixel_count(pixel_count: usize) -> Self {
        if pixel_count == 0 {
            Self::PerChunk
        } else {
            Self::SampleCount(pixel_count)
        }
    }
}

/// Outcome of feeding one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpectralProgress {
    /// Samples decoded from this chunk.
    pub chunk: Vec<i16>,
    /// The finished spectrum, once the acquisition is complete.
    pub complete: Option<Vec<i16>>,
}

/// Accumulates spectral samples across transport reads.
pub struct SpectralAccumulator {
    policy: SpectralPolicy,
    samples: Vec<i16>,
    carry: Option<u8>,
    bytes_received: usize,
    in_progress: bool,
}

impl SpectralAccumulator {
    /// Create a new accumulator.
    pub fn new(policy: SpectralPolicy) -> Self {
        let capacity = match policy {
            SpectralPolicy::SampleCount(n) => n,
            SpectralPolicy::PerChunk => 0,
        };
        Self {
            policy,
            samples: Vec::with_capacity(capacity),
            carry: None,
            bytes_received: 0,
            in_progress: false,
        }
    }

    /// Process a raw chunk from the transport.
    pub fn push(&mut self, chunk: &[u8]) -> SpectralProgress {
        self.in_progress = true;
        self.bytes_received += chunk.len();

        let mut rest = chunk;
        let mut decoded = Vec::with_capacity(chunk.len() / 2 + 1);

        if let Some(low) = self.carry {
            if let Some((&high, tail)) = rest.split_first() {
                decoded.push(i16::from_le_bytes([low, high]));
                self.carry = None;
                rest = tail;
            }
        }

        let pairs = rest.chunks_exact(2);
        let remainder = pairs.remainder();
        decoded.extend(pairs.map(|pair| i16::from_le_bytes([pair[0], pair[1]])));
        if let Some(&odd) = remainder.first() {
            self.carry = Some(odd);
        }

        debug!(
            "Spectral chunk: {} bytes, {} samples, {} bytes total",
            chunk.len(),
            decoded.len(),
            self.bytes_received
        );

        match self.policy {
            SpectralPolicy::PerChunk => {
                if self.carry.is_some() {
                    debug!("Dropping unpaired trailing byte");
                }
                self.samples.extend_from_slice(&decoded);
                let complete = std::mem::take(&mut self.samples);
                self.reset();
                SpectralProgress {
                    chunk: decoded,
                    complete: Some(complete),
                }
            }
            SpectralPolicy::SampleCount(expected) => {
                let room = expected.saturating_sub(self.samples.len());
                if decoded.len() > room {
                    warn!(
                        "Spectrum overrun: discarding {} samples beyond {}",
                        decoded.len() - room,
                        expected
                    );
                    decoded.truncate(room);
                }
                self.samples.extend_from_slice(&decoded);

                let complete = if self.samples.len() >= expected {
                    if self.carry.is_some() {
                        warn!("Discarding unpaired byte after complete spectrum");
                    }
                    debug!("Spectrum complete: {} samples", self.samples.len());
                    let complete = std::mem::take(&mut self.samples);
                    self.reset();
                    Some(complete)
                } else {
                    None
                };

                SpectralProgress {
                    chunk: decoded,
                    complete,
                }
            }
        }
    }

    /// Discard any partial acquisition.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.carry = None;
        self.bytes_received = 0;
        self.in_progress = false;
    }

    /// Check if an acquisition is in progress.
    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Samples held for the current acquisition.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Raw bytes received for the current acquisition.
    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }
}

impl Default for SpectralAccumulator {
    fn default() -> Self {
        Self::new(SpectralPolicy::PerChunk)
    }
}
