// Copyright 2025 Sushanth (https://github.com/sushanthpy)
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

//! Persisted envelope format
//!
//! Every shared segment holds one envelope:
//!
//! ```text
//! magic "FZC1" | version u32 LE | body_len u32 LE | body | crc32(body) u32 LE
//! ```
//!
//! The body is the bincode encoding of `{payload, expiry_ms}`. Bytes after the
//! checksum are ignored, since some shared-memory facilities round segment sizes
//! up.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Cursor, Read};
use thiserror::Error;

pub const ENVELOPE_MAGIC: &[u8; 4] = b"FZC1";
pub const ENVELOPE_VERSION: u32 = 1;

const HEADER_LEN: usize = 12;

/// Envelope decoding errors
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Bad envelope magic")]
    BadMagic,

    #[error("Unsupported envelope version {0} (expected {ENVELOPE_VERSION})")]
    UnsupportedVersion(u32),

    #[error("Envelope checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("Envelope truncated")]
    Truncated,

    #[error("Envelope body too large: {0} bytes")]
    TooLarge(usize),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl From<io::Error> for EnvelopeError {
    fn from(_: io::Error) -> Self {
        // Reads only ever come from an in-memory cursor
        EnvelopeError::Truncated
    }
}

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Payload plus its logical expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Vec<u8>,
    /// Unix millis after which the payload is stale, 0 = never
    pub expiry_ms: u64,
}

impl Envelope {
    /// Wrap `payload`, expiring `ttl_ms` after `now_ms` (never when `ttl_ms` is 0)
    pub fn new(payload: Vec<u8>, ttl_ms: u64, now_ms: u64) -> Self {
        let expiry_ms = if ttl_ms > 0 {
            now_ms.saturating_add(ttl_ms)
        } else {
            0
        };
        Self { payload, expiry_ms }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expiry_ms != 0 && self.expiry_ms < now_ms
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let body = bincode::serialize(self)?;
        let body_len = u32::try_from(body.len()).map_err(|_| EnvelopeError::TooLarge(body.len()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + body.len() + 4);
        out.extend_from_slice(ENVELOPE_MAGIC);
        out.write_u32::<LittleEndian>(ENVELOPE_VERSION)?;
        out.write_u32::<LittleEndian>(body_len)?;
        out.extend_from_slice(&body);
        out.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let mut cursor = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != ENVELOPE_MAGIC {
            return Err(EnvelopeError::BadMagic);
        }

        let version = cursor.read_u32::<LittleEndian>()?;
        if version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(version));
        }

        let body_len = cursor.read_u32::<LittleEndian>()? as usize;
        if bytes.len() < HEADER_LEN + body_len + 4 {
            return Err(EnvelopeError::Truncated);
        }
        let body = &bytes[HEADER_LEN..HEADER_LEN + body_len];
        cursor.set_position((HEADER_LEN + body_len) as u64);

        let stored = cursor.read_u32::<LittleEndian>()?;
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(EnvelopeError::ChecksumMismatch { stored, computed });
        }

        Ok(bincode::deserialize(body)?)
    }
}
