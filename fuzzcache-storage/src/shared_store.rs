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

//! Shared Store
//!
//! Key to blob persistence over shared segments. Every failure of the
//! underlying facility is logged and reported as absent / `false`: the caller
//! always has replay to fall back on, so nothing here is fatal.

use crate::envelope::{now_millis, Envelope};
use crate::mmap::MmapSegments;
use crate::segment::{MemorySegments, SegmentBackend, SegmentLock};
use fuzzcache_core::{CacheConfig, ConsistencyMode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cross-process blob store addressed by integer keys
#[derive(Clone)]
pub struct SharedStore {
    backend: Arc<dyn SegmentBackend>,
    mode: ConsistencyMode,
}

impl SharedStore {
    pub fn new(backend: Arc<dyn SegmentBackend>, mode: ConsistencyMode) -> Self {
        Self { backend, mode }
    }

    /// Store over fresh in-process segments
    pub fn in_memory(mode: ConsistencyMode) -> Self {
        Self::new(Arc::new(MemorySegments::new()), mode)
    }

    /// Store over the memory-mapped segments described by `config`
    pub fn open(config: &CacheConfig) -> io::Result<Self> {
        let segments = MmapSegments::from_config(config)?;
        Ok(Self::new(Arc::new(segments), config.consistency))
    }

    pub fn mode(&self) -> ConsistencyMode {
        self.mode
    }

    pub fn backend(&self) -> &Arc<dyn SegmentBackend> {
        &self.backend
    }

    /// Advisory lock on `key` when running in locked mode
    pub fn guard(&self, key: u32) -> Option<SegmentLock> {
        if self.mode != ConsistencyMode::Locked {
            return None;
        }
        match self.backend.lock(key) {
            Ok(lock) => Some(lock),
            Err(e) => {
                warn!(key, "segment lock failed, continuing unlocked: {}", e);
                None
            }
        }
    }

    /// Replace the blob at `key`, expiring `ttl_ms` from now (0 = never)
    pub fn put(&self, key: u32, value: &[u8], ttl_ms: u64) -> bool {
        let _lock = self.guard(key);
        self.put_unlocked(key, value, ttl_ms)
    }

    /// Blob at `key` unless missing, unreadable or expired
    pub fn get(&self, key: u32) -> Option<Vec<u8>> {
        let _lock = self.guard(key);
        self.get_unlocked(key)
    }

    /// Delete the blob at `key`, returning whether one existed
    pub fn clear(&self, key: u32) -> bool {
        let _lock = self.guard(key);
        self.clear_unlocked(key)
    }

    /// Serialize `value` with bincode and store it
    pub fn put_value<T: Serialize>(&self, key: u32, value: &T, ttl_ms: u64) -> bool {
        match bincode::serialize(value) {
            Ok(bytes) => self.put(key, &bytes, ttl_ms),
            Err(e) => {
                warn!(key, "failed to serialize value: {}", e);
                false
            }
        }
    }

    /// Load and deserialize a value stored with [`SharedStore::put_value`]
    pub fn get_value<T: DeserializeOwned>(&self, key: u32) -> Option<T> {
        let bytes = self.get(key)?;
        decode_value(key, &bytes)
    }

    pub(crate) fn put_unlocked(&self, key: u32, value: &[u8], ttl_ms: u64) -> bool {
        self.clear_unlocked(key);

        let envelope = Envelope::new(value.to_vec(), ttl_ms, now_millis());
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, "failed to encode envelope: {}", e);
                return false;
            }
        };

        match self.backend.create(key, &bytes) {
            Ok(written) => {
                debug!(key, bytes = written, "segment written");
                true
            }
            Err(e) => {
                warn!(key, "segment write failed: {}", e);
                false
            }
        }
    }

    pub(crate) fn get_unlocked(&self, key: u32) -> Option<Vec<u8>> {
        let bytes = match self.backend.read(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key, "segment not found");
                return None;
            }
            Err(e) => {
                warn!(key, "segment read failed: {}", e);
                return None;
            }
        };

        let envelope = match Envelope::decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key, "malformed segment: {}", e);
                return None;
            }
        };

        if envelope.is_expired(now_millis()) {
            debug!(key, expiry_ms = envelope.expiry_ms, "segment expired");
            return None;
        }
        Some(envelope.payload)
    }

    pub(crate) fn clear_unlocked(&self, key: u32) -> bool {
        match self.backend.delete(key) {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key, "segment delete failed: {}", e);
                false
            }
        }
    }
}

pub(crate) fn decode_value<T: DeserializeOwned>(key: u32, bytes: &[u8]) -> Option<T> {
    match bincode::deserialize(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, "failed to deserialize value: {}", e);
            None
        }
    }
}
