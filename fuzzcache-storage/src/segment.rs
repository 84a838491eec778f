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

//! Shared segment backends
//!
//! [`SegmentBackend`] is the seam over the OS shared-memory facility: open or
//! create a sized segment by integer key, read it whole, delete it, and take an
//! advisory lock on it. [`MemorySegments`] keeps segments in-process and is what
//! tests share between several dispatchers standing in for worker processes.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RawMutex};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reproducible key naming a family of segments
///
/// Derived from a file's identity and a discriminator character so that every
/// process pointed at the same file lands on the same key, the way System V
/// `ftok` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey(pub u32);

impl SegmentKey {
    /// Combine `path`'s device and inode with `discriminator`
    #[cfg(unix)]
    pub fn derive(path: &Path, discriminator: char) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let meta = std::fs::metadata(path)?;
        let disc = u32::from(discriminator) & 0xff;
        let dev = (meta.dev() & 0xff) as u32;
        let ino = (meta.ino() & 0xffff) as u32;
        Ok(Self((disc << 24) | (dev << 16) | ino))
    }

    #[cfg(not(unix))]
    pub fn derive(path: &Path, discriminator: char) -> io::Result<Self> {
        let canonical = std::fs::canonicalize(path)?;
        let disc = u32::from(discriminator) & 0xff;
        let hash = crc32fast::hash(canonical.to_string_lossy().as_bytes());
        Ok(Self((disc << 24) | (hash & 0x00ff_ffff)))
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

// Variants are held only for their Drop
#[allow(dead_code)]
enum LockGuard {
    Memory(parking_lot::ArcMutexGuard<RawMutex, ()>),
    #[cfg(unix)]
    File(std::fs::File),
}

/// Held advisory lock on a segment key, released on drop
pub struct SegmentLock {
    guard: LockGuard,
}

impl SegmentLock {
    fn memory(guard: parking_lot::ArcMutexGuard<RawMutex, ()>) -> Self {
        Self {
            guard: LockGuard::Memory(guard),
        }
    }

    /// Lock backed by an open file carrying an exclusive `flock`
    #[cfg(unix)]
    pub(crate) fn file(file: std::fs::File) -> Self {
        Self {
            guard: LockGuard::File(file),
        }
    }
}

impl fmt::Debug for SegmentLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.guard {
            LockGuard::Memory(_) => "memory",
            #[cfg(unix)]
            LockGuard::File(_) => "file",
        };
        f.debug_struct("SegmentLock").field("kind", &kind).finish()
    }
}

/// OS shared-memory primitive
pub trait SegmentBackend: Send + Sync {
    /// Read a whole segment, `None` if it does not exist
    fn read(&self, key: u32) -> io::Result<Option<Vec<u8>>>;

    /// Create a new segment sized to `data` and write it.
    /// Fails with `AlreadyExists` if the key is taken.
    fn create(&self, key: u32, data: &[u8]) -> io::Result<usize>;

    /// Delete a segment, returning whether one existed
    fn delete(&self, key: u32) -> io::Result<bool>;

    /// Take the exclusive advisory lock for `key`, blocking until available
    fn lock(&self, key: u32) -> io::Result<SegmentLock>;
}

/// In-process segments
#[derive(Default)]
pub struct MemorySegments {
    segments: DashMap<u32, Vec<u8>>,
    locks: DashMap<u32, Arc<Mutex<()>>>,
    fail_writes: AtomicBool,
}

impl MemorySegments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent create fail, as a full or unavailable shm would
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Overwrite raw segment bytes, bypassing the envelope
    pub fn insert_raw(&self, key: u32, data: Vec<u8>) {
        self.segments.insert(key, data);
    }

    pub fn contains(&self, key: u32) -> bool {
        self.segments.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl SegmentBackend for MemorySegments {
    fn read(&self, key: u32) -> io::Result<Option<Vec<u8>>> {
        Ok(self.segments.get(&key).map(|s| s.value().clone()))
    }

    fn create(&self, key: u32, data: &[u8]) -> io::Result<usize> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "segment allocation refused",
            ));
        }
        match self.segments.entry(key) {
            Entry::Occupied(_) => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("segment {key:08x} already exists"),
            )),
            Entry::Vacant(slot) => {
                slot.insert(data.to_vec());
                Ok(data.len())
            }
        }
    }

    fn delete(&self, key: u32) -> io::Result<bool> {
        Ok(self.segments.remove(&key).is_some())
    }

    fn lock(&self, key: u32) -> io::Result<SegmentLock> {
        let mutex = self.locks.entry(key).or_default().clone();
        Ok(SegmentLock::memory(mutex.lock_arc()))
    }
}
