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

//! Memory-mapped segments on tmpfs
//!
//! Each key maps to one file under the segment directory, named after the
//! namespace key and the slot key. Files are created exclusively, sized to fit
//! and filled through a writable mapping; readers map them read-only. Locks are
//! `flock` advisory locks on one of [`LOCK_SLOTS`] sidecar files per namespace,
//! picked by key, so they cover every process using the same directory while
//! the number of lock files stays fixed. Keys sharing a slot serialize against
//! each other; no caller holds two locks at once.

use crate::segment::{SegmentBackend, SegmentKey, SegmentLock};
use fuzzcache_core::CacheConfig;
use memmap2::{Mmap, MmapMut};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Lock files kept per namespace
pub const LOCK_SLOTS: u32 = 64;

/// File-per-segment backend
#[derive(Debug, Clone)]
pub struct MmapSegments {
    dir: PathBuf,
    namespace: SegmentKey,
}

impl MmapSegments {
    /// Open (creating if needed) a segment directory
    pub fn open(dir: impl AsRef<Path>, namespace: SegmentKey) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, namespace })
    }

    /// Open the directory and namespace described by `config`
    pub fn from_config(config: &CacheConfig) -> io::Result<Self> {
        let namespace = SegmentKey::derive(&config.key_path, config.key_discriminator)?;
        Self::open(&config.segment_dir, namespace)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn namespace(&self) -> SegmentKey {
        self.namespace
    }

    fn segment_path(&self, key: u32) -> PathBuf {
        self.dir
            .join(format!("fuzzcache-{}-{:08x}", self.namespace, key))
    }

    fn lock_path(&self, key: u32) -> PathBuf {
        self.dir
            .join(format!("fuzzcache-{}.lock{:02}", self.namespace, key % LOCK_SLOTS))
    }
}

impl SegmentBackend for MmapSegments {
    fn read(&self, key: u32) -> io::Result<Option<Vec<u8>>> {
        let file = match File::open(self.segment_path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if file.metadata()?.len() == 0 {
            return Ok(Some(Vec::new()));
        }
        let map = unsafe { Mmap::map(&file)? };
        Ok(Some(map.to_vec()))
    }

    fn create(&self, key: u32, data: &[u8]) -> io::Result<usize> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(self.segment_path(key))?;
        if data.is_empty() {
            return Ok(0);
        }
        file.set_len(data.len() as u64)?;

        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map.copy_from_slice(data);
        map.flush()?;
        Ok(data.len())
    }

    fn delete(&self, key: u32) -> io::Result<bool> {
        match fs::remove_file(self.segment_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[cfg(unix)]
    fn lock(&self, key: u32) -> io::Result<SegmentLock> {
        use nix::fcntl::{flock, FlockArg};
        use std::os::fd::AsRawFd;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path(key))?;
        flock(file.as_raw_fd(), FlockArg::LockExclusive).map_err(io::Error::from)?;
        Ok(SegmentLock::file(file))
    }

    #[cfg(not(unix))]
    fn lock(&self, _key: u32) -> io::Result<SegmentLock> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "advisory segment locks require a unix host",
        ))
    }
}
