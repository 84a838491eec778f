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

//! Configuration for the cache engine
//!
//! Loaded from TOML by the CLI; tests and embedders usually start from one of
//! the presets and override fields directly.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reserved shared-store key holding the validity index
pub const DEFAULT_INDEX_KEY: u32 = 0xFFFF_FFFF;

/// Default directory for shared segments (tmpfs on Linux)
pub const DEFAULT_SEGMENT_DIR: &str = "/dev/shm";

/// How cross-process read-modify-write cycles are protected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// No locking. Concurrent workers touching the same table may race.
    #[default]
    BestEffort,
    /// Per-key advisory locks around store access and index updates
    Locked,
}

/// Cache engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one file per shared segment
    pub segment_dir: PathBuf,

    /// Existing file whose identity seeds the segment namespace
    pub key_path: PathBuf,

    /// Discriminator character combined with `key_path`
    pub key_discriminator: char,

    /// Shared-store key of the validity index
    pub index_key: u32,

    /// Expiry applied to cache fills in milliseconds, 0 = never expires
    pub ttl_ms: u64,

    /// Locking discipline for shared state
    pub consistency: ConsistencyMode,

    /// Ledger dumps are appended here before every replay when set
    pub trace_log: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            segment_dir: PathBuf::from(DEFAULT_SEGMENT_DIR),
            key_path: std::env::temp_dir(),
            key_discriminator: 'b',
            index_key: DEFAULT_INDEX_KEY,
            ttl_ms: 0,
            consistency: ConsistencyMode::BestEffort,
            trace_log: None,
        }
    }
}

impl CacheConfig {
    /// Config with advisory locking enabled
    pub fn locked() -> Self {
        Self {
            consistency: ConsistencyMode::Locked,
            ..Self::default()
        }
    }

    /// Config for in-process backends, rooted at a scratch directory
    pub fn in_memory(scratch: impl Into<PathBuf>) -> Self {
        let scratch = scratch.into();
        Self {
            segment_dir: scratch.clone(),
            key_path: scratch,
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), consistency = ?config.consistency, "cache config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let disc = u32::from(self.key_discriminator);
        if disc == 0 || disc > 0xff {
            return Err(CacheError::Config(format!(
                "key_discriminator must be a non-NUL single-byte character, got {:?}",
                self.key_discriminator
            )));
        }
        if self.segment_dir.as_os_str().is_empty() {
            return Err(CacheError::Config("segment_dir must not be empty".into()));
        }
        Ok(())
    }
}
