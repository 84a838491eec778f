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

//! Error types shared by every fuzzcache crate

use crate::call::{CallKind, UnknownCall};
use thiserror::Error;

/// Result type for cache engine operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors raised by the cache engine
///
/// Shared-memory failures never show up here: the store degrades them to a
/// miss. What remains are contract violations from the call site and replay
/// failures against the real backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A handle decoded to a position the ledger never recorded
    #[error("Ledger index {index} out of range (ledger holds {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    /// The ledger holds as many entries as the handle range can address
    #[error("Ledger is full ({capacity} entries)")]
    LedgerFull { capacity: usize },

    /// A call arrived without an argument it needs
    #[error("{kind} call is missing argument #{position}")]
    MissingArgument { kind: CallKind, position: usize },

    /// A call argument had the wrong shape
    #[error("{kind} call argument #{position} must be {expected}")]
    InvalidArgument {
        kind: CallKind,
        position: usize,
        expected: &'static str,
    },

    /// The rewriter routed a function this engine does not intercept
    #[error(transparent)]
    UnknownCall(#[from] UnknownCall),

    /// Re-executing a traced query failed
    #[error("Replay of ledger entry {index} failed: {reason}")]
    Replay { index: usize, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for CacheError {
    fn from(e: toml::de::Error) -> Self {
        CacheError::Config(e.to_string())
    }
}
