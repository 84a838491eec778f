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

//! Handle Codec
//!
//! Ledger indices are handed back to the instrumented application as integers
//! that look like native resource handles. The transform is a plain XOR with
//! [`HANDLE_MASK`], so encoding and decoding are the same operation and any
//! handle the application passes back maps straight to a ledger position.
//!
//! The mask sits far above any index a single request will ever produce, which
//! keeps encoded handles in `[HANDLE_MASK, u32::MAX]` and distinguishable from
//! ordinary integers flowing through the same call sites.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed 32-bit mask applied to ledger indices
pub const HANDLE_MASK: u32 = 0xFFFF_0000;

/// Opaque integer standing in for a connection or result resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u32);

impl Handle {
    /// Wrap a raw value received from a call site
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw integer seen by the application
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Ledger index this handle points at
    pub const fn index(self) -> u32 {
        decode(self.0)
    }

    /// Handle for the given ledger index
    pub const fn for_index(index: u32) -> Self {
        Self(encode(index))
    }

    /// Whether the raw value falls in the range produced by [`encode`] for
    /// indices below `0x1_0000`, the ledger's capacity
    pub const fn in_handle_range(raw: u32) -> bool {
        raw >= HANDLE_MASK
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl From<Handle> for u32 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

/// Encode a ledger index as a handle value
#[inline]
pub const fn encode(index: u32) -> u32 {
    index ^ HANDLE_MASK
}

/// Decode a handle value back to its ledger index
#[inline]
pub const fn decode(handle: u32) -> u32 {
    handle ^ HANDLE_MASK
}
