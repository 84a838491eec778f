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

//! Dispatch statistics

use serde::{Deserialize, Serialize};

/// Counters kept by a dispatcher over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Intercepted calls, escapes included
    pub calls: u64,
    /// Reads answered from the cache
    pub hits: u64,
    /// Reads that had to be refilled
    pub misses: u64,
    /// Queries re-executed against the backend
    pub replays: u64,
    /// Writes that cleared a table's validity bits
    pub invalidations: u64,
    /// Cache fills the shared store refused
    pub store_failures: u64,
}

impl DispatchStats {
    /// Fraction of cacheable reads served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
