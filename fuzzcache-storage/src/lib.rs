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

//! Fuzzcache Storage Layer
//!
//! Cross-process state of the query cache: the Shared Store holding cached
//! result sets and the Validity Index deciding which of them may be served.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fuzzcache_core::CacheConfig;
//! use fuzzcache_storage::SharedStore;
//!
//! let config = CacheConfig::default();
//! let store = SharedStore::open(&config)?;
//! store.put(0x1234, b"rows", config.ttl_ms);
//! ```

pub mod envelope;
pub mod mmap;
pub mod segment;
pub mod shared_store;
pub mod validity;

pub use envelope::{now_millis, Envelope, EnvelopeError, ENVELOPE_MAGIC, ENVELOPE_VERSION};
pub use mmap::{MmapSegments, LOCK_SLOTS};
pub use segment::{MemorySegments, SegmentBackend, SegmentKey, SegmentLock};
pub use shared_store::SharedStore;
pub use validity::ValidityIndex;
