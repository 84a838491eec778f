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

//! Fuzzcache Core
//!
//! Process-local building blocks of the query cache: the call ledger, the
//! handle codec, query fingerprinting and the shared data model.

pub mod call;
pub mod config;
pub mod error;
pub mod escape;
pub mod fingerprint;
pub mod handle;
pub mod ledger;
pub mod result_set;

pub use call::{Arg, CallKind, UnknownCall};
pub use config::{CacheConfig, ConsistencyMode, DEFAULT_INDEX_KEY, DEFAULT_SEGMENT_DIR};
pub use error::{CacheError, Result};
pub use escape::{escape_string, ESCAPE_TABLE};
pub use fingerprint::{
    is_database_selection, query_key, table_name, table_of, Fingerprint, QueryKey, StatementKind,
    TableKey,
};
pub use handle::{decode, encode, Handle, HANDLE_MASK};
pub use ledger::{Ledger, TraceEntry, LEDGER_CAPACITY};
pub use result_set::{ResultSet, SqlValue};
