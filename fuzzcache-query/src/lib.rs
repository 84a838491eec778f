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

//! Fuzzcache query layer
//!
//! Turns intercepted MySQL client calls into cache lookups and replays:
//!
//! - [`Dispatcher`]: records every call and decides between cache and replay
//! - [`ReplayEngine`]: rebuilds the connection context of a traced query and
//!   re-executes it
//! - [`Connector`]: the seam to the real database, with [`SqliteConnector`]
//!   as a file-backed stand-in

pub mod backend;
pub mod dispatch;
pub mod replay;
pub mod sqlite;
pub mod stats;

pub use backend::{BackendError, ConnectArgs, Connection, Connector};
pub use dispatch::{Dispatcher, Reply};
pub use replay::ReplayEngine;
pub use sqlite::{SqliteConnector, DEFAULT_DATABASE};
pub use stats::DispatchStats;
