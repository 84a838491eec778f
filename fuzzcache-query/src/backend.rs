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

//! Database backend seam
//!
//! Replay never keeps a live connection between intercepted calls: it opens a
//! fresh one from the traced CONNECT arguments, runs what it needs and closes
//! it. [`Connector`] is everything the engine asks of the real database.

use fuzzcache_core::{Arg, ResultSet};
use thiserror::Error;

/// Errors reported by a database backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    #[error("Query failed: {0}")]
    Query(String),
}

/// Arguments of a traced `mysqli_connect(host, user, password, database, port, socket)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectArgs {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub port: Option<u16>,
    pub socket: Option<String>,
}

impl ConnectArgs {
    /// Decode positional CONNECT arguments; missing or null positions stay unset
    pub fn from_args(args: &[Arg]) -> Self {
        let text = |i: usize| {
            args.get(i)
                .and_then(Arg::as_text)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            host: text(0),
            user: text(1),
            password: text(2),
            database: text(3),
            port: args
                .get(4)
                .and_then(Arg::as_int)
                .and_then(|p| u16::try_from(p).ok()),
            socket: text(5),
        }
    }
}

/// A live connection opened for one replay
pub trait Connection {
    /// Switch the active database
    fn select_db(&mut self, database: &str) -> Result<(), BackendError>;

    /// Run a statement and collect its full outcome
    fn query(&mut self, sql: &str) -> Result<ResultSet, BackendError>;

    /// Release the connection
    fn close(self: Box<Self>) {}
}

/// Opens connections to the real database
pub trait Connector: Send + Sync {
    fn connect(&self, args: &ConnectArgs) -> Result<Box<dyn Connection>, BackendError>;
}
