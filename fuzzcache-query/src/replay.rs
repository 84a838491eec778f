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

//! Replay Engine
//!
//! Rebuilds the ground-truth result of a traced query from the ledger alone:
//! reconnect with the traced CONNECT arguments, re-apply the most recent
//! database switch made before the query, run the query, close.

use crate::backend::{BackendError, ConnectArgs, Connector};
use fuzzcache_core::{is_database_selection, CacheError, CallKind, Ledger, ResultSet, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Re-executes traced queries against a fresh connection
#[derive(Clone)]
pub struct ReplayEngine {
    connector: Arc<dyn Connector>,
    trace_log: Option<PathBuf>,
}

/// Database switch found before a query
#[derive(Debug, Clone, PartialEq, Eq)]
enum DatabaseSwitch<'a> {
    SelectDb(&'a str),
    UseStatement(&'a str),
}

impl ReplayEngine {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            trace_log: None,
        }
    }

    /// Append a ledger dump to `path` before every replay
    pub fn with_trace_log(mut self, path: Option<PathBuf>) -> Self {
        self.trace_log = path;
        self
    }

    /// Re-execute the query recorded at `query_index`
    pub fn replay(&self, ledger: &Ledger, query_index: usize) -> Result<ResultSet> {
        self.log_trace(ledger, query_index);

        let query = ledger.entry_at(query_index)?;
        if query.kind != CallKind::Query {
            return Err(CacheError::InvalidArgument {
                kind: query.kind,
                position: 0,
                expected: "a handle to a query",
            });
        }
        let sql = query.text_arg(1)?;

        let (connect_index, connect) = ledger.resolve(query.handle_arg(0)?)?;
        if connect.kind != CallKind::Connect || connect_index >= query_index {
            return Err(CacheError::InvalidArgument {
                kind: CallKind::Query,
                position: 0,
                expected: "a handle to an earlier connect",
            });
        }

        let fail = |e: BackendError| CacheError::Replay {
            index: query_index,
            reason: e.to_string(),
        };

        let args = ConnectArgs::from_args(&connect.args);
        let mut conn = self.connector.connect(&args).map_err(fail)?;

        match latest_switch(ledger, connect_index, query_index)? {
            Some(DatabaseSwitch::SelectDb(database)) => {
                debug!(query_index, database, "replaying select_db");
                conn.select_db(database).map_err(fail)?;
            }
            Some(DatabaseSwitch::UseStatement(statement)) => {
                debug!(query_index, statement, "replaying database selection");
                conn.query(statement).map_err(fail)?;
            }
            None => {}
        }

        let result = conn.query(sql).map_err(fail);
        conn.close();
        let result = result?;
        debug!(query_index, rows = result.num_rows(), "replay complete");
        Ok(result)
    }

    fn log_trace(&self, ledger: &Ledger, query_index: usize) {
        if let Some(path) = &self.trace_log {
            let header = format!("replay of entry {query_index}");
            if let Err(e) = ledger.dump_to_file(path, &header) {
                warn!(path = %path.display(), "failed to write trace log: {}", e);
            }
        }
    }
}

/// Most recent database switch strictly between the connect and the query
fn latest_switch(
    ledger: &Ledger,
    connect_index: usize,
    query_index: usize,
) -> Result<Option<DatabaseSwitch<'_>>> {
    for i in (connect_index + 1..query_index).rev() {
        let entry = ledger.entry_at(i)?;
        match entry.kind {
            CallKind::SelectDb => return Ok(Some(DatabaseSwitch::SelectDb(entry.text_arg(1)?))),
            CallKind::Query => {
                if let Some(sql) = entry.arg(1)?.as_text() {
                    if is_database_selection(sql) {
                        return Ok(Some(DatabaseSwitch::UseStatement(sql)));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(None)
}
