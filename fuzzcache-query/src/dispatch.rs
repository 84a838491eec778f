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

//! Dispatch
//!
//! Single entry point for rewritten call sites. Every call except the string
//! escape is recorded in the ledger first; what happens next depends on the
//! call kind:
//!
//! - `CONNECT` hands back its own handle, nothing is opened
//! - `QUERY` reads consult the validity index and refill on a miss; writes
//!   replay and clear every bit under their table; anything else replays
//!   uncached
//! - fetches resolve the query behind their result handle, from the cache when
//!   its bit is set and by replay otherwise; a write's handle yields the outcome
//!   recorded when the write ran, it is never executed twice
//! - close and error calls return fixed placeholders, there is no live
//!   resource behind any handle

use crate::backend::Connector;
use crate::replay::ReplayEngine;
use crate::stats::DispatchStats;
use fuzzcache_core::{
    escape_string, Arg, CacheConfig, CacheError, CallKind, Fingerprint, Handle, Ledger, QueryKey,
    ResultSet, Result, SqlValue, StatementKind, TableKey,
};
use fuzzcache_storage::SharedStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Value returned to the rewritten call site
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Reply {
    /// Stand-in for a connection or result resource
    Handle(Handle),
    Bool(bool),
    Text(String),
    /// Every row of a result set
    Rows(ResultSet),
    /// Every row as `(column, value)` pairs
    Assoc(Vec<Vec<(String, SqlValue)>>),
    Count(usize),
    Lengths(Vec<u64>),
}

impl Reply {
    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            Reply::Handle(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_rows(&self) -> Option<&ResultSet> {
        match self {
            Reply::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}

/// Per-process dispatch context: the ledger plus handles on shared state
pub struct Dispatcher {
    ledger: Ledger,
    store: SharedStore,
    replay: ReplayEngine,
    index_key: u32,
    ttl_ms: u64,
    stats: DispatchStats,
    /// Outcomes of writes this process ran, by ledger index
    write_outcomes: HashMap<usize, ResultSet>,
}

impl Dispatcher {
    pub fn new(store: SharedStore, connector: Arc<dyn Connector>, config: &CacheConfig) -> Self {
        Self {
            ledger: Ledger::new(),
            store,
            replay: ReplayEngine::new(connector).with_trace_log(config.trace_log.clone()),
            index_key: config.index_key,
            ttl_ms: config.ttl_ms,
            stats: DispatchStats::default(),
            write_outcomes: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Dispatch a call by its client library function name
    pub fn dispatch_named(&mut self, function: &str, args: Vec<Arg>) -> Result<Reply> {
        let kind: CallKind = function.parse()?;
        self.dispatch(kind, args)
    }

    /// Record an intercepted call and produce its reply
    pub fn dispatch(&mut self, kind: CallKind, args: Vec<Arg>) -> Result<Reply> {
        self.stats.calls += 1;

        match kind {
            CallKind::RealEscapeString => escape(&args).map(Reply::Text),
            CallKind::Connect => self.ledger.record(kind, args).map(Reply::Handle),
            CallKind::Query => {
                let handle = self.ledger.record(kind, args)?;
                self.query(handle.index() as usize)?;
                Ok(Reply::Handle(handle))
            }
            CallKind::SelectDb | CallKind::Close => {
                self.ledger.record(kind, args)?;
                Ok(Reply::Bool(true))
            }
            CallKind::Error | CallKind::ConnectError => {
                self.ledger.record(kind, args)?;
                Ok(Reply::Text(String::new()))
            }
            CallKind::FetchLengths => {
                self.ledger.record(kind, args)?;
                Ok(Reply::Lengths(vec![0]))
            }
            CallKind::NumRows => {
                let rows = self.fetch(kind, args)?;
                Ok(Reply::Count(rows.num_rows()))
            }
            CallKind::FetchAssoc => {
                let rows = self.fetch(kind, args)?;
                Ok(Reply::Assoc(rows.into_assoc_rows()))
            }
            CallKind::FetchArray | CallKind::FetchRow | CallKind::FetchAll => {
                self.fetch(kind, args).map(Reply::Rows)
            }
        }
    }

    fn fetch(&mut self, kind: CallKind, args: Vec<Arg>) -> Result<ResultSet> {
        let handle = self.ledger.record(kind, args)?;
        self.resolve_rows(handle.index() as usize)
    }

    fn query(&mut self, query_index: usize) -> Result<()> {
        let fingerprint = Fingerprint::of(self.ledger.entry_at(query_index)?.text_arg(1)?);

        match (fingerprint.kind, fingerprint.table) {
            (StatementKind::Read, Some(table)) => {
                let index = self.store.load_index(self.index_key);
                if index.is_valid(table, fingerprint.query) {
                    // Rows are pulled from the store when a fetch asks for them
                    debug!(query_index, query = %fingerprint.query, "query: valid cache");
                    self.stats.hits += 1;
                } else {
                    debug!(query_index, query = %fingerprint.query, "query: invalid cache");
                    self.stats.misses += 1;
                    let generation = index.generation(table);
                    self.fill(query_index, table, fingerprint.query, generation)?;
                }
            }
            (StatementKind::Write, Some(table)) => {
                let outcome = self.run_replay(query_index)?;
                self.store_outcome(fingerprint.query, &outcome);
                self.write_outcomes.insert(query_index, outcome);
                let cleared = self
                    .store
                    .update_index(self.index_key, |index| index.clear_table(table));
                self.stats.invalidations += 1;
                debug!(query_index, table = %table, cleared, "query: write invalidated table");
            }
            _ => {
                debug!(query_index, "query: uncached");
                self.run_replay(query_index)?;
            }
        }
        Ok(())
    }

    /// Rows of the query behind the result handle in the fetch at `fetch_index`
    fn resolve_rows(&mut self, fetch_index: usize) -> Result<ResultSet> {
        let fetch = self.ledger.entry_at(fetch_index)?;
        let fetch_kind = fetch.kind;
        let (query_index, query) = self.ledger.resolve(fetch.handle_arg(0)?)?;
        if query.kind != CallKind::Query {
            return Err(CacheError::InvalidArgument {
                kind: fetch_kind,
                position: 0,
                expected: "a result handle",
            });
        }
        let fingerprint = Fingerprint::of(query.text_arg(1)?);

        match (fingerprint.kind, fingerprint.table) {
            (StatementKind::Read, Some(table)) => {
                let index = self.store.load_index(self.index_key);
                if index.is_valid(table, fingerprint.query) {
                    if let Some(rows) = self.store.get_value::<ResultSet>(fingerprint.query.0) {
                        debug!(fetch_index, query = %fingerprint.query, "fetch: valid sql cached");
                        self.stats.hits += 1;
                        return Ok(rows);
                    }
                    debug!(fetch_index, query = %fingerprint.query, "fetch: valid bit but no entry");
                }
                debug!(fetch_index, query = %fingerprint.query, "fetch: invalid sql, replaying");
                self.stats.misses += 1;
                let generation = index.generation(table);
                self.fill(query_index, table, fingerprint.query, generation)
            }
            // A write ran exactly once, when its query call was dispatched
            (StatementKind::Write, Some(_)) => self
                .write_outcomes
                .get(&query_index)
                .cloned()
                .ok_or_else(|| CacheError::Replay {
                    index: query_index,
                    reason: "write did not complete, no outcome to fetch".into(),
                }),
            _ => self.run_replay(query_index),
        }
    }

    /// Replay a read, cache its rows and mark them valid
    ///
    /// `generation` is the table's generation seen before the replay. If a
    /// write cleared the table since, the rows may predate it and the bit
    /// stays unset.
    fn fill(
        &mut self,
        query_index: usize,
        table: TableKey,
        query: QueryKey,
        generation: u64,
    ) -> Result<ResultSet> {
        let rows = self.run_replay(query_index)?;
        if self.store_outcome(query, &rows) {
            let marked = self.store.update_index(self.index_key, |index| {
                index.set_valid_at(table, query, generation)
            });
            if !marked {
                debug!(query_index, table = %table, "fill: table written during replay, left invalid");
            }
        }
        Ok(rows)
    }

    fn store_outcome(&mut self, query: QueryKey, outcome: &ResultSet) -> bool {
        let stored = self.store.put_value(query.0, outcome, self.ttl_ms);
        if !stored {
            self.stats.store_failures += 1;
        }
        stored
    }

    fn run_replay(&mut self, query_index: usize) -> Result<ResultSet> {
        self.stats.replays += 1;
        self.replay.replay(&self.ledger, query_index)
    }
}

/// `real_escape_string(conn, text)` is a pure transform, it never reaches the ledger
fn escape(args: &[Arg]) -> Result<String> {
    let kind = CallKind::RealEscapeString;
    let raw = args
        .get(1)
        .ok_or(CacheError::MissingArgument { kind, position: 1 })?
        .as_text()
        .ok_or(CacheError::InvalidArgument {
            kind,
            position: 1,
            expected: "a string",
        })?;
    Ok(escape_string(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ConnectArgs, Connection};
    use fuzzcache_core::ConsistencyMode;
    use fuzzcache_storage::MemorySegments;
    use parking_lot::Mutex;

    /// Backend answering every statement with a single row echoing it
    #[derive(Default)]
    struct Echo {
        statements: Arc<Mutex<Vec<String>>>,
    }

    struct EchoConnection {
        statements: Arc<Mutex<Vec<String>>>,
    }

    impl Connector for Echo {
        fn connect(&self, _args: &ConnectArgs) -> std::result::Result<Box<dyn Connection>, BackendError> {
            Ok(Box::new(EchoConnection {
                statements: Arc::clone(&self.statements),
            }))
        }
    }

    impl Connection for EchoConnection {
        fn select_db(&mut self, _database: &str) -> std::result::Result<(), BackendError> {
            Ok(())
        }

        fn query(&mut self, sql: &str) -> std::result::Result<ResultSet, BackendError> {
            self.statements.lock().push(sql.to_string());
            Ok(ResultSet::new(vec!["sql".into()], vec![vec![SqlValue::from(sql)]]))
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<Mutex<Vec<String>>>) {
        let echo = Echo::default();
        let statements = Arc::clone(&echo.statements);
        let store = SharedStore::in_memory(ConsistencyMode::BestEffort);
        let config = CacheConfig::default();
        (Dispatcher::new(store, Arc::new(echo), &config), statements)
    }

    fn connect(d: &mut Dispatcher) -> Handle {
        d.dispatch(
            CallKind::Connect,
            vec!["localhost".into(), "root".into(), "".into(), "app".into()],
        )
        .unwrap()
        .as_handle()
        .unwrap()
    }

    fn query(d: &mut Dispatcher, conn: Handle, sql: &str) -> Handle {
        d.dispatch(CallKind::Query, vec![conn.into(), sql.into()])
            .unwrap()
            .as_handle()
            .unwrap()
    }

    #[test]
    fn test_connect_returns_own_handle() {
        let (mut d, statements) = dispatcher();
        let conn = connect(&mut d);
        assert_eq!(conn, Handle::for_index(0));
        assert!(statements.lock().is_empty());
    }

    #[test]
    fn test_read_miss_then_fetch_hits() {
        let (mut d, statements) = dispatcher();
        let conn = connect(&mut d);
        let result = query(&mut d, conn, "SELECT * FROM posts");
        assert_eq!(d.stats().misses, 1);
        assert_eq!(statements.lock().len(), 1);

        let rows = d.dispatch(CallKind::FetchAll, vec![result.into()]).unwrap();
        assert_eq!(
            rows.as_rows().unwrap().rows,
            vec![vec![SqlValue::from("SELECT * FROM posts")]]
        );
        assert_eq!(d.stats().hits, 1);
        assert_eq!(statements.lock().len(), 1);
    }

    #[test]
    fn test_second_identical_read_hits() {
        let (mut d, statements) = dispatcher();
        let conn = connect(&mut d);
        query(&mut d, conn, "SELECT * FROM posts WHERE id=1");
        query(&mut d, conn, "SELECT * FROM posts WHERE id=1");

        assert_eq!(statements.lock().len(), 1);
        assert_eq!(d.stats().replays, 1);
        assert_eq!(d.stats().hits, 1);
    }

    #[test]
    fn test_write_invalidates_table() {
        let (mut d, statements) = dispatcher();
        let conn = connect(&mut d);
        query(&mut d, conn, "SELECT * FROM posts");
        query(&mut d, conn, "SELECT * FROM users");

        query(&mut d, conn, "UPDATE posts SET title='x'");
        assert_eq!(d.stats().invalidations, 1);

        let index = d.store().load_index(d.index_key);
        assert!(!index.is_valid(TableKey::of("posts"), QueryKey::of("SELECT * FROM posts")));
        assert!(index.is_valid(TableKey::of("users"), QueryKey::of("SELECT * FROM users")));

        query(&mut d, conn, "SELECT * FROM posts");
        assert_eq!(
            *statements.lock(),
            vec![
                "SELECT * FROM posts",
                "SELECT * FROM users",
                "UPDATE posts SET title='x'",
                "SELECT * FROM posts",
            ]
        );
    }

    #[test]
    fn test_uncached_statement_always_replays() {
        let (mut d, statements) = dispatcher();
        let conn = connect(&mut d);
        let result = query(&mut d, conn, "SHOW TABLES");
        d.dispatch(CallKind::FetchAll, vec![result.into()]).unwrap();

        assert_eq!(statements.lock().len(), 2);
        assert!(d.store().load_index(d.index_key).is_empty());
    }

    #[test]
    fn test_num_rows() {
        let (mut d, _) = dispatcher();
        let conn = connect(&mut d);
        let result = query(&mut d, conn, "SELECT * FROM posts");
        let count = d.dispatch(CallKind::NumRows, vec![result.into()]).unwrap();
        assert_eq!(count, Reply::Count(1));
    }

    #[test]
    fn test_fetch_on_write_does_not_rerun_it() {
        let (mut d, statements) = dispatcher();
        let conn = connect(&mut d);
        let result = query(&mut d, conn, "INSERT INTO posts (title) VALUES ('a')");
        d.dispatch(CallKind::NumRows, vec![result.into()]).unwrap();

        assert_eq!(statements.lock().len(), 1);
    }

    #[test]
    fn test_fetch_on_write_without_shared_copy() {
        let segments = Arc::new(MemorySegments::new());
        segments.fail_writes(true);
        let echo = Echo::default();
        let statements = Arc::clone(&echo.statements);
        let store = SharedStore::new(segments, ConsistencyMode::BestEffort);
        let mut d = Dispatcher::new(store, Arc::new(echo), &CacheConfig::default());

        let conn = connect(&mut d);
        let result = query(&mut d, conn, "INSERT INTO posts (title) VALUES ('a')");
        let count = d.dispatch_named("mysqli_num_rows", vec![result.into()]).unwrap();
        d.dispatch(CallKind::FetchAll, vec![result.into()]).unwrap();

        assert_eq!(count, Reply::Count(1));
        assert_eq!(statements.lock().len(), 1);
        assert_eq!(d.stats().replays, 1);
    }

    #[test]
    fn test_fetch_assoc_pairs_columns() {
        let (mut d, _) = dispatcher();
        let conn = connect(&mut d);
        let result = query(&mut d, conn, "SELECT * FROM posts");
        let reply = d.dispatch(CallKind::FetchAssoc, vec![result.into()]).unwrap();
        assert_eq!(
            reply,
            Reply::Assoc(vec![vec![("sql".to_string(), SqlValue::from("SELECT * FROM posts"))]])
        );
    }

    #[test]
    fn test_fill_skips_bit_after_concurrent_clear() {
        let (mut d, _) = dispatcher();
        let conn = connect(&mut d);
        let table = TableKey::of("posts");
        let seen = d.store().load_index(d.index_key).generation(table);
        let result = query(&mut d, conn, "SHOW TABLES");

        // Another worker clears the table between our generation read and the fill
        d.store().update_index(d.index_key, |index| index.clear_table(table));
        let query_key = QueryKey::of("SELECT * FROM posts");
        d.fill(result.index() as usize, table, query_key, seen).unwrap();

        assert!(!d.store().load_index(d.index_key).is_valid(table, query_key));
    }

    #[test]
    fn test_placeholders() {
        let (mut d, statements) = dispatcher();
        let conn = connect(&mut d);

        assert_eq!(d.dispatch(CallKind::Close, vec![conn.into()]).unwrap(), Reply::Bool(true));
        assert_eq!(
            d.dispatch(CallKind::Error, vec![conn.into()]).unwrap(),
            Reply::Text(String::new())
        );
        assert_eq!(
            d.dispatch(CallKind::FetchLengths, vec![conn.into()]).unwrap(),
            Reply::Lengths(vec![0])
        );
        assert_eq!(
            d.dispatch(CallKind::SelectDb, vec![conn.into(), "other".into()]).unwrap(),
            Reply::Bool(true)
        );
        assert!(statements.lock().is_empty());
        assert_eq!(d.ledger().len(), 5);
    }

    #[test]
    fn test_escape_string() {
        let (mut d, statements) = dispatcher();
        let conn = connect(&mut d);
        let reply = d
            .dispatch_named("mysqli_real_escape_string", vec![conn.into(), "it's".into()])
            .unwrap();
        assert_eq!(reply, Reply::Text("it\\'s".into()));
        assert!(statements.lock().is_empty());
        assert_eq!(d.ledger().len(), 1);

        let next = query(&mut d, conn, "SHOW TABLES");
        assert_eq!(next, Handle::for_index(1));
    }

    #[test]
    fn test_escape_string_needs_text() {
        let (mut d, _) = dispatcher();
        let err = d
            .dispatch(CallKind::RealEscapeString, vec![Arg::Null])
            .unwrap_err();
        assert!(matches!(err, CacheError::MissingArgument { position: 1, .. }));
    }

    #[test]
    fn test_unknown_function() {
        let (mut d, _) = dispatcher();
        let err = d.dispatch_named("mysqli_multi_query", vec![]).unwrap_err();
        assert!(matches!(err, CacheError::UnknownCall(_)));
        assert!(d.ledger().is_empty());
    }

    #[test]
    fn test_fetch_with_bad_handle() {
        let (mut d, _) = dispatcher();
        connect(&mut d);
        let err = d
            .dispatch(CallKind::FetchAssoc, vec![Arg::from(Handle::for_index(99))])
            .unwrap_err();
        assert!(matches!(err, CacheError::IndexOutOfRange { index: 99, .. }));
    }

    #[test]
    fn test_fetch_needs_query_handle() {
        let (mut d, _) = dispatcher();
        let conn = connect(&mut d);
        let err = d.dispatch(CallKind::FetchRow, vec![conn.into()]).unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument { .. }));
    }

    #[test]
    fn test_store_failure_degrades_to_replay() {
        let segments = Arc::new(MemorySegments::new());
        segments.fail_writes(true);
        let echo = Echo::default();
        let statements = Arc::clone(&echo.statements);
        let store = SharedStore::new(segments, ConsistencyMode::BestEffort);
        let mut d = Dispatcher::new(store, Arc::new(echo), &CacheConfig::default());

        let conn = connect(&mut d);
        let result = query(&mut d, conn, "SELECT * FROM posts");
        let rows = d.dispatch(CallKind::FetchAll, vec![result.into()]).unwrap();

        assert_eq!(rows.as_rows().unwrap().num_rows(), 1);
        assert_eq!(statements.lock().len(), 2);
        assert_eq!(d.stats().store_failures, 2);
        assert_eq!(d.stats().hits, 0);
    }

    #[test]
    fn test_valid_bit_without_entry_refills() {
        let (mut d, statements) = dispatcher();
        let conn = connect(&mut d);
        let result = query(&mut d, conn, "SELECT * FROM posts");
        d.store().clear(QueryKey::of("SELECT * FROM posts").0);

        let rows = d.dispatch(CallKind::FetchAll, vec![result.into()]).unwrap();
        assert_eq!(rows.as_rows().unwrap().num_rows(), 1);
        assert_eq!(statements.lock().len(), 2);
    }

    #[test]
    fn test_reply_json_shape() {
        let json = serde_json::to_string(&Reply::Count(3)).unwrap();
        assert_eq!(json, r#"{"type":"count","value":3}"#);
    }
}
