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

//! SQLite-backed connector
//!
//! Stands in for a MySQL server when running traces locally: every database
//! name maps to `<root>/<name>.sqlite`, and switching databases (`select_db` or
//! `USE <name>`) reopens the connection on the other file.

use crate::backend::{BackendError, ConnectArgs, Connection, Connector};
use fuzzcache_core::{is_database_selection, ResultSet, SqlValue};
use rusqlite::types::ValueRef;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Database used when CONNECT names none
pub const DEFAULT_DATABASE: &str = "main";

/// Connector opening one SQLite file per database name
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    root: PathBuf,
}

impl SqliteConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `database`
    pub fn database_path(&self, database: &str) -> Result<PathBuf, BackendError> {
        if database.is_empty()
            || !database
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            return Err(BackendError::UnknownDatabase(database.to_string()));
        }
        Ok(self.root.join(format!("{database}.sqlite")))
    }

    fn open(&self, database: &str) -> Result<rusqlite::Connection, BackendError> {
        let path = self.database_path(database)?;
        rusqlite::Connection::open(&path)
            .map_err(|e| BackendError::Connect(format!("{}: {}", path.display(), e)))
    }
}

impl Connector for SqliteConnector {
    fn connect(&self, args: &ConnectArgs) -> Result<Box<dyn Connection>, BackendError> {
        let database = args.database.as_deref().unwrap_or(DEFAULT_DATABASE);
        let conn = self.open(database)?;
        debug!(database, "sqlite connection opened");
        Ok(Box::new(SqliteConnection {
            connector: self.clone(),
            conn,
        }))
    }
}

struct SqliteConnection {
    connector: SqliteConnector,
    conn: rusqlite::Connection,
}

fn selected_database(sql: &str) -> &str {
    sql.trim()
        .trim_end_matches(';')
        .get(4..)
        .unwrap_or_default()
        .trim()
        .trim_matches('`')
}

fn to_sql_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Int(v),
        ValueRef::Real(v) => SqlValue::Float(v),
        // TEXT is not guaranteed to be UTF-8, keep such values byte-exact
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => SqlValue::Text(text.to_string()),
            Err(_) => SqlValue::Bytes(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => SqlValue::Bytes(bytes.to_vec()),
    }
}

impl Connection for SqliteConnection {
    fn select_db(&mut self, database: &str) -> Result<(), BackendError> {
        self.conn = self.connector.open(database)?;
        debug!(database, "sqlite database selected");
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet, BackendError> {
        if is_database_selection(sql) {
            let database = selected_database(sql).to_string();
            self.select_db(&database)?;
            return Ok(ResultSet::affected(0));
        }

        let query_err = |e: rusqlite::Error| BackendError::Query(e.to_string());
        let mut stmt = self.conn.prepare(sql).map_err(query_err)?;

        if stmt.column_count() == 0 {
            let affected = stmt.execute([]).map_err(query_err)?;
            return Ok(ResultSet::affected(affected as u64));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query([]).map_err(query_err)?;
        while let Some(row) = cursor.next().map_err(query_err)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(to_sql_value(row.get_ref(i).map_err(query_err)?));
            }
            rows.push(values);
        }
        Ok(ResultSet::new(columns, rows))
    }
}
