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

//! Query fingerprinting
//!
//! Derives the (table, query) address of a statement from its raw text. This
//! is a pattern heuristic, not a parser: joins, subqueries and quoted
//! identifiers may be attributed to the wrong table, which costs cache
//! precision but never correctness since a miss always replays.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// How a statement interacts with the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// Reads rows from a table, cacheable
    Read,
    /// Modifies a table, invalidates every cached read on it
    Write,
    /// No table could be extracted
    None,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Read => f.write_str("READ"),
            StatementKind::Write => f.write_str("WRITE"),
            StatementKind::None => f.write_str("NONE"),
        }
    }
}

/// Hash of a table name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableKey(pub u32);

/// Hash of the exact query text, doubles as the cache slot key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(pub u32);

impl TableKey {
    pub fn of(table: &str) -> Self {
        Self(crc32fast::hash(table.as_bytes()))
    }
}

impl QueryKey {
    pub fn of(sql: &str) -> Self {
        Self(crc32fast::hash(sql.as_bytes()))
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

struct TablePattern {
    regex: Regex,
    kind: StatementKind,
}

/// Patterns in match priority order; writes are tried before the bare `FROM`
fn table_patterns() -> &'static [TablePattern] {
    static PATTERNS: OnceLock<Vec<TablePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)UPDATE\s+(\w+)\s+SET", StatementKind::Write),
            (r"(?i)INSERT\s+INTO\s+(\w+)", StatementKind::Write),
            (r"(?i)REPLACE\s+INTO\s+(\w+)", StatementKind::Write),
            (r"(?i)DELETE\s+FROM\s+(\w+)", StatementKind::Write),
            (r"(?i)FROM\s+(\w+)", StatementKind::Read),
        ]
        .into_iter()
        .map(|(pattern, kind)| TablePattern {
            regex: Regex::new(pattern).expect("static pattern compiles"),
            kind,
        })
        .collect()
    })
}

/// Extract the table name a statement targets along with its kind
pub fn table_name(sql: &str) -> Option<(StatementKind, &str)> {
    table_patterns().iter().find_map(|p| {
        p.regex
            .captures(sql)
            .and_then(|caps| caps.get(1))
            .map(|m| (p.kind, m.as_str()))
    })
}

/// Classify a statement and hash its table name
pub fn table_of(sql: &str) -> (StatementKind, Option<TableKey>) {
    match table_name(sql) {
        Some((kind, table)) => (kind, Some(TableKey::of(table))),
        None => (StatementKind::None, None),
    }
}

/// Cache slot key for a statement
pub fn query_key(sql: &str) -> QueryKey {
    QueryKey::of(sql)
}

/// Full cache address of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub kind: StatementKind,
    pub table: Option<TableKey>,
    pub query: QueryKey,
}

impl Fingerprint {
    pub fn of(sql: &str) -> Self {
        let (kind, table) = table_of(sql);
        Self {
            kind,
            table,
            query: query_key(sql),
        }
    }
}

/// Whether a statement switches the active database (`USE <db>`)
pub fn is_database_selection(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    trimmed
        .get(..4)
        .is_some_and(|head| head.eq_ignore_ascii_case("USE "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_is_read() {
        assert_eq!(
            table_of("SELECT * FROM posts WHERE id=1"),
            (StatementKind::Read, Some(TableKey::of("posts")))
        );
    }

    #[test]
    fn test_update_is_write() {
        assert_eq!(
            table_of("UPDATE posts SET title='x'"),
            (StatementKind::Write, Some(TableKey::of("posts")))
        );
    }

    #[test]
    fn test_no_table() {
        assert_eq!(table_of("SHOW TABLES"), (StatementKind::None, None));
        assert_eq!(table_of("USE db2"), (StatementKind::None, None));
    }

    #[test]
    fn test_other_writes() {
        assert_eq!(
            table_of("INSERT INTO comments (body) VALUES ('hi')"),
            (StatementKind::Write, Some(TableKey::of("comments")))
        );
        assert_eq!(
            table_of("delete from comments where id = 3"),
            (StatementKind::Write, Some(TableKey::of("comments")))
        );
        assert_eq!(
            table_of("REPLACE INTO options VALUES (1, 'a')"),
            (StatementKind::Write, Some(TableKey::of("options")))
        );
    }

    #[test]
    fn test_update_wins_over_from() {
        let sql = "UPDATE posts SET views = (SELECT COUNT(*) FROM hits)";
        assert_eq!(table_name(sql), Some((StatementKind::Write, "posts")));
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(
            table_name("select id from Users"),
            Some((StatementKind::Read, "Users"))
        );
    }

    #[test]
    fn test_query_key_is_text_sensitive() {
        let a = query_key("SELECT * FROM posts");
        let b = query_key("SELECT *  FROM posts");
        assert_ne!(a, b);
        assert_eq!(a, query_key("SELECT * FROM posts"));
    }

    #[test]
    fn test_table_key_is_crc32() {
        assert_eq!(TableKey::of("posts").0, crc32fast::hash(b"posts"));
    }

    #[test]
    fn test_fingerprint() {
        let fp = Fingerprint::of("SELECT name FROM users");
        assert_eq!(fp.kind, StatementKind::Read);
        assert_eq!(fp.table, Some(TableKey::of("users")));
        assert_eq!(fp.query, QueryKey::of("SELECT name FROM users"));
    }

    #[test]
    fn test_database_selection() {
        assert!(is_database_selection("USE db2"));
        assert!(is_database_selection("  use shop"));
        assert!(!is_database_selection("SELECT * FROM users"));
        assert!(!is_database_selection("USER"));
        assert!(!is_database_selection(""));
    }
}
