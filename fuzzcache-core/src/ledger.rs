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

//! Call-Trace Ledger
//!
//! Process-local, append-only record of every intercepted call. Entry `i` is
//! always addressed by `Handle::for_index(i)`, which is what lets a later fetch
//! or replay find the originating query and connection.

use crate::call::{Arg, CallKind};
use crate::error::{CacheError, Result};
use crate::handle::Handle;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

/// One intercepted call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub kind: CallKind,
    pub args: Vec<Arg>,
    pub handle: Handle,
}

impl TraceEntry {
    /// Argument at `position`, or `MissingArgument`
    pub fn arg(&self, position: usize) -> Result<&Arg> {
        self.args.get(position).ok_or(CacheError::MissingArgument {
            kind: self.kind,
            position,
        })
    }

    /// Text argument at `position`
    pub fn text_arg(&self, position: usize) -> Result<&str> {
        self.arg(position)?
            .as_text()
            .ok_or(CacheError::InvalidArgument {
                kind: self.kind,
                position,
                expected: "a string",
            })
    }

    /// Handle argument at `position`
    pub fn handle_arg(&self, position: usize) -> Result<Handle> {
        self.arg(position)?
            .as_handle()
            .ok_or(CacheError::InvalidArgument {
                kind: self.kind,
                position,
                expected: "a handle",
            })
    }
}

/// Entries a ledger can hold while every handle stays in the handle range
pub const LEDGER_CAPACITY: usize = 0x1_0000;

/// Append-only call ledger owned by a single process
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    entries: Vec<TraceEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call and return the handle addressing it
    ///
    /// Fails with `LedgerFull` once [`LEDGER_CAPACITY`] entries are recorded;
    /// handles never wrap or repeat.
    pub fn record(&mut self, kind: CallKind, args: Vec<Arg>) -> Result<Handle> {
        let len = self.entries.len();
        if len >= LEDGER_CAPACITY {
            return Err(CacheError::LedgerFull {
                capacity: LEDGER_CAPACITY,
            });
        }
        let handle = Handle::for_index(len as u32);
        self.entries.push(TraceEntry { kind, args, handle });
        Ok(handle)
    }

    /// Entry at `index`
    pub fn entry_at(&self, index: usize) -> Result<&TraceEntry> {
        self.entries.get(index).ok_or(CacheError::IndexOutOfRange {
            index,
            len: self.entries.len(),
        })
    }

    /// Decode `handle` and return the ledger position with its entry
    pub fn resolve(&self, handle: Handle) -> Result<(usize, &TraceEntry)> {
        let index = handle.index() as usize;
        self.entry_at(index).map(|entry| (index, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Render the ledger, one `index: function(args)@handle` line per entry
    pub fn dump(&self, header: &str) -> String {
        let mut out = String::from("-----\n");
        out.push_str(header);
        out.push_str("\n----\n");
        for (i, entry) in self.entries.iter().enumerate() {
            let args: Vec<String> = entry.args.iter().map(ToString::to_string).collect();
            let _ = writeln!(
                out,
                "{}: {}({})@{}",
                i,
                entry.kind,
                args.join(","),
                entry.handle
            );
        }
        out
    }

    /// Append [`Ledger::dump`] to a log file
    pub fn dump_to_file(&self, path: &Path, header: &str) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(self.dump(header).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_args() -> Vec<Arg> {
        vec!["localhost".into(), "root".into(), "secret".into(), "app".into()]
    }

    #[test]
    fn test_record_returns_encoded_position() {
        let mut ledger = Ledger::new();
        let h0 = ledger.record(CallKind::Connect, connect_args()).unwrap();
        let h1 = ledger.record(CallKind::Query, vec![h0.into(), "SELECT 1".into()]).unwrap();

        assert_eq!(h0, Handle::for_index(0));
        assert_eq!(h1, Handle::for_index(1));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.last().unwrap().handle, h1);
    }

    #[test]
    fn test_record_stops_at_capacity() {
        let mut ledger = Ledger::new();
        for _ in 0..LEDGER_CAPACITY {
            ledger.record(CallKind::Close, vec![]).unwrap();
        }
        let last = ledger.last().unwrap().handle;
        assert!(Handle::in_handle_range(last.raw()));
        assert_eq!(last.index() as usize, LEDGER_CAPACITY - 1);

        let err = ledger.record(CallKind::Close, vec![]).unwrap_err();
        assert!(matches!(err, CacheError::LedgerFull { capacity: LEDGER_CAPACITY }));
        assert_eq!(ledger.len(), LEDGER_CAPACITY);
    }

    #[test]
    fn test_resolve_handle() {
        let mut ledger = Ledger::new();
        let conn = ledger.record(CallKind::Connect, connect_args()).unwrap();
        let query = ledger.record(CallKind::Query, vec![conn.into(), "SELECT 1".into()]).unwrap();

        let (index, entry) = ledger.resolve(query).unwrap();
        assert_eq!(index, 1);
        assert_eq!(entry.kind, CallKind::Query);
        assert_eq!(entry.handle_arg(0).unwrap(), conn);
        assert_eq!(entry.text_arg(1).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_out_of_range() {
        let mut ledger = Ledger::new();
        ledger.record(CallKind::Connect, connect_args()).unwrap();

        let err = ledger.entry_at(5).unwrap_err();
        assert!(matches!(err, CacheError::IndexOutOfRange { index: 5, len: 1 }));

        // A raw integer that was never produced by the codec
        assert!(ledger.resolve(Handle::from_raw(12)).is_err());
    }

    #[test]
    fn test_argument_errors() {
        let mut ledger = Ledger::new();
        ledger.record(CallKind::Query, vec![Arg::Int(1)]).unwrap();
        let entry = ledger.entry_at(0).unwrap();

        assert!(matches!(
            entry.text_arg(1),
            Err(CacheError::MissingArgument { position: 1, .. })
        ));
        assert!(matches!(
            entry.text_arg(0),
            Err(CacheError::InvalidArgument { position: 0, .. })
        ));
    }

    #[test]
    fn test_dump_format() {
        let mut ledger = Ledger::new();
        let conn = ledger.record(CallKind::Connect, connect_args()).unwrap();
        ledger.record(CallKind::Query, vec![conn.into(), "SELECT 1".into()]).unwrap();

        let dump = ledger.dump("replay");
        assert!(dump.contains("0: mysqli_connect(localhost,root,secret,app)@ffff0000"));
        assert!(dump.contains("1: mysqli_query(4294901760,SELECT 1)@ffff0001"));
    }

    #[test]
    fn test_dump_to_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let mut ledger = Ledger::new();
        ledger.record(CallKind::Connect, connect_args()).unwrap();

        ledger.dump_to_file(&path, "first").unwrap();
        ledger.dump_to_file(&path, "second").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("0: mysqli_connect").count(), 2);
    }
}
