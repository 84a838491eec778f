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

//! Validity Index
//!
//! One reserved shared-store entry mapping `table -> query -> valid bit`. It is
//! the only authority on whether a cached result may be served: a bit is set
//! after a cache fill and every bit under a table is cleared by a write to it.
//! A missing or malformed blob reads as an empty index, so every lookup falls
//! through to replay.
//!
//! Each table also carries a generation that every clear bumps. A fill reads
//! the generation before it replays and only sets its bit if no write cleared
//! the table in between, so rows fetched before a concurrent write are never
//! marked valid after it.

use crate::shared_store::{decode_value, SharedStore};
use fuzzcache_core::{QueryKey, TableKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Per-table validity bits for cached queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityIndex {
    tables: BTreeMap<TableKey, BTreeMap<QueryKey, bool>>,
    generations: BTreeMap<TableKey, u64>,
}

impl ValidityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self, table: TableKey, query: QueryKey) -> bool {
        self.tables
            .get(&table)
            .and_then(|queries| queries.get(&query))
            .copied()
            .unwrap_or(false)
    }

    pub fn set_valid(&mut self, table: TableKey, query: QueryKey) {
        self.tables.entry(table).or_default().insert(query, true);
    }

    /// Number of clears `table` has seen
    pub fn generation(&self, table: TableKey) -> u64 {
        self.generations.get(&table).copied().unwrap_or(0)
    }

    /// Set the bit only if `table` is still at `generation`
    pub fn set_valid_at(&mut self, table: TableKey, query: QueryKey, generation: u64) -> bool {
        if self.generation(table) != generation {
            return false;
        }
        self.set_valid(table, query);
        true
    }

    /// Clear every bit under `table` and bump its generation, returning how
    /// many bits were set
    pub fn clear_table(&mut self, table: TableKey) -> usize {
        let next = self.generation(table).wrapping_add(1);
        self.generations.insert(table, next);

        let Some(queries) = self.tables.get_mut(&table) else {
            return 0;
        };
        let mut cleared = 0;
        for bit in queries.values_mut() {
            if *bit {
                cleared += 1;
            }
            *bit = false;
        }
        cleared
    }

    /// Queries tracked under `table`, with their bits
    pub fn queries(&self, table: TableKey) -> impl Iterator<Item = (QueryKey, bool)> + '_ {
        self.tables
            .get(&table)
            .into_iter()
            .flat_map(|queries| queries.iter().map(|(q, bit)| (*q, *bit)))
    }

    pub fn tables(&self) -> impl Iterator<Item = TableKey> + '_ {
        self.tables.keys().copied()
    }

    /// Number of set bits
    pub fn valid_count(&self) -> usize {
        self.tables
            .values()
            .flat_map(|queries| queries.values())
            .filter(|bit| **bit)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl SharedStore {
    /// Read the index stored at `key`
    pub fn load_index(&self, key: u32) -> ValidityIndex {
        let _lock = self.guard(key);
        self.load_index_unlocked(key)
    }

    /// Read-modify-write the index at `key`
    ///
    /// In locked mode the whole cycle runs under the key's advisory lock. If
    /// the write back fails the change is lost, which only costs a later
    /// replay.
    pub fn update_index<R>(&self, key: u32, f: impl FnOnce(&mut ValidityIndex) -> R) -> R {
        let _lock = self.guard(key);
        let mut index = self.load_index_unlocked(key);
        let result = f(&mut index);
        if !self.put_value_unlocked(key, &index) {
            warn!(key, "validity index write-back failed");
        }
        result
    }

    /// Drop the stored index entirely
    pub fn reset_index(&self, key: u32) -> bool {
        let removed = self.clear(key);
        info!(key, removed, "validity index reset");
        removed
    }

    fn load_index_unlocked(&self, key: u32) -> ValidityIndex {
        match self.get_unlocked(key) {
            Some(bytes) => decode_value(key, &bytes).unwrap_or_else(|| {
                warn!(key, "validity index unreadable, treating as empty");
                ValidityIndex::new()
            }),
            None => {
                debug!(key, "no validity index yet");
                ValidityIndex::new()
            }
        }
    }

    fn put_value_unlocked(&self, key: u32, index: &ValidityIndex) -> bool {
        match bincode::serialize(index) {
            Ok(bytes) => self.put_unlocked(key, &bytes, 0),
            Err(e) => {
                warn!(key, "failed to serialize validity index: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::MemorySegments;
    use fuzzcache_core::{ConsistencyMode, DEFAULT_INDEX_KEY};
    use std::sync::Arc;

    const POSTS: TableKey = TableKey(1);
    const USERS: TableKey = TableKey(2);

    #[test]
    fn test_default_is_invalid() {
        let index = ValidityIndex::new();
        assert!(!index.is_valid(POSTS, QueryKey(10)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_set_and_clear_table() {
        let mut index = ValidityIndex::new();
        index.set_valid(POSTS, QueryKey(10));
        index.set_valid(POSTS, QueryKey(11));
        index.set_valid(USERS, QueryKey(20));
        assert_eq!(index.valid_count(), 3);

        assert_eq!(index.clear_table(POSTS), 2);
        assert!(!index.is_valid(POSTS, QueryKey(10)));
        assert!(!index.is_valid(POSTS, QueryKey(11)));
        assert!(index.is_valid(USERS, QueryKey(20)));

        // Cleared bits stay tracked
        assert_eq!(index.queries(POSTS).count(), 2);
        assert_eq!(index.clear_table(POSTS), 0);
    }

    #[test]
    fn test_clear_unknown_table() {
        let mut index = ValidityIndex::new();
        assert_eq!(index.clear_table(POSTS), 0);
        assert!(index.is_empty());
        assert_eq!(index.generation(POSTS), 1);
    }

    #[test]
    fn test_set_valid_at_rejects_cleared_generation() {
        let mut index = ValidityIndex::new();
        let seen = index.generation(POSTS);

        index.clear_table(POSTS);
        assert!(!index.set_valid_at(POSTS, QueryKey(10), seen));
        assert!(!index.is_valid(POSTS, QueryKey(10)));

        assert!(index.set_valid_at(POSTS, QueryKey(10), index.generation(POSTS)));
        assert!(index.is_valid(POSTS, QueryKey(10)));
        assert_eq!(index.generation(USERS), 0);
    }

    #[test]
    fn test_generation_survives_store_roundtrip() {
        let store = SharedStore::in_memory(ConsistencyMode::Locked);
        let seen = store.load_index(DEFAULT_INDEX_KEY).generation(POSTS);
        store.update_index(DEFAULT_INDEX_KEY, |index| index.clear_table(POSTS));

        let accepted = store.update_index(DEFAULT_INDEX_KEY, |index| {
            index.set_valid_at(POSTS, QueryKey(1), seen)
        });
        assert!(!accepted);
        assert_eq!(store.load_index(DEFAULT_INDEX_KEY).generation(POSTS), seen + 1);
    }

    #[test]
    fn test_update_persists() {
        let store = SharedStore::in_memory(ConsistencyMode::BestEffort);
        store.update_index(DEFAULT_INDEX_KEY, |index| index.set_valid(POSTS, QueryKey(1)));

        let index = store.load_index(DEFAULT_INDEX_KEY);
        assert!(index.is_valid(POSTS, QueryKey(1)));
    }

    #[test]
    fn test_update_returns_closure_result() {
        let store = SharedStore::in_memory(ConsistencyMode::Locked);
        store.update_index(DEFAULT_INDEX_KEY, |index| {
            index.set_valid(POSTS, QueryKey(1));
            index.set_valid(POSTS, QueryKey(2));
        });
        let cleared = store.update_index(DEFAULT_INDEX_KEY, |index| index.clear_table(POSTS));
        assert_eq!(cleared, 2);
        assert_eq!(store.load_index(DEFAULT_INDEX_KEY).valid_count(), 0);
    }

    #[test]
    fn test_malformed_index_is_empty() {
        let segments = Arc::new(MemorySegments::new());
        let store = SharedStore::new(segments, ConsistencyMode::BestEffort);
        store.put(DEFAULT_INDEX_KEY, b"\xff\xff\xff\xff\xff\xff\xff\xff\xff", 0);

        assert!(store.load_index(DEFAULT_INDEX_KEY).is_empty());

        // The next update starts over from an empty index
        store.update_index(DEFAULT_INDEX_KEY, |index| index.set_valid(USERS, QueryKey(3)));
        assert!(store.load_index(DEFAULT_INDEX_KEY).is_valid(USERS, QueryKey(3)));
    }

    #[test]
    fn test_reset() {
        let store = SharedStore::in_memory(ConsistencyMode::BestEffort);
        store.update_index(DEFAULT_INDEX_KEY, |index| index.set_valid(POSTS, QueryKey(1)));
        assert!(store.reset_index(DEFAULT_INDEX_KEY));
        assert!(store.load_index(DEFAULT_INDEX_KEY).is_empty());
    }

    #[test]
    fn test_locked_updates_from_threads() {
        let store = SharedStore::in_memory(ConsistencyMode::Locked);
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..10u32 {
                        store.update_index(DEFAULT_INDEX_KEY, |index| {
                            index.set_valid(POSTS, QueryKey(i * 100 + j))
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load_index(DEFAULT_INDEX_KEY).valid_count(), 80);
    }
}
