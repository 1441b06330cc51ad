//! In-memory versioned map (spec §4.1 / §3).
//!
//! Each key owns an ordered, newest-first sequence of `Version`s. No
//! background GC is mandated by the spec; this implementation keeps every
//! version, which is adequate for the benchmark-sized workloads this core
//! targets (SmallBank/TPC-C/Retwis key spaces).

use std::collections::{HashMap, HashSet};

use serde_derive::{Deserialize, Serialize};

use crate::error::{CResult, Error};
use crate::store::clock::Timestamp;

pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

/// Identifies a transaction: (client_id, client_seq_num), unique and
/// monotonically assigned by the owning client (spec §3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId {
    pub client_id: u64,
    pub client_seq_num: u64,
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.client_id, self.client_seq_num)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub ts: Timestamp,
    pub value: Value,
    pub writer: TxnId,
}

/// A single key's in-memory version chain, always kept newest-first.
#[derive(Default)]
struct VersionChain {
    versions: Vec<Version>,
}

impl VersionChain {
    fn newest(&self) -> Option<&Version> {
        self.versions.first()
    }

    /// Newest version with ts <= t_max.
    fn at_or_before(&self, t_max: Timestamp) -> Option<&Version> {
        self.versions.iter().find(|v| v.ts <= t_max)
    }

    fn insert(&mut self, version: Version) {
        let pos = self.versions.partition_point(|v| v.ts > version.ts);
        self.versions.insert(pos, version);
    }

    /// True if any version with `ts >= at` was written by someone other
    /// than `writer`. The chain is newest-first, so these are exactly the
    /// leading versions down to the first one older than `at`.
    fn has_conflicting_write_at_or_after(&self, at: Timestamp, writer: TxnId) -> bool {
        self.versions.iter().take_while(|v| v.ts >= at).any(|v| v.writer != writer)
    }
}

#[derive(Default)]
pub struct VersionedStore {
    data: HashMap<Key, VersionChain>,
    prepared_reads: HashMap<Key, HashSet<TxnId>>,
    prepared_writes: HashMap<Key, HashSet<TxnId>>,
}

impl VersionedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest version with timestamp <= t_max, or the newest overall if
    /// t_max is omitted. `None` if the key has never been written.
    pub fn get(&self, key: &[u8], t_max: Option<Timestamp>) -> Option<&Version> {
        let chain = self.data.get(key)?;
        match t_max {
            Some(t_max) => chain.at_or_before(t_max),
            None => chain.newest(),
        }
    }

    /// Inserts a version at `ts`, written by `writer`. Fails with
    /// `StaleWrite` (modeled as `Error::StorageConflict`) if any version
    /// with timestamp >= ts already exists, written by someone else --
    /// not just the newest one, since the chain can hold out-of-order
    /// timestamps from different writers.
    pub fn put(&mut self, key: Key, value: Value, ts: Timestamp, writer: TxnId) -> CResult<()> {
        let chain = self.data.entry(key).or_default();
        if chain.has_conflicting_write_at_or_after(ts, writer) {
            return Err(Error::StorageConflict(writer, "stale write".to_string()));
        }
        chain.insert(Version { ts, value, writer });
        Ok(())
    }

    pub fn mark_prepared_read(&mut self, key: &[u8], id: TxnId) {
        self.prepared_reads.entry(key.to_vec()).or_default().insert(id);
    }

    pub fn mark_prepared_write(&mut self, key: &[u8], id: TxnId) {
        self.prepared_writes.entry(key.to_vec()).or_default().insert(id);
    }

    /// Removes `id` from every per-key prepared set it was recorded in.
    /// Called when a transaction leaves the in-flight set (commit or
    /// abort).
    pub fn clear_prepared(&mut self, id: TxnId) {
        for set in self.prepared_reads.values_mut() {
            set.remove(&id);
        }
        for set in self.prepared_writes.values_mut() {
            set.remove(&id);
        }
    }

    pub fn prepared_writes(&self, key: &[u8]) -> HashSet<TxnId> {
        self.prepared_writes.get(key).cloned().unwrap_or_default()
    }

    pub fn prepared_reads(&self, key: &[u8]) -> HashSet<TxnId> {
        self.prepared_reads.get(key).cloned().unwrap_or_default()
    }

    pub fn version_count(&self, key: &[u8]) -> usize {
        self.data.get(key).map_or(0, |c| c.versions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(n: u64) -> TxnId {
        TxnId { client_id: n, client_seq_num: 0 }
    }

    #[test]
    fn read_at_ts_returns_preceding_version() {
        let mut store = VersionedStore::new();
        store.put(b"a".to_vec(), b"a1".to_vec(), Timestamp::new(1, 0), txn(1)).unwrap();
        store.put(b"a".to_vec(), b"a4".to_vec(), Timestamp::new(4, 0), txn(2)).unwrap();

        assert_eq!(store.get(b"a", Some(Timestamp::new(3, 0))).unwrap().value, b"a1");
        assert_eq!(store.get(b"a", Some(Timestamp::new(4, 0))).unwrap().value, b"a4");
        assert_eq!(store.get(b"a", None).unwrap().value, b"a4");
        assert!(store.get(b"a", Some(Timestamp::new(0, 0))).is_none());
    }

    #[test]
    fn missing_key_is_not_found() {
        let store = VersionedStore::new();
        assert!(store.get(b"missing", None).is_none());
    }

    #[test]
    fn put_conflicts_on_stale_write_by_other_writer() {
        let mut store = VersionedStore::new();
        store.put(b"k".to_vec(), b"v1".to_vec(), Timestamp::new(5, 0), txn(1)).unwrap();

        let err = store.put(b"k".to_vec(), b"v2".to_vec(), Timestamp::new(5, 0), txn(2)).unwrap_err();
        assert!(matches!(err, Error::StorageConflict(_, _)));

        // Same writer re-asserting its own write at >= ts is not a conflict.
        store.put(b"k".to_vec(), b"v1-retry".to_vec(), Timestamp::new(5, 0), txn(1)).unwrap();
    }

    /// A non-newest version can still be the one that conflicts: the
    /// newest entry happening to share the new write's writer must not
    /// shadow an older-but-still->=ts entry from someone else.
    #[test]
    fn put_conflicts_on_non_newest_version_by_other_writer() {
        let mut store = VersionedStore::new();
        store.put(b"k".to_vec(), b"v-b".to_vec(), Timestamp::new(9, 0), txn(2)).unwrap();
        store.put(b"k".to_vec(), b"v-a".to_vec(), Timestamp::new(10, 0), txn(1)).unwrap();

        let err = store.put(b"k".to_vec(), b"v-a2".to_vec(), Timestamp::new(9, 0), txn(1)).unwrap_err();
        assert!(matches!(err, Error::StorageConflict(_, _)));
    }

    #[test]
    fn prepared_sets_round_trip() {
        let mut store = VersionedStore::new();
        store.mark_prepared_write(b"k", txn(1));
        store.mark_prepared_read(b"k", txn(2));
        assert_eq!(store.prepared_writes(b"k"), HashSet::from([txn(1)]));
        assert_eq!(store.prepared_reads(b"k"), HashSet::from([txn(2)]));

        store.clear_prepared(txn(1));
        assert!(store.prepared_writes(b"k").is_empty());
        assert_eq!(store.prepared_reads(b"k"), HashSet::from([txn(2)]));
    }
}
