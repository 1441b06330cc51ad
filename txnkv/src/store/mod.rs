//! The versioned key-value store (spec §4.1) and the hybrid-logical
//! timestamp oracle (spec §4.2).
//!
//! This is the per-replica, single-writer data layer every state machine
//! in `crate::protocol` consults. It deliberately does not implement
//! snapshot-isolation active-sets the way the teacher's `kv/src/mvcc/mvcc.rs`
//! MVCC wrapper (built on its own `storage::engine::Engine`) did -- that's
//! the teacher's strict-serializable semantics, not what this store's
//! contract calls for. Instead each key carries an explicit, newest-first
//! version list, and conflict detection is delegated to the protocol layer
//! via `prepared_reads`/`prepared_writes`.

pub mod clock;
pub mod version;

pub use clock::{Timestamp, TimestampOracle};
pub use version::{Key, TxnId, Value, Version, VersionedStore};
