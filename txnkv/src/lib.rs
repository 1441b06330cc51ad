#![allow(non_camel_case_types)]

//! `txnkv` is the replicated, transactional key-value store core: a
//! versioned store and timestamp oracle (`store`), a Merkle-batched
//! signer (`crypto`), wire messages and routing (`net`), four
//! concurrency-control state machines and the transaction/branch data
//! model they share (`protocol`), the cross-client validation subsystem
//! (`validation`), and the per-replica assembly of all of the above
//! (`replica`).
//!
//! ## Getting started
//!
//! ```rust
//! use txnkv::store::{TimestampOracle, VersionedStore};
//! use std::time::Duration;
//!
//! let oracle = TimestampOracle::new(1, Duration::from_millis(50), Duration::from_millis(5));
//! let mut store = VersionedStore::new();
//! let ts = oracle.now();
//! store.put(b"a".to_vec(), b"1".to_vec(), ts, Default::default()).unwrap();
//! assert_eq!(store.get(b"a", None).unwrap().value, b"1");
//! ```

pub mod crypto;
pub mod error;
pub mod info;
pub mod net;
pub mod protocol;
pub mod replica;
pub mod store;
pub mod validation;
