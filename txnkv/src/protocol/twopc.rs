//! Strict-serializable 2PC state machine (spec §4.6). Runs as the primary
//! of a Viewstamped-style primary/backup group; the replication layer
//! itself (view changes, backup catch-up) is the out-of-scope transport's
//! concern, but this module keeps the append-only prepare/commit log that
//! makes the primary's locks a deterministic function of that log, so a
//! newly-elected primary can rebuild state by replaying it (spec §6
//! "Persisted state layout").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

use crate::error::CResult;
use crate::net::message::{Message, TwoPcMessage, Vote};
use crate::net::transport::{Address, Envelope, Transport};
use crate::protocol::sm::StateMachine;
use crate::protocol::txn::{Transaction, TxnId, TxnStatus};
use crate::store::{Key, Timestamp, TimestampOracle, VersionedStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConcurrencyMode {
    Lock,
    Occ,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum LogEntry {
    Prepare { txn: Transaction, proposed_ts: Timestamp },
    Commit { id: TxnId, ts: Timestamp },
    Abort { id: TxnId },
}

pub struct TwoPcStateMachine {
    address: Address,
    mode: ConcurrencyMode,
    store: VersionedStore,
    oracle: TimestampOracle,
    transport: Arc<dyn Transport>,
    log: Vec<LogEntry>,
    locks: HashMap<Key, TxnId>,
    prepared: HashMap<TxnId, Transaction>,
    committed: HashSet<TxnId>,
    aborted: HashSet<TxnId>,
}

impl TwoPcStateMachine {
    pub fn new(address: Address, mode: ConcurrencyMode, store: VersionedStore, oracle: TimestampOracle, transport: Arc<dyn Transport>) -> Self {
        TwoPcStateMachine {
            address,
            mode,
            store,
            oracle,
            transport,
            log: Vec::new(),
            locks: HashMap::new(),
            prepared: HashMap::new(),
            committed: HashSet::new(),
            aborted: HashSet::new(),
        }
    }

    fn is_stale(&self, id: TxnId) -> bool {
        self.committed.contains(&id) || self.aborted.contains(&id)
    }

    fn can_acquire_locks(&self, txn: &Transaction) -> bool {
        txn.write_set().iter().all(|(key, _)| match self.locks.get(*key) {
            Some(holder) => *holder == txn.id,
            None => true,
        })
    }

    fn occ_read_set_valid(&self, txn: &Transaction) -> bool {
        txn.read_set().iter().all(|(key, ts)| self.store.get(key, None).map_or(true, |v| v.ts <= *ts))
    }

    fn handle_prepare(&mut self, from: Address, txn: Transaction) -> CResult<()> {
        if self.is_stale(txn.id) {
            return Ok(());
        }

        let admitted = match self.mode {
            ConcurrencyMode::Lock => self.can_acquire_locks(&txn),
            ConcurrencyMode::Occ => self.occ_read_set_valid(&txn),
        };
        if !admitted {
            return self.reply(from, TwoPcMessage::PrepareReply { id: txn.id, vote: Vote::Conflict, proposed_ts: None });
        }

        let proposed_ts = self.oracle.now();
        if self.mode == ConcurrencyMode::Lock {
            for (key, _) in txn.write_set() {
                self.locks.insert(key.clone(), txn.id);
            }
        }
        self.log.push(LogEntry::Prepare { txn: txn.clone(), proposed_ts });
        self.prepared.insert(txn.id, txn.clone());
        self.reply(from, TwoPcMessage::PrepareReply { id: txn.id, vote: Vote::Ok, proposed_ts: Some(proposed_ts) })
    }

    fn handle_commit(&mut self, id: TxnId, ts: Timestamp) -> CResult<()> {
        if self.committed.contains(&id) {
            return Ok(());
        }
        if let Some(mut txn) = self.prepared.remove(&id) {
            for (key, value) in txn.write_set() {
                self.store.put(key.clone(), value.clone(), ts, id)?;
                self.locks.remove(key);
            }
            self.store.clear_prepared(id);
            txn.status = TxnStatus::Committed;
        }
        self.log.push(LogEntry::Commit { id, ts });
        self.committed.insert(id);
        Ok(())
    }

    fn handle_abort(&mut self, id: TxnId) -> CResult<()> {
        if self.is_stale(id) {
            return Ok(());
        }
        if let Some(txn) = self.prepared.remove(&id) {
            for (key, _) in txn.write_set() {
                self.locks.remove(key);
            }
            self.store.clear_prepared(id);
        }
        self.log.push(LogEntry::Abort { id });
        self.aborted.insert(id);
        Ok(())
    }

    fn reply(&self, to: Address, message: TwoPcMessage) -> CResult<()> {
        self.transport.send(Envelope { from: self.address, to, message: Message::TwoPc(message) })
    }

    /// Rebuilds `locks`/`prepared`/`committed`/`aborted` from `log`. A
    /// newly-elected primary calls this after the view change replays
    /// the backup's copy of the log into this replica.
    fn replay_log(&mut self) {
        let entries = std::mem::take(&mut self.log);
        for entry in &entries {
            match entry.clone() {
                LogEntry::Prepare { txn, .. } => {
                    if self.mode == ConcurrencyMode::Lock {
                        for (key, _) in txn.write_set() {
                            self.locks.insert(key.clone(), txn.id);
                        }
                    }
                    self.prepared.insert(txn.id, txn);
                }
                LogEntry::Commit { id, .. } => {
                    self.prepared.remove(&id);
                    self.committed.insert(id);
                }
                LogEntry::Abort { id } => {
                    self.prepared.remove(&id);
                    self.aborted.insert(id);
                }
            }
        }
        self.log = entries;
    }
}

impl StateMachine for TwoPcStateMachine {
    fn load(&mut self) -> CResult<()> {
        self.replay_log();
        Ok(())
    }

    fn handle_message(&mut self, from: Address, message: Message) -> CResult<()> {
        let Message::TwoPc(message) = message else { return Ok(()) };
        match message {
            TwoPcMessage::Prepare { txn } => self.handle_prepare(from, txn),
            TwoPcMessage::Commit { id, ts } => self.handle_commit(id, ts),
            TwoPcMessage::Abort { id } => self.handle_abort(id),
            TwoPcMessage::PrepareReply { .. } => Ok(()),
        }
    }

    fn stats(&self) -> crate::replica::ReplicaStats {
        crate::replica::ReplicaStats {
            prepared: self.prepared.len(),
            committed: self.committed.len(),
            aborted: self.aborted.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::InProcessTransport;
    use std::time::Duration;

    fn sm(mode: ConcurrencyMode) -> (TwoPcStateMachine, Arc<InProcessTransport>) {
        let transport = Arc::new(InProcessTransport::new());
        let oracle = TimestampOracle::new(1, Duration::ZERO, Duration::ZERO);
        let sm = TwoPcStateMachine::new(1, mode, VersionedStore::new(), oracle, transport.clone());
        (sm, transport)
    }

    fn txn(client_id: u64) -> Transaction {
        Transaction::new(TxnId { client_id, client_seq_num: 0 })
    }

    #[test]
    fn lock_mode_serializes_conflicting_writers() {
        let (mut sm, transport) = sm(ConcurrencyMode::Lock);
        let _rx = transport.register(99);

        let mut a = txn(1);
        a.record_write(b"k".to_vec(), b"a".to_vec());
        sm.handle_prepare(99, a.clone()).unwrap();
        assert!(sm.locks.contains_key(b"k".as_slice()));

        let mut b = txn(2);
        b.record_write(b"k".to_vec(), b"b".to_vec());
        assert!(!sm.can_acquire_locks(&b));
    }

    #[test]
    fn commit_applies_writes_and_releases_locks() {
        let (mut sm, transport) = sm(ConcurrencyMode::Lock);
        let _rx = transport.register(99);

        let mut a = txn(1);
        a.record_write(b"k".to_vec(), b"a".to_vec());
        sm.handle_prepare(99, a.clone()).unwrap();
        sm.handle_commit(a.id, sm.oracle.now()).unwrap();

        assert!(!sm.locks.contains_key(b"k".as_slice()));
        assert_eq!(sm.store.get(b"k", None).unwrap().value, b"a");
    }

    #[test]
    fn replay_log_rebuilds_locks_deterministically() {
        let (mut sm, transport) = sm(ConcurrencyMode::Lock);
        let _rx = transport.register(99);

        let mut a = txn(1);
        a.record_write(b"k".to_vec(), b"a".to_vec());
        sm.handle_prepare(99, a.clone()).unwrap();

        let mut replica = TwoPcStateMachine::new(2, ConcurrencyMode::Lock, VersionedStore::new(), TimestampOracle::new(2, Duration::ZERO, Duration::ZERO), transport);
        replica.log = sm.log.clone();
        replica.load().unwrap();
        assert!(replica.locks.contains_key(b"k".as_slice()));
        assert!(replica.prepared.contains_key(&a.id));
    }
}
