//! OCC-Linearizable state machine (spec §4.5). Single-round optimistic
//! concurrency control over an inconsistent-replicated prepare: each
//! replica evaluates `Prepare` independently against its own store and
//! votes; the client coordinator consolidates the quorum, which is a
//! client-side concern outside this module.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::CResult;
use crate::net::message::{Message, OccMessage, Vote};
use crate::net::transport::{Address, Envelope, Transport};
use crate::protocol::sm::StateMachine;
use crate::protocol::txn::{Transaction, TxnId, TxnStatus};
use crate::store::{Timestamp, VersionedStore};

pub struct OccStateMachine {
    address: Address,
    store: VersionedStore,
    transport: Arc<dyn Transport>,
    prepared: HashMap<TxnId, Transaction>,
    committed: HashSet<TxnId>,
    aborted: HashSet<TxnId>,
}

impl OccStateMachine {
    pub fn new(address: Address, store: VersionedStore, transport: Arc<dyn Transport>) -> Self {
        OccStateMachine { address, store, transport, prepared: HashMap::new(), committed: HashSet::new(), aborted: HashSet::new() }
    }

    fn is_stale(&self, id: TxnId) -> bool {
        self.committed.contains(&id) || self.aborted.contains(&id)
    }

    /// OK iff every read matches what's current for its key, and no
    /// in-flight prepared write on a write-set key belongs to another
    /// transaction.
    fn evaluate(&self, txn: &Transaction) -> Vote {
        for (key, ts) in txn.read_set() {
            if let Some(current) = self.store.get(key, None) {
                if current.ts > ts {
                    return Vote::Conflict;
                }
            }
        }
        for (key, _) in txn.write_set() {
            if self.store.prepared_writes(key).iter().any(|id| *id != txn.id) {
                return Vote::Conflict;
            }
        }
        Vote::Ok
    }

    fn handle_prepare(&mut self, from: Address, txn: Transaction) -> CResult<()> {
        if self.is_stale(txn.id) {
            return Ok(());
        }
        let id = txn.id;
        let vote = self.evaluate(&txn);
        if vote == Vote::Ok {
            for (key, _) in txn.write_set() {
                self.store.mark_prepared_write(key, id);
            }
            self.prepared.insert(id, txn);
        }
        self.reply(from, OccMessage::PrepareReply { id, vote })
    }

    fn handle_commit(&mut self, id: TxnId, ts: Timestamp) -> CResult<()> {
        if self.committed.contains(&id) {
            return Ok(()); // idempotent replay, spec §8
        }
        if let Some(mut txn) = self.prepared.remove(&id) {
            for (key, value) in txn.write_set() {
                self.store.put(key.clone(), value.clone(), ts, id)?;
            }
            self.store.clear_prepared(id);
            txn.status = TxnStatus::Committed;
        }
        self.committed.insert(id);
        Ok(())
    }

    fn handle_abort(&mut self, id: TxnId) -> CResult<()> {
        if self.is_stale(id) {
            return Ok(());
        }
        self.prepared.remove(&id);
        self.store.clear_prepared(id);
        self.aborted.insert(id);
        Ok(())
    }

    fn reply(&self, to: Address, message: OccMessage) -> CResult<()> {
        self.transport.send(Envelope { from: self.address, to, message: Message::Occ(message) })
    }
}

impl StateMachine for OccStateMachine {
    fn handle_message(&mut self, from: Address, message: Message) -> CResult<()> {
        let Message::Occ(message) = message else { return Ok(()) };
        match message {
            OccMessage::Prepare { txn } => self.handle_prepare(from, txn),
            OccMessage::Commit { id, ts } => self.handle_commit(id, ts),
            OccMessage::Abort { id } => self.handle_abort(id),
            OccMessage::PrepareReply { .. } => Ok(()), // client-coordinator-side message
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
