//! Speculative-branch state machine (spec §4.8, Morty-style).
//!
//! Deliberately diverges from the original in the two places the spec's
//! Open Questions identify as bugs rather than intended behavior:
//! `handle_ko` cascades only to a branch's transitive dependents (not
//! every branch prepared after it), and `handle_commit` promotes the
//! `waiting` queue by copying it out and draining the copy, rather than
//! mutating `waiting` while iterating over it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::CResult;
use crate::net::message::{BranchMessage, Message};
use crate::net::transport::{Address, Envelope, Transport};
use crate::protocol::sm::StateMachine;
use crate::protocol::txn::{Branch, TxnId, TxnStatus};
use crate::store::{Key, Timestamp, TimestampOracle, VersionedStore};

enum Compatibility {
    Commit(HashSet<TxnId>),
    Wait(HashSet<TxnId>),
    Ko,
}

struct Waiting {
    origin: Address,
    branch: Branch,
    blockers: HashSet<TxnId>,
}

pub struct BranchStateMachine {
    address: Address,
    store: VersionedStore,
    oracle: TimestampOracle,
    transport: Arc<dyn Transport>,
    /// Insertion-ordered; at most one branch per transaction (spec §3
    /// invariant), enforced by `evaluate`/`handle_prepare`.
    prepared: Vec<Branch>,
    /// Which already-prepared branches' writes each prepared branch's
    /// reads observed -- the dependency edges `handle_ko` cascades over.
    depends_on: HashMap<TxnId, HashSet<TxnId>>,
    waiting: Vec<Waiting>,
    committed: usize,
    aborted: usize,
}

impl BranchStateMachine {
    pub fn new(address: Address, store: VersionedStore, oracle: TimestampOracle, transport: Arc<dyn Transport>) -> Self {
        BranchStateMachine {
            address,
            store,
            oracle,
            transport,
            prepared: Vec::new(),
            depends_on: HashMap::new(),
            waiting: Vec::new(),
            committed: 0,
            aborted: 0,
        }
    }

    /// Most-recently-prepared branch that writes `key`, if any -- the
    /// value a new branch's read of `key` would observe before it is
    /// itself committed to the store.
    fn virtual_write(&self, key: &[u8]) -> Option<(TxnId, Timestamp)> {
        self.prepared.iter().rev().find_map(|b| {
            b.txn.write_set().iter().find(|(k, _)| k.as_slice() == key).map(|_| {
                let ts = b.txn.read_set().iter().find(|(k, _)| k.as_slice() == key).map(|(_, ts)| *ts).unwrap_or(Timestamp::MIN);
                (b.id, ts)
            })
        })
    }

    fn evaluate(&self, branch: &Branch) -> Compatibility {
        let mut deps = HashSet::new();
        let mut blockers = HashSet::new();

        for (key, ts) in branch.txn.read_set() {
            match self.virtual_write(key) {
                Some((writer, w_ts)) if writer != branch.id => {
                    if w_ts == ts {
                        deps.insert(writer);
                    } else {
                        blockers.insert(writer);
                    }
                }
                _ => match self.store.get(key, None) {
                    Some(v) if v.ts == ts => {}
                    None if ts == Timestamp::MIN => {}
                    _ => return Compatibility::Ko,
                },
            }
        }

        for (key, _) in branch.txn.write_set() {
            if let Some((writer, _)) = self.virtual_write(key) {
                if writer != branch.id {
                    blockers.insert(writer);
                }
            }
        }

        if blockers.is_empty() {
            Compatibility::Commit(deps)
        } else {
            Compatibility::Wait(blockers)
        }
    }

    fn handle_read(&mut self, from: Address, branch: Branch, key: Key, _ts: Timestamp) -> CResult<()> {
        let value = self.store.get(&key, None).map(|v| v.value.clone());
        self.reply(from, BranchMessage::ReadReply { branch, key, value })
    }

    fn handle_write(&mut self, from: Address, branch: Branch, key: Key, value: crate::store::Value, _ts: Timestamp) -> CResult<()> {
        self.reply(from, BranchMessage::WriteReply { branch, key, value })
    }

    fn handle_prepare(&mut self, from: Address, branch: Branch) -> CResult<()> {
        match self.evaluate(&branch) {
            Compatibility::Commit(deps) => {
                self.depends_on.insert(branch.id, deps);
                self.prepared.push(branch.clone());
                self.reply(from, BranchMessage::PrepareOk { branch })
            }
            Compatibility::Wait(blockers) => {
                self.waiting.push(Waiting { origin: from, branch, blockers });
                Ok(())
            }
            Compatibility::Ko => self.reply(from, BranchMessage::PrepareKo { branch }),
        }
    }

    /// Removes `branch` from the prepared set along with every branch
    /// that transitively depends on it -- a safe reading of "unprepare
    /// branches that can no longer be justified", not the broader "every
    /// branch prepared after this one" the original source applies.
    fn handle_ko(&mut self, branch: Branch) -> CResult<()> {
        let mut to_remove = vec![branch.id];
        let mut frontier = vec![branch.id];
        while let Some(cur) = frontier.pop() {
            for (&id, deps) in self.depends_on.iter() {
                if deps.contains(&cur) && !to_remove.contains(&id) {
                    to_remove.push(id);
                    frontier.push(id);
                }
            }
        }
        for id in &to_remove {
            self.prepared.retain(|b| b.id != *id);
            self.depends_on.remove(id);
        }
        Ok(())
    }

    fn handle_commit(&mut self, mut branch: Branch) -> CResult<()> {
        let ts = branch.txn.read_set().first().map(|(_, ts)| *ts).unwrap_or_else(|| self.oracle.now());
        for (key, value) in branch.txn.write_set() {
            self.store.put(key.clone(), value.clone(), ts, branch.id)?;
        }
        branch.txn.status = TxnStatus::Committed;
        self.prepared.retain(|b| b.id != branch.id);
        self.depends_on.remove(&branch.id);
        self.committed += 1;
        for deps in self.depends_on.values_mut() {
            deps.remove(&branch.id);
        }

        // Stable iteration over `waiting`: copy it out, then drain the
        // copy, instead of erasing from `self.waiting` mid-iteration.
        let pending = std::mem::take(&mut self.waiting);
        for mut entry in pending {
            entry.blockers.remove(&branch.id);
            if !entry.blockers.is_empty() {
                self.waiting.push(entry);
                continue;
            }
            match self.evaluate(&entry.branch) {
                Compatibility::Commit(deps) => {
                    self.depends_on.insert(entry.branch.id, deps);
                    self.prepared.push(entry.branch.clone());
                    self.reply(entry.origin, BranchMessage::PrepareOk { branch: entry.branch })?;
                }
                Compatibility::Wait(blockers) => {
                    self.waiting.push(Waiting { origin: entry.origin, branch: entry.branch, blockers });
                }
                Compatibility::Ko => {
                    self.reply(entry.origin, BranchMessage::PrepareKo { branch: entry.branch })?;
                }
            }
        }
        Ok(())
    }

    fn handle_abort(&mut self, branch: Branch) -> CResult<()> {
        self.prepared.retain(|b| b.id != branch.id);
        self.depends_on.remove(&branch.id);
        self.aborted += 1;
        Ok(())
    }

    fn reply(&self, to: Address, message: BranchMessage) -> CResult<()> {
        self.transport.send(Envelope { from: self.address, to, message: Message::Branch(message) })
    }
}

impl StateMachine for BranchStateMachine {
    fn handle_message(&mut self, from: Address, message: Message) -> CResult<()> {
        let Message::Branch(message) = message else { return Ok(()) };
        match message {
            BranchMessage::Read { branch, key, ts } => self.handle_read(from, branch, key, ts),
            BranchMessage::Write { branch, key, value, ts } => self.handle_write(from, branch, key, value, ts),
            BranchMessage::Prepare { branch } => self.handle_prepare(from, branch),
            BranchMessage::Ko { branch } => self.handle_ko(branch),
            BranchMessage::Commit { branch } => self.handle_commit(branch),
            BranchMessage::Abort { branch } => self.handle_abort(branch),
            BranchMessage::ReadReply { .. } | BranchMessage::WriteReply { .. } | BranchMessage::PrepareOk { .. } | BranchMessage::PrepareKo { .. } => Ok(()),
        }
    }

    fn stats(&self) -> crate::replica::ReplicaStats {
        crate::replica::ReplicaStats { prepared: self.prepared.len(), committed: self.committed, aborted: self.aborted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::InProcessTransport;
    use crate::protocol::txn::Transaction;

    fn id(client_id: u64) -> TxnId {
        TxnId { client_id, client_seq_num: 0 }
    }

    fn branch_writing(client_id: u64, key: &[u8], value: &[u8]) -> Branch {
        let mut txn = Transaction::new(id(client_id));
        txn.record_write(key.to_vec(), value.to_vec());
        Branch::new(txn)
    }

    #[test]
    fn ko_cascades_only_to_transitive_dependents() {
        let transport = Arc::new(InProcessTransport::new());
        let _rx = transport.register(99);
        let mut sm = BranchStateMachine::new(1, VersionedStore::new(), TimestampOracle::new(1, std::time::Duration::ZERO, std::time::Duration::ZERO), transport);

        let b1 = branch_writing(1, b"k1", b"v1");
        sm.handle_prepare(99, b1.clone()).unwrap();

        // b2 is independent of b1 (disjoint keys): prepared after b1 but not a dependent.
        let b2 = branch_writing(2, b"k2", b"v2");
        sm.handle_prepare(99, b2.clone()).unwrap();

        sm.handle_ko(b1.clone()).unwrap();

        assert!(!sm.prepared.iter().any(|b| b.id == b1.id));
        assert!(sm.prepared.iter().any(|b| b.id == b2.id), "unrelated branch must survive a KO on an unrelated branch");
    }

    #[test]
    fn commit_promotes_waiting_branch_in_same_call() {
        let transport = Arc::new(InProcessTransport::new());
        let _rx = transport.register(99);
        let mut sm = BranchStateMachine::new(1, VersionedStore::new(), TimestampOracle::new(1, std::time::Duration::ZERO, std::time::Duration::ZERO), transport);

        let b1 = branch_writing(1, b"k", b"v1");
        sm.handle_prepare(99, b1.clone()).unwrap();

        // b2 also wants to write k: conflicts with b1, parks as waiting.
        let b2 = branch_writing(2, b"k", b"v2");
        sm.handle_prepare(99, b2.clone()).unwrap();
        assert!(sm.waiting.iter().any(|w| w.branch.id == b2.id));
        assert!(!sm.prepared.iter().any(|b| b.id == b2.id));

        sm.handle_commit(b1).unwrap();

        assert!(sm.prepared.iter().any(|b| b.id == b2.id), "b2 should be promoted within handle_commit");
        assert!(sm.waiting.is_empty());
    }
}
