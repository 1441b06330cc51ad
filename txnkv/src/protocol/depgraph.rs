//! Dependency-graph state machine (spec §4.7, Janus-style). Pre-accept
//! computes a transaction's dependencies from per-key read-by/write-by
//! maps; accept is the slow path used when pre-accept didn't reach a fast
//! quorum; commit queues the transaction for execution once its
//! dependencies are satisfied, executing whole strongly-connected
//! components together via Tarjan's algorithm (spec §9: "arena + dense
//! integer ids ... never use reference-counted back-pointers").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::CResult;
use crate::net::message::{DepGraphMessage, DepStatus, Message};
use crate::net::transport::{Address, Envelope, Transport};
use crate::protocol::sm::StateMachine;
use crate::protocol::txn::{Key, Transaction, TxnId, TxnStatus};
use crate::store::VersionedStore;

pub struct DepGraphStateMachine {
    address: Address,
    store: VersionedStore,
    transport: Arc<dyn Transport>,
    ballots: HashMap<TxnId, u64>,
    readers_by_key: HashMap<Key, Vec<TxnId>>,
    writers_by_key: HashMap<Key, Vec<TxnId>>,
    dep_map: HashMap<TxnId, Vec<TxnId>>,
    txns: HashMap<TxnId, Transaction>,
    committed: HashSet<TxnId>,
    executed: HashSet<TxnId>,
    queued: Vec<TxnId>,
}

impl DepGraphStateMachine {
    pub fn new(address: Address, store: VersionedStore, transport: Arc<dyn Transport>) -> Self {
        DepGraphStateMachine {
            address,
            store,
            transport,
            ballots: HashMap::new(),
            readers_by_key: HashMap::new(),
            writers_by_key: HashMap::new(),
            dep_map: HashMap::new(),
            txns: HashMap::new(),
            committed: HashSet::new(),
            executed: HashSet::new(),
            queued: Vec::new(),
        }
    }

    fn handle_pre_accept(&mut self, from: Address, txn: Transaction, ballot: u64) -> CResult<()> {
        if self.ballots.get(&txn.id).is_some_and(|seen| *seen >= ballot) {
            return self.reply(from, DepGraphMessage::PreAcceptReply { id: txn.id, deps: vec![], status: DepStatus::NotOk });
        }
        self.ballots.insert(txn.id, ballot);

        let mut deps = HashSet::new();
        for (key, _) in txn.read_set() {
            deps.extend(self.writers_by_key.get(key).into_iter().flatten().copied());
        }
        for (key, _) in txn.write_set() {
            deps.extend(self.readers_by_key.get(key).into_iter().flatten().copied());
            deps.extend(self.writers_by_key.get(key).into_iter().flatten().copied());
        }
        deps.remove(&txn.id);

        for (key, _) in txn.read_set() {
            self.readers_by_key.entry(key.clone()).or_default().push(txn.id);
        }
        for (key, _) in txn.write_set() {
            self.writers_by_key.entry(key.clone()).or_default().push(txn.id);
        }

        let deps: Vec<TxnId> = deps.into_iter().collect();
        self.txns.insert(txn.id, txn.clone());
        self.reply(from, DepGraphMessage::PreAcceptReply { id: txn.id, deps, status: DepStatus::Ok })
    }

    fn handle_accept(&mut self, from: Address, id: TxnId, deps: Vec<TxnId>, ballot: u64) -> CResult<()> {
        if self.ballots.get(&id).is_some_and(|seen| *seen > ballot) {
            return self.reply(from, DepGraphMessage::AcceptReply { id, status: DepStatus::NotOk });
        }
        self.ballots.insert(id, ballot);
        self.dep_map.insert(id, deps);
        self.reply(from, DepGraphMessage::AcceptReply { id, status: DepStatus::Ok })
    }

    fn handle_commit(&mut self, id: TxnId, deps: Vec<TxnId>) -> CResult<()> {
        self.dep_map.insert(id, deps);
        self.committed.insert(id);
        if !self.queued.contains(&id) {
            self.queued.push(id);
        }
        self.try_execute()
    }

    fn handle_inquire(&mut self, from: Address, id: TxnId) -> CResult<()> {
        let status = if self.committed.contains(&id) { DepStatus::Ok } else { DepStatus::NotOk };
        let deps = self.dep_map.get(&id).cloned().unwrap_or_default();
        self.reply(from, DepGraphMessage::InquireReply { id, status, deps })
    }

    /// Executes every strongly-connected component of the committed
    /// sub-graph that is ready: every dependency is either already
    /// executed or part of the same SCC. Within an SCC, order by txn_id
    /// ascending for determinism across replicas.
    fn try_execute(&mut self) -> CResult<()> {
        let ready: Vec<TxnId> = self.queued.iter().copied().filter(|id| self.committed.contains(id)).collect();
        if ready.is_empty() {
            return Ok(());
        }

        let sccs = tarjan_scc(&ready, &self.dep_map);
        for mut scc in sccs {
            let all_ready = scc.iter().all(|id| {
                self.dep_map.get(id).into_iter().flatten().all(|dep| self.executed.contains(dep) || scc.contains(dep))
            });
            if !all_ready {
                continue;
            }
            scc.sort();
            for id in scc {
                if let Some(txn) = self.txns.get(&id).cloned() {
                    self.execute(txn)?;
                }
                self.executed.insert(id);
                self.queued.retain(|q| *q != id);
            }
        }
        Ok(())
    }

    fn execute(&mut self, mut txn: Transaction) -> CResult<()> {
        let ts = txn
            .read_set()
            .first()
            .map(|(_, ts)| *ts)
            .unwrap_or_else(|| crate::store::Timestamp::new(txn.id.client_seq_num, txn.id.client_id));
        for (key, value) in txn.write_set() {
            self.store.put(key.clone(), value.clone(), ts, txn.id)?;
        }
        txn.status = TxnStatus::Committed;
        Ok(())
    }

    fn reply(&self, to: Address, message: DepGraphMessage) -> CResult<()> {
        self.transport.send(Envelope { from: self.address, to, message: Message::DepGraph(message) })
    }
}

impl StateMachine for DepGraphStateMachine {
    fn handle_message(&mut self, from: Address, message: Message) -> CResult<()> {
        let Message::DepGraph(message) = message else { return Ok(()) };
        match message {
            DepGraphMessage::PreAccept { txn, ballot } => self.handle_pre_accept(from, txn, ballot),
            DepGraphMessage::Accept { id, deps, ballot } => self.handle_accept(from, id, deps, ballot),
            DepGraphMessage::Commit { id, deps } => self.handle_commit(id, deps),
            DepGraphMessage::Inquire { id } => self.handle_inquire(from, id),
            DepGraphMessage::PreAcceptReply { .. } | DepGraphMessage::AcceptReply { .. } | DepGraphMessage::InquireReply { .. } => Ok(()),
        }
    }

    fn stats(&self) -> crate::replica::ReplicaStats {
        crate::replica::ReplicaStats { prepared: self.queued.len(), committed: self.executed.len(), aborted: 0 }
    }
}

/// Tarjan's algorithm restricted to the subgraph induced by `nodes`, with
/// edges from `dep_map` filtered to targets also in `nodes`. Returns SCCs
/// in topological order (a component's dependencies come earlier in this
/// vector, since Tarjan emits components dependency-first), which is why
/// `try_execute`'s forward iteration can assume a component's deps are
/// already executed or already seen.
fn tarjan_scc(nodes: &[TxnId], dep_map: &HashMap<TxnId, Vec<TxnId>>) -> Vec<Vec<TxnId>> {
    struct State<'a> {
        dep_map: &'a HashMap<TxnId, Vec<TxnId>>,
        node_set: HashSet<TxnId>,
        index: HashMap<TxnId, usize>,
        low_link: HashMap<TxnId, usize>,
        on_stack: HashSet<TxnId>,
        stack: Vec<TxnId>,
        counter: usize,
        sccs: Vec<Vec<TxnId>>,
    }

    fn strong_connect(v: TxnId, state: &mut State) {
        state.index.insert(v, state.counter);
        state.low_link.insert(v, state.counter);
        state.counter += 1;
        state.stack.push(v);
        state.on_stack.insert(v);

        let neighbors: Vec<TxnId> = state
            .dep_map
            .get(&v)
            .into_iter()
            .flatten()
            .filter(|w| state.node_set.contains(w))
            .copied()
            .collect();
        for w in neighbors {
            if !state.index.contains_key(&w) {
                strong_connect(w, state);
                let low = state.low_link[&w].min(state.low_link[&v]);
                state.low_link.insert(v, low);
            } else if state.on_stack.contains(&w) {
                let low = state.index[&w].min(state.low_link[&v]);
                state.low_link.insert(v, low);
            }
        }

        if state.low_link[&v] == state.index[&v] {
            let mut component = Vec::new();
            loop {
                let w = state.stack.pop().expect("scc stack underflow");
                state.on_stack.remove(&w);
                component.push(w);
                if w == v {
                    break;
                }
            }
            state.sccs.push(component);
        }
    }

    let mut state = State {
        dep_map,
        node_set: nodes.iter().copied().collect(),
        index: HashMap::new(),
        low_link: HashMap::new(),
        on_stack: HashSet::new(),
        stack: Vec::new(),
        counter: 0,
        sccs: Vec::new(),
    };
    for node in nodes {
        if !state.index.contains_key(node) {
            strong_connect(*node, &mut state);
        }
    }
    state.sccs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::InProcessTransport;

    fn id(client_id: u64) -> TxnId {
        TxnId { client_id, client_seq_num: 0 }
    }

    #[test]
    fn two_cycle_forms_one_scc() {
        let mut deps = HashMap::new();
        deps.insert(id(1), vec![id(2)]);
        deps.insert(id(2), vec![id(1)]);
        let sccs = tarjan_scc(&[id(1), id(2)], &deps);
        assert_eq!(sccs.len(), 1);
        let mut component = sccs[0].clone();
        component.sort();
        assert_eq!(component, vec![id(1), id(2)]);
    }

    #[test]
    fn independent_transactions_form_singleton_sccs() {
        let deps = HashMap::new();
        let sccs = tarjan_scc(&[id(1), id(2)], &deps);
        assert_eq!(sccs.len(), 2);
    }

    #[test]
    fn pre_accept_computes_deps_from_overlapping_access() {
        let transport = Arc::new(InProcessTransport::new());
        let _rx = transport.register(99);
        let mut sm = DepGraphStateMachine::new(1, VersionedStore::new(), transport);

        let mut a = Transaction::new(id(1));
        a.record_read(b"k1".to_vec(), crate::store::Timestamp::new(0, 1));
        a.record_write(b"k2".to_vec(), b"v".to_vec());
        sm.handle_pre_accept(99, a, 0).unwrap();

        let mut b = Transaction::new(id(2));
        b.record_read(b"k2".to_vec(), crate::store::Timestamp::new(0, 2));
        b.record_write(b"k1".to_vec(), b"v".to_vec());
        sm.handle_pre_accept(99, b.clone(), 0).unwrap();

        // b reads k2 (written by a) and writes k1 (read by a): both directions alias.
        assert!(sm.writers_by_key[b"k2".as_slice()].contains(&id(1)));
        assert!(sm.readers_by_key[b"k1".as_slice()].contains(&id(1)));
    }

    #[test]
    fn cyclic_commit_executes_deterministically_by_id() {
        let transport = Arc::new(InProcessTransport::new());
        let _rx = transport.register(99);
        let mut sm = DepGraphStateMachine::new(1, VersionedStore::new(), transport);

        let mut a = Transaction::new(id(1));
        a.record_write(b"k2".to_vec(), b"from-a".to_vec());
        let mut b = Transaction::new(id(2));
        b.record_write(b"k1".to_vec(), b"from-b".to_vec());

        sm.txns.insert(a.id, a.clone());
        sm.txns.insert(b.id, b.clone());

        sm.handle_commit(a.id, vec![b.id]).unwrap();
        sm.handle_commit(b.id, vec![a.id]).unwrap();

        assert!(sm.executed.contains(&a.id));
        assert!(sm.executed.contains(&b.id));
        assert_eq!(sm.store.get(b"k2", None).unwrap().value, b"from-a");
        assert_eq!(sm.store.get(b"k1", None).unwrap().value, b"from-b");
    }
}
