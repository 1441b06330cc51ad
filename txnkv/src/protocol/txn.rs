//! Shared transaction/branch types (spec §3) used by every state machine
//! in this module.

use serde_derive::{Deserialize, Serialize};

use crate::store::{Timestamp, Value};
pub use crate::store::{Key, TxnId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    Active,
    PreAccepted,
    Accepted,
    Prepared,
    Committed,
    Aborted,
}

/// One operation recorded against a transaction's history. Read carries
/// the timestamp the value was observed at; Write carries the value to be
/// applied at commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Read { key: Key, ts: Timestamp },
    Write { key: Key, value: Value },
}

impl Operation {
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Read { key, .. } => key,
            Operation::Write { key, .. } => key,
        }
    }
}

/// A transaction's full client-visible state: id, its append-only history
/// as a unified op log (`ops`), the derived read_set/write_set views the
/// spec calls out separately, its dependency-graph ancestors, the shard
/// groups it touches, and terminal status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxnId,
    pub ops: Vec<Operation>,
    pub deps: Vec<TxnId>,
    pub shards: Vec<u32>,
    pub status: TxnStatus,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Transaction { id, ops: Vec::new(), deps: Vec::new(), shards: Vec::new(), status: TxnStatus::Active }
    }

    pub fn record_read(&mut self, key: Key, ts: Timestamp) {
        self.ops.push(Operation::Read { key, ts });
    }

    pub fn record_write(&mut self, key: Key, value: Value) {
        self.ops.push(Operation::Write { key, value });
    }

    /// Ordered (key, read_timestamp) view of the op log, append-only per
    /// spec §3's invariant on read_set/write_set.
    pub fn read_set(&self) -> Vec<(&Key, Timestamp)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Operation::Read { key, ts } => Some((key, *ts)),
                Operation::Write { .. } => None,
            })
            .collect()
    }

    pub fn write_set(&self) -> Vec<(&Key, &Value)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Operation::Write { key, value } => Some((key, value)),
                Operation::Read { .. } => None,
            })
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TxnStatus::Committed | TxnStatus::Aborted)
    }
}

/// A signed commit certificate (spec §4.9/§6: the `proof?`/`signature?`
/// fields on `ForwardReadResult`/`FinishValidateTxn`): a batched signature
/// (§4.3) over the certified message plus the public key it verifies
/// against, so a peer that hasn't already cached the signer's key can
/// still check the certificate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub signature: Vec<u8>,
    pub signer_public_key: Vec<u8>,
}

/// A speculative linearization candidate of a transaction's operations at
/// a replica (spec §4.8/GLOSSARY).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: TxnId,
    pub txn: Transaction,
    pub shards: Vec<u32>,
}

impl Branch {
    pub fn new(txn: Transaction) -> Self {
        let shards = txn.shards.clone();
        Branch { id: txn.id, txn, shards }
    }
}
