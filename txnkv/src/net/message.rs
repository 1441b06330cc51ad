//! The wire message catalog (spec §6) and its outer tagged envelope.
//!
//! Per the design notes, the router decodes once into this sum type and
//! dispatches by variant match rather than comparing type-name strings
//! per message.

use serde_derive::{Deserialize, Serialize};

use crate::protocol::txn::{Branch, Proof, Transaction, TxnId};
use crate::store::{Key, Timestamp, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Ok,
    Conflict,
    Retry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccMessage {
    Prepare { txn: Transaction },
    PrepareReply { id: TxnId, vote: Vote },
    Commit { id: TxnId, ts: Timestamp },
    Abort { id: TxnId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TwoPcMessage {
    Prepare { txn: Transaction },
    PrepareReply { id: TxnId, vote: Vote, proposed_ts: Option<Timestamp> },
    Commit { id: TxnId, ts: Timestamp },
    Abort { id: TxnId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepStatus {
    Ok,
    NotOk,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepGraphMessage {
    PreAccept { txn: Transaction, ballot: u64 },
    PreAcceptReply { id: TxnId, deps: Vec<TxnId>, status: DepStatus },
    Accept { id: TxnId, deps: Vec<TxnId>, ballot: u64 },
    AcceptReply { id: TxnId, status: DepStatus },
    Commit { id: TxnId, deps: Vec<TxnId> },
    Inquire { id: TxnId },
    InquireReply { id: TxnId, status: DepStatus, deps: Vec<TxnId> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchMessage {
    Read { branch: Branch, key: Key, ts: Timestamp },
    Write { branch: Branch, key: Key, value: Value, ts: Timestamp },
    ReadReply { branch: Branch, key: Key, value: Option<Value> },
    WriteReply { branch: Branch, key: Key, value: Value },
    Prepare { branch: Branch },
    PrepareOk { branch: Branch },
    PrepareKo { branch: Branch },
    Ko { branch: Branch },
    Commit { branch: Branch },
    Abort { branch: Branch },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnState {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationMessage {
    BeginValidateTxn { client_id: u64, seq: u64, txn_state: TxnState },
    ForwardReadResult { client_id: u64, seq: u64, key: Key, value: Option<Value>, ts: Timestamp, proof: Option<Proof> },
    FinishValidateTxn { client_id: u64, txn: Transaction, signature: Option<Proof> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub sender_id: u64,
    pub epoch: u64,
}

/// Outer tagged sum of every message this crate speaks. `Message` is what
/// `net::router` decodes into and what every `protocol::StateMachine`
/// implementation's `handle_message` receives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Occ(OccMessage),
    TwoPc(TwoPcMessage),
    DepGraph(DepGraphMessage),
    Branch(BranchMessage),
    Validation(ValidationMessage),
    Health(Ping),
}
