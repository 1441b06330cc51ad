//! Workload-specific replay parsing (spec §4.9). The actual SmallBank/
//! TPC-C/Retwis transaction logic is a workload generator and out of
//! scope (spec §1 Non-goals); what's in scope is the replay mechanism --
//! turning a `TxnState{name, data}` into a sequence of reads/writes
//! executed against a `ValidationClient`.

use serde_derive::{Deserialize, Serialize};

use crate::error::{CResult, Error};
use crate::net::message::TxnState;
use crate::protocol::txn::{Transaction, TxnId};
use crate::store::{Key, Value};
use crate::validation::client::ValidationClient;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadKind {
    SmallBank,
    TpcC,
    Retwis,
}

impl WorkloadKind {
    pub fn parse(name: &str) -> CResult<Self> {
        match name {
            "smallbank" => Ok(WorkloadKind::SmallBank),
            "tpcc" => Ok(WorkloadKind::TpcC),
            "retwis" => Ok(WorkloadKind::Retwis),
            other => Err(Error::ConfigInvalid(format!("unknown workload name: {other}"))),
        }
    }
}

/// One step of a transaction's replay, as encoded into `TxnState::data`
/// by the (out-of-scope) workload generator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ReplayStep {
    Read(Key),
    Write(Key, Value),
}

/// Replays `txn_state` against `validator`, producing the `Transaction`
/// the coordinator can diff against its own client-supplied state.
pub fn replay(txn_state: &TxnState, client_id: u64, seq: u64, validator: &ValidationClient) -> CResult<Transaction> {
    WorkloadKind::parse(&txn_state.name)?;
    let steps: Vec<ReplayStep> =
        bincode::deserialize(&txn_state.data).map_err(|e| Error::Parse(format!("bad txn_state payload: {e}")))?;

    let mut txn = Transaction::new(TxnId { client_id, client_seq_num: seq });
    for step in steps {
        match step {
            ReplayStep::Read(key) => {
                let (_value, ts) = validator.get(client_id, seq, &key);
                txn.record_read(key, ts);
            }
            ReplayStep::Write(key, value) => {
                validator.record_write(client_id, seq, key.clone(), value.clone());
                txn.record_write(key, value);
            }
        }
    }
    Ok(txn)
}
