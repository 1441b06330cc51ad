//! The four transactional state machines (spec §4.5-§4.8) and the shared
//! transaction/branch data model (§3) and `StateMachine`/`Protocol` seam
//! (§9) they're built against.

pub mod branch;
pub mod depgraph;
pub mod occ;
pub mod sm;
pub mod twopc;
pub mod txn;

pub use sm::{Protocol, StateMachine};
pub use txn::{Branch, Operation, Transaction, TxnId, TxnStatus};
