//! Crate-wide error type.
//!
//! Variants split into two groups: the ambient kinds inherited from the
//! teacher's storage/codec conventions (`Internal`, `Parse`, `Io`), and
//! the protocol-facing kinds from the error handling design
//! (`ConfigInvalid`, `StaleMessage`, `ProtocolViolation`,
//! `StorageConflict`, `TransportFailure`, `SignatureInvalid`,
//! `DependencyCycleTimeout`). Protocol errors carry the offending
//! transaction id so callers can log or abort without re-deriving it.

use crate::store::version::TxnId;

pub type CResult<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Message for a transaction that already reached a terminal status;
    /// the caller should drop it silently.
    #[error("stale message for txn {0:?}")]
    StaleMessage(TxnId),

    /// Safety-relevant violation; unrecoverable, the replica holding this
    /// should terminate rather than continue.
    #[error("protocol violation on txn {0:?}: {1}")]
    ProtocolViolation(TxnId, String),

    /// Returned as a protocol-level CONFLICT/KO, never fatal.
    #[error("storage conflict on txn {0:?}: {1}")]
    StorageConflict(TxnId, String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("signature invalid for txn {0:?}")]
    SignatureInvalid(TxnId),

    #[error("dependency cycle did not resolve in time, aborting txn {0:?}")]
    DependencyCycleTimeout(TxnId),
}

impl Error {
    /// True for errors that should be reported back to the client as a
    /// retryable protocol outcome rather than terminate the replica.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::StaleMessage(_)
                | Error::StorageConflict(_, _)
                | Error::SignatureInvalid(_)
                | Error::TransportFailure(_)
                | Error::DependencyCycleTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        let id = TxnId { client_id: 1, client_seq_num: 1 };
        assert!(Error::StaleMessage(id).is_recoverable());
        assert!(!Error::ProtocolViolation(id, "bad".into()).is_recoverable());
    }
}
