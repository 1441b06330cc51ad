//! Per-replica assembly (spec §9 "replica-scoped state, no process-wide
//! statics"): wires a `VersionedStore`, a `TimestampOracle`, the
//! configured `Protocol` state machine, a `Transport` handle, and a
//! batched-signature keypair into one addressable unit. `txnkv-server`
//! owns one `Replica` per process; nothing here is shared across
//! replicas except through the `Transport` they're both handed.

use std::sync::Arc;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::crypto::keys::{Ed25519Signer, Signer};
use crate::error::{CResult, Error};
use crate::net::message::Message;
use crate::net::router::Receiver;
use crate::net::transport::{Address, Transport};
use crate::protocol::branch::BranchStateMachine;
use crate::protocol::depgraph::DepGraphStateMachine;
use crate::protocol::occ::OccStateMachine;
use crate::protocol::sm::{Protocol, StateMachine};
use crate::protocol::twopc::{ConcurrencyMode, TwoPcStateMachine};
use crate::store::{TimestampOracle, VersionedStore};

/// Which of the four concurrency-control protocols a replica runs, as
/// selected by `txnkv-server --protocol`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolKind {
    OccLinearizable,
    TwoPcLock,
    TwoPcOcc,
    DepGraph,
    Branch,
}

impl ProtocolKind {
    /// Parses `--protocol`'s value (spec.md §6:
    /// `{occ-linearizable, 2pc-ss, dep-graph, branch, weak}`).
    /// `2pc-ss` defaults to lock-based concurrency control;
    /// `--concurrency_mode occ` selects the OCC variant of the same
    /// strict-serializable protocol.
    pub fn parse(name: &str, concurrency_mode: Option<&str>) -> CResult<Self> {
        match name {
            "occ-linearizable" => Ok(ProtocolKind::OccLinearizable),
            "2pc-ss" => match concurrency_mode {
                Some("occ") => Ok(ProtocolKind::TwoPcOcc),
                None | Some("lock") => Ok(ProtocolKind::TwoPcLock),
                Some(other) => Err(Error::ConfigInvalid(format!("unknown concurrency_mode: {other}"))),
            },
            "dep-graph" => Ok(ProtocolKind::DepGraph),
            // `weak` (spec.md §6) is the speculative-branch protocol's
            // weaker-than-serializable isolation level, not a fifth SM.
            "branch" | "weak" => Ok(ProtocolKind::Branch),
            other => Err(Error::ConfigInvalid(format!("unknown protocol: {other}"))),
        }
    }
}

/// Startup parameters for one replica, a subset of spec.md §6's CLI flags
/// (`--stats_file` and the shard/partition flags are `txnkv-server`'s
/// concern, not this struct's).
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    pub address: Address,
    pub protocol: ProtocolKind,
    pub clock_skew: Duration,
    pub clock_error: Duration,
}

/// In-flight and terminal transaction counts, dumped as JSON by
/// `txnkv-server --stats_file` on exit or SIGTERM/SIGINT.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStats {
    pub prepared: usize,
    pub committed: usize,
    pub aborted: usize,
}

/// One replica process's state: the active protocol state machine plus
/// the signing identity it uses for batched commit certificates (spec
/// §4.3, §4.9's `Proof`).
pub struct Replica {
    address: Address,
    signer: Ed25519Signer,
    protocol: Protocol,
}

impl Replica {
    pub fn new(config: ReplicaConfig, transport: Arc<dyn Transport>) -> Self {
        let oracle = TimestampOracle::new(config.address, config.clock_skew, config.clock_error);
        let store = VersionedStore::new();
        let protocol = match config.protocol {
            ProtocolKind::OccLinearizable => {
                Protocol::OccLinearizable(OccStateMachine::new(config.address, store, transport))
            }
            ProtocolKind::TwoPcLock => Protocol::TwoPcStrictSerializable(TwoPcStateMachine::new(
                config.address,
                ConcurrencyMode::Lock,
                store,
                oracle,
                transport,
            )),
            ProtocolKind::TwoPcOcc => Protocol::TwoPcStrictSerializable(TwoPcStateMachine::new(
                config.address,
                ConcurrencyMode::Occ,
                store,
                oracle,
                transport,
            )),
            ProtocolKind::DepGraph => Protocol::DepGraph(DepGraphStateMachine::new(config.address, store, transport)),
            ProtocolKind::Branch => Protocol::Branch(BranchStateMachine::new(config.address, store, oracle, transport)),
        };
        Replica { address: config.address, signer: Ed25519Signer::generate(), protocol }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// The public half of this replica's batched-signature keypair, for
    /// peers to register before verifying this replica's `Proof`s.
    pub fn public_key(&self) -> Vec<u8> {
        self.signer.public_key()
    }

    pub fn signer(&self) -> &dyn Signer {
        &self.signer
    }

    /// Replays persisted replication-log state. A no-op for every
    /// protocol except 2PC's primary/backup log.
    pub fn load(&mut self) -> CResult<()> {
        self.protocol.load()
    }

    /// Drives timer-based behavior (the branch protocol's prepare-batch
    /// trigger). Callers run this on an interval.
    pub fn tick(&mut self) -> CResult<()> {
        self.protocol.tick()
    }

    pub fn stats(&self) -> ReplicaStats {
        self.protocol.stats()
    }
}

impl Receiver for Replica {
    fn receive(&mut self, from: Address, message: Message) -> CResult<()> {
        self.protocol.handle_message(from, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::message::OccMessage;
    use crate::net::router::Router;
    use crate::net::transport::InProcessTransport;
    use crate::protocol::txn::{Transaction, TxnId};

    fn config(protocol: ProtocolKind) -> ReplicaConfig {
        ReplicaConfig { address: 1, protocol, clock_skew: Duration::ZERO, clock_error: Duration::ZERO }
    }

    #[test]
    fn unknown_protocol_name_is_rejected() {
        assert!(ProtocolKind::parse("quantum-consensus", None).is_err());
    }

    #[test]
    fn two_pc_ss_defaults_to_lock_mode() {
        assert_eq!(ProtocolKind::parse("2pc-ss", None).unwrap(), ProtocolKind::TwoPcLock);
        assert_eq!(ProtocolKind::parse("2pc-ss", Some("occ")).unwrap(), ProtocolKind::TwoPcOcc);
    }

    #[test]
    fn weak_is_an_alias_for_the_branch_protocol() {
        assert_eq!(ProtocolKind::parse("weak", None).unwrap(), ProtocolKind::Branch);
    }

    #[test]
    fn fresh_replica_reports_empty_stats() {
        let transport = Arc::new(InProcessTransport::new());
        let replica = Replica::new(config(ProtocolKind::OccLinearizable), transport);
        assert_eq!(replica.stats(), ReplicaStats::default());
    }

    #[test]
    fn router_dispatches_into_the_configured_protocol() {
        let transport = Arc::new(InProcessTransport::new());
        let _rx = transport.register(99);
        let replica = Replica::new(config(ProtocolKind::OccLinearizable), transport);
        let mut router = Router::new(replica);

        let mut txn = Transaction::new(TxnId { client_id: 1, client_seq_num: 0 });
        txn.record_write(b"k".to_vec(), b"v".to_vec());
        router.dispatch_bytes(99, &bincode::serialize(&Message::Occ(OccMessage::Prepare { txn })).unwrap()).unwrap();

        assert_eq!(router.into_inner().stats().prepared, 1);
    }

    #[test]
    fn two_pc_replica_loads_without_error() {
        let transport = Arc::new(InProcessTransport::new());
        let mut replica = Replica::new(config(ProtocolKind::TwoPcLock), transport);
        replica.load().unwrap();
    }
}
