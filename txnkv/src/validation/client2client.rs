//! Peer-to-peer coordination (spec §4.10): liveness pings, and the
//! BeginValidate/ForwardRead/FinishValidate messages that drive the
//! validation subsystem across coordinators.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::crypto::keys::Signer;
use crate::error::CResult;
use crate::net::message::{Message, Ping, ValidationMessage};
use crate::net::transport::{Address, Envelope, Transport};
use crate::protocol::txn::Proof;
use crate::validation::client::ValidationClient;
use crate::validation::workload;

pub struct ClientToClient {
    address: Address,
    epoch: u64,
    transport: Arc<dyn Transport>,
    validator: Arc<ValidationClient>,
    peers: Vec<Address>,
    /// Peers with a replay worker currently running -- spec §4.9/§5: one
    /// validation at a time per peer.
    validating: Arc<Mutex<HashSet<Address>>>,
    /// Signs the replayed transaction into the `FinishValidateTxn` commit
    /// certificate (spec §4.9, `Proof`).
    signer: Arc<dyn Signer>,
}

impl ClientToClient {
    pub fn new(address: Address, peers: Vec<Address>, transport: Arc<dyn Transport>, signer: Arc<dyn Signer>) -> Self {
        ClientToClient {
            address,
            epoch: 0,
            transport,
            validator: Arc::new(ValidationClient::new()),
            peers: peers.into_iter().filter(|p| *p != address).collect(),
            validating: Arc::new(Mutex::new(HashSet::new())),
            signer,
        }
    }

    pub fn ping_peers(&self) -> CResult<()> {
        for peer in &self.peers {
            self.transport.send(Envelope {
                from: self.address,
                to: *peer,
                message: Message::Health(Ping { sender_id: self.address, epoch: self.epoch }),
            })?;
        }
        Ok(())
    }

    pub fn handle(&mut self, from: Address, message: ValidationMessage) -> CResult<()> {
        match message {
            ValidationMessage::BeginValidateTxn { client_id, seq, txn_state } => self.begin_validate(from, client_id, seq, txn_state),
            ValidationMessage::ForwardReadResult { client_id, seq, key, value, ts, proof: _ } => {
                self.validator.forward_read_result(client_id, seq, key, value, ts);
                Ok(())
            }
            ValidationMessage::FinishValidateTxn { .. } => Ok(()),
        }
    }

    /// Spawns the one-worker-per-peer replay thread (spec §5). Drops the
    /// request if this peer already has a validation in flight.
    fn begin_validate(&mut self, from: Address, client_id: u64, seq: u64, txn_state: crate::net::message::TxnState) -> CResult<()> {
        {
            let mut validating = self.validating.lock().expect("validating-set mutex poisoned");
            if !validating.insert(from) {
                return Ok(());
            }
        }

        let validator = self.validator.clone();
        let transport = self.transport.clone();
        let validating = self.validating.clone();
        let signer = self.signer.clone();
        let address = self.address;
        std::thread::spawn(move || {
            validator.reset();
            let result = workload::replay(&txn_state, client_id, seq, &validator);
            if let Ok(txn) = result {
                let signature = bincode::serialize(&txn).ok().map(|bytes| Proof {
                    signature: signer.sign(&bytes),
                    signer_public_key: signer.public_key(),
                });
                let _ = transport.send(Envelope {
                    from: address,
                    to: from,
                    message: Message::Validation(ValidationMessage::FinishValidateTxn { client_id, txn, signature }),
                });
            }
            validating.lock().expect("validating-set mutex poisoned").remove(&from);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{Ed25519Signer, Ed25519Verifier, KeyVerifier};
    use crate::net::transport::InProcessTransport;
    use crate::net::message::TxnState;
    use crate::validation::workload::ReplayStep;
    use std::time::Duration;

    fn signer() -> Arc<dyn Signer> {
        Arc::new(Ed25519Signer::generate())
    }

    #[test]
    fn ping_skips_self() {
        let transport = Arc::new(InProcessTransport::new());
        let _rx1 = transport.register(1);
        let _rx2 = transport.register(2);
        let c2c = ClientToClient::new(1, vec![1, 2, 3], transport, signer());
        assert_eq!(c2c.peers, vec![2, 3]);
    }

    #[test]
    fn begin_validate_eventually_replies_with_a_verifiable_proof() {
        let transport = Arc::new(InProcessTransport::new());
        let mut rx = transport.register(1);
        let mut c2c = ClientToClient::new(1, vec![], transport, signer());

        let steps: Vec<ReplayStep> = vec![ReplayStep::Write(b"k".to_vec(), b"v".to_vec())];
        let txn_state = TxnState { name: "retwis".to_string(), data: bincode::serialize(&steps).unwrap() };
        c2c.handle(2, ValidationMessage::BeginValidateTxn { client_id: 2, seq: 1, txn_state }).unwrap();

        let envelope = tokio_test_recv(&mut rx);
        let Message::Validation(ValidationMessage::FinishValidateTxn { txn, signature, .. }) = envelope.message else {
            panic!("expected FinishValidateTxn, got {:?}", envelope.message);
        };
        let proof = signature.expect("replay should have produced a proof");
        let bytes = bincode::serialize(&txn).unwrap();
        assert!(Ed25519Verifier.verify(&bytes, &proof.signature, &proof.signer_public_key));
    }

    fn tokio_test_recv(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Envelope>) -> Envelope {
        for _ in 0..200 {
            if let Ok(envelope) = rx.try_recv() {
                return envelope;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for FinishValidateTxn");
    }
}
