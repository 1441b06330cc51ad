//! The transport seam (spec §1 Out-of-scope: "the network transport
//! abstraction, assumed to provide addressed message delivery and
//! deferred timers"). `Transport` is the contract every protocol module
//! is written against; `InProcessTransport` is an in-memory test double,
//! not a production transport.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{CResult, Error};
use crate::net::message::Message;

pub type Address = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub from: Address,
    pub to: Address,
    pub message: Message,
}

pub trait Transport: Send + Sync {
    fn send(&self, envelope: Envelope) -> CResult<()>;

    /// Delivers `envelope` to its destination no sooner than `after`.
    /// Used for the prepare-batch trigger and client retry backoff
    /// (spec §5).
    fn schedule_after(&self, after: Duration, envelope: Envelope);
}

/// Routes envelopes between addresses registered in this same process.
/// Delivery order per destination matches send order (spec §5: "within a
/// shard, messages are processed in transport-delivery order").
pub struct InProcessTransport {
    queues: Mutex<HashMap<Address, mpsc::UnboundedSender<Envelope>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        InProcessTransport { queues: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, address: Address) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.lock().expect("transport mutex poisoned").insert(address, tx);
        rx
    }
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InProcessTransport {
    fn send(&self, envelope: Envelope) -> CResult<()> {
        let queues = self.queues.lock().expect("transport mutex poisoned");
        let tx = queues
            .get(&envelope.to)
            .ok_or_else(|| Error::TransportFailure(format!("no receiver registered for address {}", envelope.to)))?;
        tx.send(envelope).map_err(|_| Error::TransportFailure("receiver dropped".to_string()))
    }

    fn schedule_after(&self, after: Duration, envelope: Envelope) {
        let queues = self.queues.lock().expect("transport mutex poisoned");
        let Some(tx) = queues.get(&envelope.to).cloned() else { return };
        drop(queues);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(envelope);
        });
    }
}
