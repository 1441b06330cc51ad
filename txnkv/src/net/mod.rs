//! Wire messages, the transport seam, and the message router (spec §4.4,
//! §6). The transport's actual network implementation is out of scope;
//! `transport::InProcessTransport` exists only as a test double.

pub mod message;
pub mod router;
pub mod transport;

pub use message::Message;
pub use router::{Receiver, Router};
pub use transport::{Address, Envelope, InProcessTransport, Transport};
