//! Cross-client transaction validation (spec §4.9, §4.10).

pub mod client;
pub mod client2client;
pub mod workload;

pub use client::ValidationClient;
pub use client2client::ClientToClient;
pub use workload::{ReplayStep, WorkloadKind};
