//! Cryptographic primitives (spec §4.3): per-message sign/verify sits
//! behind `keys`, the Merkle-tree batching scheme sits in `signer`. Hash
//! and asymmetric sign/verify themselves are out of scope per the spec's
//! Non-goals; `keys` is a thin seam over `ed25519-dalek` and `blake3`.

pub mod keys;
pub mod signer;

pub use keys::{Ed25519Signer, Ed25519Verifier, KeyVerifier, Signer};
pub use signer::{sign_batch, verify, VerifyOutcome};
