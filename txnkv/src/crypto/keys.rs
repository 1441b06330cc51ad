//! Asymmetric sign/verify primitives. Treated as a black box by the rest
//! of the crate (spec Non-goals): everything above this module only calls
//! through the `Signer`/`Verifier` seams, never touches `ed25519_dalek`
//! directly.

use ed25519_dalek::{Keypair, PublicKey, Signature, Signer as DalekSigner, Verifier as DalekVerifier};
use rand_core05::OsRng;

use crate::error::{CResult, Error};

pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> Vec<u8>;
    fn public_key(&self) -> Vec<u8>;
}

pub trait KeyVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool;
}

/// Ed25519 keypair wrapper. Generated fresh per replica/client at startup;
/// the spec does not mandate a persisted key store.
pub struct Ed25519Signer {
    keypair: Keypair,
}

impl Ed25519Signer {
    pub fn generate() -> Self {
        let mut csprng = OsRng {};
        Ed25519Signer { keypair: Keypair::generate(&mut csprng) }
    }

    pub fn from_bytes(secret_and_public: &[u8]) -> CResult<Self> {
        let keypair = Keypair::from_bytes(secret_and_public)
            .map_err(|e| Error::ConfigInvalid(format!("invalid ed25519 keypair bytes: {e}")))?;
        Ok(Ed25519Signer { keypair })
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.keypair.sign(message).to_bytes().to_vec()
    }

    fn public_key(&self) -> Vec<u8> {
        self.keypair.public.as_bytes().to_vec()
    }
}

#[derive(Default)]
pub struct Ed25519Verifier;

impl KeyVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let (Ok(sig), Ok(pk)) = (Signature::from_bytes(signature), PublicKey::from_bytes(public_key)) else {
            return false;
        };
        pk.verify(message, &sig).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"hello");
        assert!(Ed25519Verifier.verify(b"hello", &sig, &signer.public_key()));
        assert!(!Ed25519Verifier.verify(b"goodbye", &sig, &signer.public_key()));
    }
}
