//! Batched Merkle-tree signer (spec §4.3).
//!
//! Amortizes one asymmetric signature across a whole batch of messages:
//! hash every message into a leaf, fold the leaves up a binary Merkle tree
//! with BLAKE3, sign only the root, then hand each message a proof of its
//! leaf's path to that root. Mirrors the array-form heap tree the original
//! batched-signature implementation builds (root at index 0, children of
//! node i at 2i+1/2i+2), generalized to non-power-of-two batch sizes the
//! same way: leaves always pair off adjacently regardless of whether N is
//! a power of two.

use crate::crypto::keys::{KeyVerifier, Signer};
use crate::error::{CResult, Error};

const HASH_LEN: usize = blake3::OUT_LEN;

fn hash_leaf(message: &[u8]) -> [u8; HASH_LEN] {
    blake3::hash(message).into()
}

fn hash_internal(left: &[u8], right: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

fn pack_u32(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

fn unpack_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Signs every message in `messages` with one underlying asymmetric
/// signature, returning one per-message batched signature in the same
/// order. `messages` must be non-empty.
pub fn sign_batch(signer: &dyn Signer, messages: &[Vec<u8>]) -> CResult<Vec<Vec<u8>>> {
    let n = messages.len();
    if n == 0 {
        return Err(Error::Internal("cannot batch-sign an empty message set".to_string()));
    }

    // Array-form heap tree: 2n - 1 nodes, leaves occupy [n-1, 2n-2].
    let mut tree = vec![[0u8; HASH_LEN]; 2 * n - 1];
    for (i, message) in messages.iter().enumerate() {
        tree[n - 1 + i] = hash_leaf(message);
    }
    let mut i = 2 * n as isize - 2;
    while i >= 2 {
        let parent = (i / 2 - 1) as usize;
        tree[parent] = hash_internal(&tree[(i - 1) as usize], &tree[i as usize]);
        i -= 2;
    }

    let root_sig = signer.sign(&tree[0]);

    let mut sigs = Vec::with_capacity(n);
    for i in 0..n {
        let mut sig = Vec::with_capacity(root_sig.len() + 8 + (n.ilog2() as usize + 1) * HASH_LEN);
        sig.extend_from_slice(&root_sig);
        sig.extend_from_slice(&pack_u32(n as u32));
        sig.extend_from_slice(&pack_u32(i as u32));

        // Walk from leaf n-1+i up to the root, appending each node's
        // sibling -- the verifier is assumed to already hold the hash of
        // the node itself and only needs the other half of each pair.
        let mut j = n - 1 + i;
        while j >= 1 {
            let sibling = if j % 2 == 0 { j - 1 } else { j + 1 };
            sig.extend_from_slice(&tree[sibling]);
            j = (j + 1) / 2 - 1;
        }
        sigs.push(sig);
    }
    Ok(sigs)
}

/// Outcome of verifying one batched signature against a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    Invalid,
    Tampered,
}

/// Verifies `sig` (as produced by `sign_batch`) against `message`,
/// reconstructing the claimed Merkle root and checking the root signature.
/// `root_sig_len` is the length in bytes of the underlying asymmetric
/// signature (fixed per verifier implementation, e.g. 64 for ed25519).
pub fn verify(
    verifier: &dyn KeyVerifier,
    public_key: &[u8],
    message: &[u8],
    sig: &[u8],
    root_sig_len: usize,
) -> VerifyOutcome {
    if sig.len() < root_sig_len + 8 {
        return VerifyOutcome::Tampered;
    }
    let root_sig = &sig[..root_sig_len];
    let n = unpack_u32(&sig[root_sig_len..root_sig_len + 4]);
    let i = unpack_u32(&sig[root_sig_len + 4..root_sig_len + 8]);
    if n == 0 || i >= n {
        return VerifyOutcome::Tampered;
    }

    let path_start = root_sig_len + 8;
    let siblings = &sig[path_start..];
    if siblings.len() % HASH_LEN != 0 {
        return VerifyOutcome::Tampered;
    }

    let mut node = hash_leaf(message);
    let mut j = (n - 1 + i) as usize;
    let mut offset = 0;
    while j >= 1 {
        if offset + HASH_LEN > siblings.len() {
            return VerifyOutcome::Tampered;
        }
        let sibling = &siblings[offset..offset + HASH_LEN];
        node = if j % 2 == 0 { hash_internal(sibling, &node) } else { hash_internal(&node, sibling) };
        offset += HASH_LEN;
        j = (j + 1) / 2 - 1;
    }
    if offset != siblings.len() {
        return VerifyOutcome::Tampered;
    }

    if verifier.verify(&node, root_sig, public_key) {
        VerifyOutcome::Valid
    } else {
        VerifyOutcome::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{Ed25519Signer, Ed25519Verifier, Signer as _};

    const ED25519_SIG_LEN: usize = 64;

    #[test]
    fn singleton_batch_has_empty_path() {
        let signer = Ed25519Signer::generate();
        let messages = vec![b"only".to_vec()];
        let sigs = sign_batch(&signer, &messages).unwrap();
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].len(), ED25519_SIG_LEN + 8);
        assert_eq!(
            verify(&Ed25519Verifier, &signer.public_key(), &messages[0], &sigs[0], ED25519_SIG_LEN),
            VerifyOutcome::Valid
        );
    }

    #[test]
    fn three_message_batch_verifies_each_at_its_index() {
        let signer = Ed25519Signer::generate();
        let messages: Vec<Vec<u8>> = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let sigs = sign_batch(&signer, &messages).unwrap();
        for (i, message) in messages.iter().enumerate() {
            assert_eq!(
                verify(&Ed25519Verifier, &signer.public_key(), message, &sigs[i], ED25519_SIG_LEN),
                VerifyOutcome::Valid,
                "message {i} failed to verify"
            );
        }
    }

    #[test]
    fn signature_does_not_verify_against_wrong_message_in_batch() {
        let signer = Ed25519Signer::generate();
        let messages: Vec<Vec<u8>> = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()];
        let sigs = sign_batch(&signer, &messages).unwrap();
        assert_ne!(
            verify(&Ed25519Verifier, &signer.public_key(), &messages[1], &sigs[0], ED25519_SIG_LEN),
            VerifyOutcome::Valid
        );
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let signer = Ed25519Signer::generate();
        let messages: Vec<Vec<u8>> = vec![b"a".to_vec(), b"b".to_vec()];
        let mut sigs = sign_batch(&signer, &messages).unwrap();
        let last = sigs[0].len() - 1;
        sigs[0][last] ^= 0xFF;
        assert_ne!(
            verify(&Ed25519Verifier, &signer.public_key(), &messages[0], &sigs[0], ED25519_SIG_LEN),
            VerifyOutcome::Valid
        );
    }

    #[test]
    fn empty_batch_is_rejected() {
        let signer = Ed25519Signer::generate();
        assert!(sign_batch(&signer, &[]).is_err());
    }
}
