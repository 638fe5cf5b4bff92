//! # Time-Lock Encoder
//!
//! Wraps each share in a second, computation-bounded lock, independent of
//! the sharing threshold. The seal is AES-256-GCM under a key that exists
//! in exactly two places: the [`TrapdoorVault`] (until the daemon destroys
//! it at expiry) and the tail of a sequential hash chain (see [`puzzle`])
//! that costs more wall-clock time to walk than the fragment lives.
//!
//! This is defense-in-depth. The sharing layer already guarantees that
//! fewer than `k` fragments reveal nothing; the time-lock additionally
//! guarantees that even a *complete* set of exfiltrated ciphertexts is
//! useless to an attacker who grabbed them before the daemon's overwrite
//! but holds no trapdoor.
//!
//! ## Seal format
//!
//! `seal()` returns `nonce || ciphertext` as a single buffer — 12 random
//! nonce bytes, then ciphertext with the 16-byte GCM tag appended. The AAD
//! binds the fragment's identity (id, session, index, expiry), so a sealed
//! share cannot be replayed under a different fragment record without the
//! tag check failing.
//!
//! Decryption errors are deliberately vague. The difference between "wrong
//! key" and "tampered ciphertext" is none of the attacker's business.

pub mod puzzle;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use dashmap::DashMap;
use rand::RngCore;
use thiserror::Error;
use tracing::debug;

use crate::config::AES_NONCE_LENGTH;
use crate::fragment::FragmentId;

pub use puzzle::{TimeLockPuzzle, TrapdoorKey};

/// Errors from the seal layer.
#[derive(Debug, Error)]
pub enum TimeLockError {
    #[error("sealing failed")]
    SealFailed,

    #[error("unsealing failed -- wrong key, wrong binding, or corrupted ciphertext")]
    OpenFailed,

    #[error("sealed payload too short: must be at least {AES_NONCE_LENGTH} bytes")]
    PayloadTooShort,
}

/// Encrypt share bytes under a trapdoor key with identity-binding AAD.
///
/// Returns `nonce || ciphertext`. The nonce is random per seal; with one
/// seal per fragment and fresh keys per fragment, nonce reuse is not a
/// concern, but random nonces keep the construction misuse-resistant if
/// someone ever reseals.
pub fn seal(key: &TrapdoorKey, share_bytes: &[u8], aad: &[u8]) -> Result<Vec<u8>, TimeLockError> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| TimeLockError::SealFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: share_bytes,
                aad,
            },
        )
        .map_err(|_| TimeLockError::SealFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a sealed share. The AAD must match the values used at seal time
/// byte for byte, or authentication fails — any mismatch means tampering
/// or a ciphertext swapped between fragments.
pub fn open(key: &TrapdoorKey, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, TimeLockError> {
    if sealed.len() < AES_NONCE_LENGTH {
        return Err(TimeLockError::PayloadTooShort);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(AES_NONCE_LENGTH);
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| TimeLockError::OpenFailed)?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| TimeLockError::OpenFailed)
}

// ---------------------------------------------------------------------------
// TrapdoorVault
// ---------------------------------------------------------------------------

/// In-memory custody of trapdoor keys, one per live fragment.
///
/// The vault is the "instant" unlock path of the two-way contract. Keys go
/// in at fragmentation, come out (cloned) for authorized reconstruction,
/// and are scrubbed-then-removed by the daemon at expiry. Destruction is
/// idempotent — scrubbing a key that is already gone is a no-op, because
/// the daemon will legitimately retry.
#[derive(Debug, Default)]
pub struct TrapdoorVault {
    keys: DashMap<FragmentId, TrapdoorKey>,
}

impl TrapdoorVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposit a fragment's trapdoor. Overwrites silently if the id is
    /// somehow reused; ids are UUIDv4, so it isn't.
    pub fn deposit(&self, fragment: FragmentId, key: TrapdoorKey) {
        self.keys.insert(fragment, key);
    }

    /// Clone out the trapdoor for a live fragment. `None` after destruction
    /// — which is precisely what makes post-expiry reconstruction
    /// impossible through this path.
    pub fn fetch(&self, fragment: &FragmentId) -> Option<TrapdoorKey> {
        self.keys.get(fragment).map(|k| k.clone())
    }

    /// Destroy a trapdoor: overwrite the key bytes in place, then drop the
    /// entry. Returns `true` if a key was present.
    pub fn destroy(&self, fragment: &FragmentId) -> bool {
        if let Some(mut entry) = self.keys.get_mut(fragment) {
            entry.scrub();
        } else {
            return false;
        }
        self.keys.remove(fragment);
        debug!(fragment = %fragment, "trapdoor destroyed");
        true
    }

    /// Number of live trapdoors.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_pair() -> (TimeLockPuzzle, TrapdoorKey) {
        TimeLockPuzzle::generate(64)
    }

    #[test]
    fn seal_open_round_trip() {
        let (_, key) = key_pair();
        let aad = b"fragment-binding";
        let sealed = seal(&key, b"share bytes", aad).unwrap();
        let opened = open(&key, &sealed, aad).unwrap();
        assert_eq!(opened, b"share bytes");
    }

    #[test]
    fn wrong_key_fails() {
        let (_, key) = key_pair();
        let (_, other) = key_pair();
        let sealed = seal(&key, b"secret share", b"aad").unwrap();
        assert!(open(&other, &sealed, b"aad").is_err());
    }

    #[test]
    fn wrong_aad_fails() {
        let (_, key) = key_pair();
        let sealed = seal(&key, b"secret share", b"fragment A").unwrap();
        assert!(open(&key, &sealed, b"fragment B").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (_, key) = key_pair();
        let mut sealed = seal(&key, b"secret share", b"aad").unwrap();
        sealed[AES_NONCE_LENGTH + 1] ^= 0x80;
        assert!(open(&key, &sealed, b"aad").is_err());
    }

    #[test]
    fn truncated_payload_fails() {
        let (_, key) = key_pair();
        assert!(matches!(
            open(&key, &[0u8; 4], b"aad"),
            Err(TimeLockError::PayloadTooShort)
        ));
    }

    #[test]
    fn sealed_length_is_nonce_plus_tag_overhead() {
        let (_, key) = key_pair();
        let sealed = seal(&key, b"0123456789", b"").unwrap();
        assert_eq!(sealed.len(), AES_NONCE_LENGTH + 10 + 16);
    }

    #[test]
    fn solved_puzzle_opens_the_seal() {
        // The attacker path: no vault, walk the chain, open the seal.
        let (puzzle, key) = TimeLockPuzzle::generate(512);
        let sealed = seal(&key, b"locked share", b"id").unwrap();

        let solved = puzzle.solve();
        let opened = open(&solved, &sealed, b"id").unwrap();
        assert_eq!(opened, b"locked share");
    }

    #[test]
    fn vault_deposit_fetch_destroy() {
        let vault = TrapdoorVault::new();
        let fragment = FragmentId::generate();
        let (_, key) = key_pair();

        vault.deposit(fragment, key.clone());
        assert_eq!(vault.fetch(&fragment), Some(key));

        assert!(vault.destroy(&fragment));
        assert_eq!(vault.fetch(&fragment), None);
        assert!(vault.is_empty());
    }

    #[test]
    fn vault_destroy_is_idempotent() {
        let vault = TrapdoorVault::new();
        let fragment = FragmentId::generate();
        let (_, key) = key_pair();

        vault.deposit(fragment, key);
        assert!(vault.destroy(&fragment));
        assert!(!vault.destroy(&fragment));
        assert!(!vault.destroy(&FragmentId::generate()));
    }
}
