//! # Engine Configuration & Constants
//!
//! Every magic number in TESSERA lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Several of these values are security parameters, not tuning knobs.
//! Changing `ASSUMED_ADVERSARY_HASH_RATE` or `TIMELOCK_SAFETY_FACTOR` changes
//! how long an exfiltrated ciphertext survives an offline attacker, so treat
//! edits here like you would treat edits to a key length.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Engine Identity
// ---------------------------------------------------------------------------

/// Engine fingerprint embedded in audit exports and the node banner.
/// Identifies the TESSERA engine family and build generation.
pub const ENGINE_FINGERPRINT: &str = "ALAS-TESSERA-2026";

/// The engine version string, assembled at compile time so we don't
/// allocate for something this trivial at runtime.
pub const ENGINE_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// AES-256-GCM for the time-lock seal. 256-bit keys, 96-bit nonces,
/// 128-bit authentication tags.
pub const SEAL_ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 96 bits is the standard and the only
/// length you should use. 12 bytes. Not 16. Not 8. Twelve.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Hash output length in bytes. Both SHA-256 (puzzle chain) and BLAKE3
/// (validation hashes, checksums, commitments) produce 32-byte digests.
pub const HASH_OUTPUT_LENGTH: usize = 32;

/// Ed25519 signature length for audit records. Always 64 bytes. If yours
/// isn't, something has gone terribly wrong.
pub const SIGNATURE_LENGTH: usize = 64;

/// Maximum shares per session. Share indices are nonzero elements of
/// GF(256), so 255 is a hard mathematical ceiling, not a policy choice.
pub const MAX_SHARES: u8 = 255;

// ---------------------------------------------------------------------------
// Time-Lock Calibration
// ---------------------------------------------------------------------------

/// Assumed adversary throughput for the sequential puzzle chain, in SHA-256
/// invocations per second on a single chain. 2^30/s is a generous estimate
/// for a dedicated ASIC pipeline — the chain is strictly sequential, so
/// parallel hardware buys an attacker nothing.
///
/// Deployment-tunable. Re-derive with `tessera-node calibrate` and your own
/// threat model before trusting long expiry windows.
pub const ASSUMED_ADVERSARY_HASH_RATE: u64 = 1 << 30;

/// Multiplier applied on top of the adversary model when sizing puzzle
/// iteration counts. The puzzle must outlive the fragment even if the
/// adversary model is off by this factor.
pub const TIMELOCK_SAFETY_FACTOR: u64 = 4;

/// Floor on puzzle iterations regardless of how short the fragment
/// lifetime is. Keeps degenerate sub-second policies from producing
/// puzzles solvable in a handful of hash calls.
pub const MIN_PUZZLE_ITERATIONS: u64 = 1 << 16;

/// Ceiling on puzzle iterations the controller will pay for at issuance.
///
/// A sequential-hash puzzle costs its issuer the same chain walk it costs
/// a solver (that is a proven lower bound for hash-based time-locks, not
/// an implementation shortcut we missed), so the calibrated count is
/// clamped here and the clamp is logged. The temporal guarantee proper
/// rests on trapdoor destruction; the puzzle buys a bounded head start
/// against exfiltrated ciphertext. Deployments wanting issuer-cheap
/// multi-hour puzzles need a hidden-order-group construction and the
/// big-integer stack that comes with it.
pub const ISSUANCE_BUDGET_ITERATIONS: u64 = 1 << 22;

// ---------------------------------------------------------------------------
// Expiry Enforcement
// ---------------------------------------------------------------------------

/// Default daemon poll interval. One second keeps the gap between logical
/// expiry and physical destruction tight without burning CPU on idle scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of pseudorandom overwrite passes during secure erasure.
pub const DEFAULT_ERASE_PASSES: u32 = 7;

/// Maximum attempts to confirm a storage overwrite before the daemon
/// escalates to `DeletionConfirmationFailed`.
pub const DELETION_MAX_ATTEMPTS: u32 = 5;

/// Initial backoff between deletion retries. Doubles per attempt.
pub const DELETION_INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Grace period for confirming a deletion. An overwrite still unconfirmed
/// past this window is a violation of the temporal guarantee, not a soft
/// failure.
pub const DELETION_GRACE_PERIOD: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Validation Network
// ---------------------------------------------------------------------------

/// Default per-query timeout for validator fan-out. Slow validators never
/// block a freshness decision past this bound.
pub const DEFAULT_QUORUM_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bounded retry budget for quorum failures. Quorum failures are
/// network-level and retryable; security-boundary failures are not.
pub const DEFAULT_QUORUM_RETRIES: u32 = 3;

/// Default backoff between quorum retry attempts.
pub const DEFAULT_QUORUM_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Majority quorum for `m` validators: `floor(m/2) + 1`.
///
/// This is a crash-fault-tolerant read quorum, not Byzantine consensus.
/// With `m > 2f`, up to `f` unreachable validators still leave a majority
/// able to answer.
pub const fn quorum_size(validators: usize) -> usize {
    validators / 2 + 1
}

/// Crash faults tolerated by a majority quorum over `m` validators.
pub const fn tolerable_faults(validators: usize) -> usize {
    validators.saturating_sub(1) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_size_majority() {
        assert_eq!(quorum_size(1), 1);
        assert_eq!(quorum_size(3), 2);
        assert_eq!(quorum_size(4), 3);
        assert_eq!(quorum_size(5), 3);
        assert_eq!(quorum_size(7), 4);
    }

    #[test]
    fn test_quorum_tolerates_stated_faults() {
        // For every m, losing `tolerable_faults(m)` validators must still
        // leave at least a quorum reachable.
        for m in 1..=25usize {
            let f = tolerable_faults(m);
            assert!(m - f >= quorum_size(m), "m={m} f={f}");
            assert!(m > 2 * f, "m={m} f={f}");
        }
    }

    #[test]
    fn test_crypto_parameter_sizes() {
        assert_eq!(AES_KEY_LENGTH, 32);
        assert_eq!(AES_NONCE_LENGTH, 12);
        assert_eq!(AES_TAG_LENGTH, 16);
        assert_eq!(HASH_OUTPUT_LENGTH, 32);
        assert_eq!(SIGNATURE_LENGTH, 64);
    }

    #[test]
    fn test_timelock_model_is_nontrivial() {
        // A one-minute fragment must cost more than 2^32 sequential hashes
        // to brute-force under the stated model. If this fails, someone
        // weakened the adversary assumptions.
        let one_minute = 60 * ASSUMED_ADVERSARY_HASH_RATE * TIMELOCK_SAFETY_FACTOR;
        assert!(one_minute > 1 << 32);
        assert!(MIN_PUZZLE_ITERATIONS > 0);
        assert!(ISSUANCE_BUDGET_ITERATIONS > MIN_PUZZLE_ITERATIONS);
    }

    #[test]
    fn test_deletion_bounds_sane() {
        // Retries with full exponential backoff must fit inside the grace
        // period, otherwise the daemon can never escalate in time.
        let worst_case: u64 = (0..DELETION_MAX_ATTEMPTS)
            .map(|a| DELETION_INITIAL_BACKOFF.as_millis() as u64 * (1 << a))
            .sum();
        assert!(worst_case < DELETION_GRACE_PERIOD.as_millis() as u64);
        assert!(DEFAULT_ERASE_PASSES >= 1);
    }

    #[test]
    fn test_fingerprint_format() {
        assert!(!ENGINE_FINGERPRINT.is_empty());
        assert!(ENGINE_FINGERPRINT.contains("TESSERA"));
    }
}
