//! # Fragment Data Model
//!
//! The records everything else in the engine agrees on: sessions, fragments,
//! lifecycle states, policies, and the opaque handles callers hold.
//!
//! Two rules are enforced structurally rather than by convention:
//!
//! - A [`Session`] is immutable after creation. There is no setter; the
//!   controller builds it once, atomically with its fragments.
//! - A [`Fragment`]'s lifecycle only moves forward. `Active → Expiring →
//!   Purged`, checked by [`LifecycleState::can_advance_to`], and `Purged`
//!   is terminal. Mutation is the daemon's monopoly — the gate only ever
//!   reads snapshots.
//!
//! The validation hash binds a fragment's id to its expiry time, so a
//! tampered expiry claim (the obvious way to stretch a fragment's life)
//! fails hash recomputation at every honest validator.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::DEFAULT_ERASE_PASSES;
use crate::storage::StorageLocation;
use crate::time::UnixMillis;
use crate::timelock::TimeLockPuzzle;

/// Domain separation for validation hashes.
const BINDING_CONTEXT: &[u8] = b"tessera fragment binding v1";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifies one fragmentation operation (one secret, one share family).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one share of one session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FragmentId(Uuid);

impl FragmentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The raw 16 id bytes, used in validation hashes and seal bindings.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Security Levels
// ---------------------------------------------------------------------------

/// How paranoid a session is. Scales the time-lock work factor and floors
/// the erase pass count; the sharing threshold itself is policy, not level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SecurityLevel {
    /// The baseline. Suitable for secrets whose exposure is recoverable.
    #[default]
    Standard,
    /// 4x time-lock margin, erase floor of 7 passes.
    Elevated,
    /// 16x time-lock margin, erase floor of 15 passes. For secrets where
    /// "the model was wrong by an order of magnitude" must still hold.
    Critical,
}

impl SecurityLevel {
    /// Multiplier applied to the calibrated puzzle iteration count.
    pub fn puzzle_multiplier(&self) -> u64 {
        match self {
            SecurityLevel::Standard => 1,
            SecurityLevel::Elevated => 4,
            SecurityLevel::Critical => 16,
        }
    }

    /// Minimum overwrite passes, whatever the policy asks for.
    pub fn erase_pass_floor(&self) -> u32 {
        match self {
            SecurityLevel::Standard => 1,
            SecurityLevel::Elevated => 7,
            SecurityLevel::Critical => 15,
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::Standard => write!(f, "standard"),
            SecurityLevel::Elevated => write!(f, "elevated"),
            SecurityLevel::Critical => write!(f, "critical"),
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Caller-supplied fragmentation parameters.
///
/// `total_shares` is a `u8` because share indices are nonzero GF(256)
/// elements — 255 is a mathematical ceiling the type system enforces for
/// free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentationPolicy {
    /// Number of shares to produce (`n`).
    pub total_shares: u8,

    /// Reconstruction threshold (`k`). `k = 1` is legal and degenerates to
    /// time-lock-protected replication.
    pub threshold: u8,

    /// Nominal time from creation to expiry.
    pub lifetime: Duration,

    /// Half-width of the uniform jitter applied per fragment around the
    /// nominal expiry, so a session's fragments don't all expire on the
    /// same daemon tick.
    pub jitter: Duration,

    /// Pseudorandom overwrite passes during secure erasure. The effective
    /// count is floored by the security level.
    pub erase_passes: u32,

    /// Work-factor tier for the time-lock and erasure.
    pub security_level: SecurityLevel,

    /// Explicit time-lock chain length. `None` calibrates from the
    /// adversary model and clamps to the issuance budget; tests and demos
    /// set small values to keep fragmentation fast.
    pub puzzle_iterations: Option<u64>,

    /// Consume fragments on successful reconstruction: the gate pulls
    /// their expiry to "now" and the daemon destroys them on its next
    /// sweep.
    pub single_use: bool,
}

impl Default for FragmentationPolicy {
    fn default() -> Self {
        Self {
            total_shares: 5,
            threshold: 3,
            lifetime: Duration::from_secs(300),
            jitter: Duration::from_secs(5),
            erase_passes: DEFAULT_ERASE_PASSES,
            security_level: SecurityLevel::Standard,
            puzzle_iterations: None,
            single_use: false,
        }
    }
}

impl FragmentationPolicy {
    /// Reject malformed policies before any work begins.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.total_shares == 0 {
            return Err(PolicyError::NoShares);
        }
        if self.threshold == 0 {
            return Err(PolicyError::ZeroThreshold);
        }
        if self.threshold > self.total_shares {
            return Err(PolicyError::ThresholdExceedsShares {
                threshold: self.threshold,
                shares: self.total_shares,
            });
        }
        if self.lifetime.is_zero() {
            return Err(PolicyError::ZeroLifetime);
        }
        if self.jitter >= self.lifetime {
            return Err(PolicyError::JitterSwallowsLifetime {
                jitter_ms: self.jitter.as_millis() as u64,
                lifetime_ms: self.lifetime.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// Effective erase passes after applying the security-level floor.
    pub fn effective_erase_passes(&self) -> u32 {
        self.erase_passes.max(self.security_level.erase_pass_floor())
    }
}

/// Rejected policies. Raised before any share is computed — a bad policy
/// never produces partial state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid policy: total shares must be at least 1")]
    NoShares,

    #[error("invalid policy: threshold must be at least 1")]
    ZeroThreshold,

    #[error("invalid policy: threshold {threshold} exceeds total shares {shares}")]
    ThresholdExceedsShares { threshold: u8, shares: u8 },

    #[error("invalid policy: fragment lifetime must be positive")]
    ZeroLifetime,

    #[error("invalid policy: jitter ({jitter_ms}ms) must be smaller than lifetime ({lifetime_ms}ms)")]
    JitterSwallowsLifetime { jitter_ms: u64, lifetime_ms: u64 },

    #[error("invalid policy: secret must not be empty")]
    EmptySecret,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Fragment lifecycle. Forward-only; `Purged` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Live: reconstructable, trapdoor in the vault.
    Active,
    /// Destruction in progress. Transient — only ever observed by the
    /// daemon itself, which holds the fragment's exclusive lock throughout.
    Expiring,
    /// Irreversibly destroyed.
    Purged,
}

impl LifecycleState {
    /// The legal transition relation: `Active → Expiring → Purged`.
    pub fn can_advance_to(&self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::Active, LifecycleState::Expiring)
                | (LifecycleState::Expiring, LifecycleState::Purged)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Active => write!(f, "active"),
            LifecycleState::Expiring => write!(f, "expiring"),
            LifecycleState::Purged => write!(f, "purged"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session & Fragment
// ---------------------------------------------------------------------------

/// One fragmentation operation. Created atomically with its fragments,
/// immutable thereafter, logically destroyed once every fragment is purged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub threshold: u8,
    pub total_shares: u8,
    pub created_at_ms: UnixMillis,
    pub security_level: SecurityLevel,
    /// Original secret length in bytes — the "size metadata" the shares
    /// themselves don't carry.
    pub secret_len: usize,
    /// BLAKE3 digest of the original secret, checked by the gate after
    /// interpolation.
    pub checksum: [u8; 32],
    /// Fragment ids in share-index order.
    pub fragment_ids: Vec<FragmentId>,
    /// Whether a successful reconstruction consumes its fragments.
    pub single_use: bool,
}

/// One share: sealed bytes plus everything the daemon and validators need
/// to police its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub session_id: SessionId,
    /// Evaluation point of the sharing polynomial, 1-based.
    pub index: u8,
    /// Time-locked share bytes (`nonce || ciphertext`), also persisted at
    /// `location` in the external store.
    pub ciphertext: Vec<u8>,
    /// Public puzzle parameters for the slow unlock path.
    pub puzzle: TimeLockPuzzle,
    /// Where the external store keeps the ciphertext.
    pub location: StorageLocation,
    pub created_at_ms: UnixMillis,
    /// Jittered expiry. Strictly greater than `created_at_ms`.
    pub expires_at_ms: UnixMillis,
    /// Overwrite passes the daemon must run for this fragment.
    pub erase_passes: u32,
    /// Binds id + expiry; recomputed by validators on every freshness check.
    pub validation_hash: [u8; 32],
    pub state: LifecycleState,
}

impl Fragment {
    /// Has this fragment's expiry passed at `now`?
    pub fn is_expired(&self, now: UnixMillis) -> bool {
        now >= self.expires_at_ms
    }

    /// Milliseconds of life left at `now`. Zero once expired.
    pub fn remaining_ms(&self, now: UnixMillis) -> u64 {
        self.expires_at_ms.saturating_sub(now)
    }

    /// The metadata validators hold — never the ciphertext.
    pub fn metadata(&self) -> FragmentMetadata {
        FragmentMetadata {
            fragment_id: self.id,
            expires_at_ms: self.expires_at_ms,
            validation_hash: self.validation_hash,
        }
    }

    /// The caller-facing handle.
    pub fn handle(&self) -> FragmentHandle {
        FragmentHandle {
            fragment: self.id,
            session: self.session_id,
        }
    }
}

/// Compute the hash binding a fragment id to its expiry time.
pub fn binding_hash(id: &FragmentId, expires_at_ms: UnixMillis) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(BINDING_CONTEXT);
    hasher.update(id.as_bytes());
    hasher.update(&expires_at_ms.to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// The associated data sealed into a fragment's AES-GCM tag: its full
/// identity, so ciphertext cannot migrate between fragment records.
pub fn seal_binding(
    id: &FragmentId,
    session: &SessionId,
    index: u8,
    expires_at_ms: UnixMillis,
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(16 + 16 + 1 + 8);
    aad.extend_from_slice(id.as_bytes());
    aad.extend_from_slice(session.0.as_bytes());
    aad.push(index);
    aad.extend_from_slice(&expires_at_ms.to_le_bytes());
    aad
}

// ---------------------------------------------------------------------------
// Metadata & Handles
// ---------------------------------------------------------------------------

/// What a validator holds per fragment: enough to answer "still fresh?",
/// nothing that helps recover the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentMetadata {
    pub fragment_id: FragmentId,
    pub expires_at_ms: UnixMillis,
    pub validation_hash: [u8; 32],
}

/// Opaque reference to a fragment, handed to callers at fragmentation and
/// presented back at reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentHandle {
    fragment: FragmentId,
    session: SessionId,
}

impl FragmentHandle {
    pub fn fragment_id(&self) -> FragmentId {
        self.fragment
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }
}
