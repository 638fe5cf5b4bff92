//! Validator nodes: the metadata-only freshness oracles.
//!
//! A validator never sees ciphertext, shares, or trapdoors. It holds
//! [`FragmentMetadata`] — id, expiry, binding hash — and answers one
//! question: *is this fragment still fresh right now?* Compromising a
//! validator therefore yields timing information and nothing else.
//!
//! Verdicts are computed from the validator's **own** records and its
//! **own** clock. The caller's claimed expiry and hash must match what the
//! validator holds (that is the tamper check), and the caller's clock is
//! used only to log skew — trusting a requester's timestamp for a
//! freshness decision would let the requester time-travel.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::fragment::{binding_hash, FragmentId, FragmentMetadata};
use crate::time::{Clock, UnixMillis};

/// Clock skew between caller and validator worth a log line, in ms.
const SKEW_NOTE_THRESHOLD_MS: u64 = 500;

/// Validation-network failures. Note that "fragment is expired" is not in
/// here — that's a *verdict*, not an error. Errors mean the question could
/// not be answered.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The validator could not be reached at all.
    #[error("validator '{0}' unreachable")]
    Unreachable(String),

    /// The validator did not answer within the fan-out timeout.
    #[error("validator query timed out")]
    Timeout,

    /// Not enough validators answered to decide either way. Network-level
    /// and retryable with bounded backoff — unlike a negative verdict,
    /// which is final.
    #[error("validation quorum failed: {responses} response(s), quorum is {required}")]
    QuorumFailed { responses: usize, required: usize },

    /// A quorum client was built over an empty validator set.
    #[error("no validators configured")]
    NoValidators,
}

/// The freshness question, as it crosses the (abstract) wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessRequest {
    pub fragment_id: FragmentId,
    /// The expiry the caller believes in. Must match the validator's copy.
    pub claimed_expiry_ms: UnixMillis,
    /// The binding hash the caller holds. Must match a local recomputation.
    pub claimed_hash: [u8; 32],
    /// The caller's clock, for skew diagnostics only.
    pub now_ms: UnixMillis,
}

impl FreshnessRequest {
    /// Build the request a holder of `metadata` would send at `now`.
    pub fn for_metadata(metadata: &FragmentMetadata, now_ms: UnixMillis) -> Self {
        Self {
            fragment_id: metadata.fragment_id,
            claimed_expiry_ms: metadata.expires_at_ms,
            claimed_hash: metadata.validation_hash,
            now_ms,
        }
    }
}

/// The freshness answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessVerdict {
    pub valid: bool,
    /// Lifetime left by this validator's clock; zero when invalid.
    pub remaining_ms: u64,
}

impl FreshnessVerdict {
    fn invalid() -> Self {
        Self {
            valid: false,
            remaining_ms: 0,
        }
    }
}

/// The validator RPC contract. In-process validators implement it
/// directly; a deployment with real remote validators implements it over
/// whatever transport it already has — the engine does not care.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Stable name for logs and error messages.
    fn name(&self) -> &str;

    /// Answer the freshness question from locally held state.
    async fn check_freshness(
        &self,
        request: &FreshnessRequest,
    ) -> Result<FreshnessVerdict, ValidationError>;
}

// ---------------------------------------------------------------------------
// LocalValidator
// ---------------------------------------------------------------------------

/// An in-process validator with its own metadata table and its own clock.
///
/// "Its own clock" is not test pedantry: validator clock independence is
/// what the quorum protocol exists to survive, so each `LocalValidator`
/// takes an injected `Clock` and tests can skew them individually.
pub struct LocalValidator {
    name: String,
    clock: Arc<dyn Clock>,
    metadata: DashMap<FragmentId, FragmentMetadata>,
}

impl LocalValidator {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            metadata: DashMap::new(),
        }
    }

    /// Record metadata for a fragment. Called at distribution time by
    /// whatever transport the deployment uses.
    pub fn register(&self, metadata: FragmentMetadata) {
        self.metadata.insert(metadata.fragment_id, metadata);
    }

    /// Drop a fragment's metadata (e.g. after observing its destruction).
    pub fn forget(&self, fragment_id: &FragmentId) {
        self.metadata.remove(fragment_id);
    }

    /// Number of fragments this validator can answer for.
    pub fn tracked(&self) -> usize {
        self.metadata.len()
    }
}

#[async_trait]
impl Validator for LocalValidator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_freshness(
        &self,
        request: &FreshnessRequest,
    ) -> Result<FreshnessVerdict, ValidationError> {
        let now = self.clock.now_ms();

        let skew = now.abs_diff(request.now_ms);
        if skew > SKEW_NOTE_THRESHOLD_MS {
            debug!(
                validator = %self.name,
                fragment = %request.fragment_id,
                skew_ms = skew,
                "caller clock skew observed"
            );
        }

        // Unknown fragment: a definitive "invalid", not an error. We were
        // asked and we answered; the asker's fragment just isn't one we
        // vouch for.
        let Some(stored) = self.metadata.get(&request.fragment_id) else {
            return Ok(FreshnessVerdict::invalid());
        };

        // Recompute the binding locally — never trust the claimed hash as
        // a statement about anything other than what the caller holds.
        let recomputed = binding_hash(&stored.fragment_id, stored.expires_at_ms);

        let claims_match = request.claimed_expiry_ms == stored.expires_at_ms
            && request.claimed_hash == recomputed
            && stored.validation_hash == recomputed;

        if !claims_match {
            debug!(
                validator = %self.name,
                fragment = %request.fragment_id,
                "freshness claim mismatch -- possible tampering"
            );
            return Ok(FreshnessVerdict::invalid());
        }

        if now >= stored.expires_at_ms {
            return Ok(FreshnessVerdict::invalid());
        }

        Ok(FreshnessVerdict {
            valid: true,
            remaining_ms: stored.expires_at_ms - now,
        })
    }
}
