//! # Reconstruction Gate
//!
//! The only path from fragments back to a secret, and a deliberately
//! narrow one. The gate:
//!
//! 1. fans each candidate out to the validation network (all candidates
//!    concurrently; each candidate's quorum read is itself concurrent and
//!    time-bounded),
//! 2. filters to the valid subset,
//! 3. refuses with a typed error if fewer than `k` survive,
//! 4. refuses candidates spanning sessions,
//! 5. unseals exactly `k` shares via vault trapdoors,
//! 6. interpolates,
//! 7. checks the recovered bytes against the session checksum,
//! 8. returns the secret with its consumption metadata.
//!
//! No partial secret exists before step 6 completes with `k` validated,
//! unsealed shares — the share points live on the stack of one function
//! and interpolation is the first operation that combines them.
//!
//! Error discipline mirrors the security model: `FragmentExpired` and
//! `IntegrityCheckFailed` are boundary errors that the gate never retries
//! or downgrades; a quorum failure is network weather and comes back
//! retryable; `InsufficientFragments` just means "bring more shares".

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::fragment::{seal_binding, Fragment, FragmentHandle, FragmentId, LifecycleState, SessionId};
use crate::registry::FragmentRegistry;
use crate::sharing::{self, SharePoint, ShareError};
use crate::storage::{FragmentStore, StoreError};
use crate::time::Clock;
use crate::timelock::{self, TimeLockError, TrapdoorVault};
use crate::validation::{FreshnessRequest, QuorumClient, ValidationError};

/// Actor label in audit records written by the gate.
const ACTOR: &str = "gate";

/// Reconstruction failures, ordered roughly by how much the caller should
/// worry.
#[derive(Debug, Error)]
pub enum ReconstructError {
    /// The session does not exist (or has been logically destroyed after
    /// all of its fragments were purged).
    #[error("session {0} not found")]
    UnknownSession(SessionId),

    /// Candidates from more than one session were presented together.
    #[error("candidate fragments span more than one session")]
    SessionMismatch,

    /// Fewer than `k` fragments survived validation. Recoverable — the
    /// caller may gather more shares and try again.
    #[error("insufficient fragments: {valid_count} valid, {required} required")]
    InsufficientFragments { valid_count: usize, required: usize },

    /// A candidate is past its expiry (or already destroyed). Terminal:
    /// this is the engine's core guarantee doing its job, and it is never
    /// retried.
    #[error("fragment {fragment_id} has expired; the temporal guarantee is in effect")]
    FragmentExpired { fragment_id: FragmentId },

    /// The validation network could not form a quorum either way. Comes
    /// back after the quorum client's bounded retries; the caller may try
    /// again later.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The recovered bytes do not match the session checksum. Fatal for
    /// the session — corruption or tampering. The gate does not silently
    /// retry with a different share subset; that decision belongs to a
    /// human reading the audit log.
    #[error("recovered secret failed integrity verification")]
    IntegrityCheckFailed,

    /// A share seal refused to open (wrong trapdoor, tampered ciphertext,
    /// or a ciphertext swapped between fragments).
    #[error(transparent)]
    TimeLock(#[from] TimeLockError),

    /// Share arithmetic rejected the decrypted points.
    #[error(transparent)]
    Share(#[from] ShareError),

    /// The storage backend failed for a reason other than "gone".
    #[error("fragment {fragment_id} ciphertext unavailable: {source}")]
    Storage {
        fragment_id: FragmentId,
        #[source]
        source: StoreError,
    },
}

/// A recovered secret and the accounting that goes with it.
#[derive(Debug)]
pub struct Reconstruction {
    pub secret: Vec<u8>,
    pub session_id: SessionId,
    /// The `k` fragments whose shares were actually combined.
    pub fragments_used: Vec<FragmentId>,
    /// Smallest remaining lifetime among the used fragments at
    /// reconstruction time — how long this secret would have stayed
    /// recoverable.
    pub remaining_ms: u64,
}

/// Per-candidate classification after local checks and the quorum read.
enum Candidate {
    Valid(Box<Fragment>, u64),
    Expired(FragmentId),
    Invalid(FragmentId),
    Undecided(FragmentId, ValidationError),
}

/// The gate itself. Shares every collaborator with the controller and the
/// daemon; holds nothing of its own.
pub struct ReconstructionGate {
    registry: Arc<FragmentRegistry>,
    store: Arc<dyn FragmentStore>,
    vault: Arc<TrapdoorVault>,
    quorum: Arc<QuorumClient>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
}

impl ReconstructionGate {
    pub fn new(
        registry: Arc<FragmentRegistry>,
        store: Arc<dyn FragmentStore>,
        vault: Arc<TrapdoorVault>,
        quorum: Arc<QuorumClient>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            vault,
            quorum,
            audit,
            clock,
        }
    }

    /// Attempt to recover the secret of `session_id` from `candidates`.
    pub async fn reconstruct(
        &self,
        session_id: SessionId,
        candidates: &[FragmentHandle],
    ) -> Result<Reconstruction, ReconstructError> {
        let session = self
            .registry
            .session(&session_id)
            .ok_or(ReconstructError::UnknownSession(session_id))?;
        let required = session.threshold as usize;

        // Consistency first: mixing sessions is a caller bug (or an
        // attack), and we refuse before touching the network.
        if candidates
            .iter()
            .any(|h| h.session_id() != session_id)
        {
            return Err(ReconstructError::SessionMismatch);
        }

        // Dedup — presenting the same handle twice must not count twice.
        let mut seen = HashSet::new();
        let unique: Vec<FragmentHandle> = candidates
            .iter()
            .filter(|h| seen.insert(h.fragment_id()))
            .copied()
            .collect();

        let now = self.clock.now_ms();

        // Steps 1-2: classify every candidate concurrently.
        let outcomes = futures::future::join_all(
            unique.iter().map(|handle| self.classify(handle, now)),
        )
        .await;

        let mut valid: Vec<(Box<Fragment>, u64)> = Vec::new();
        let mut expired: Vec<FragmentId> = Vec::new();
        let mut undecided: Option<ValidationError> = None;
        let mut invalid_count = 0usize;

        for outcome in outcomes {
            match outcome {
                Candidate::Valid(fragment, remaining) => valid.push((fragment, remaining)),
                Candidate::Expired(id) => expired.push(id),
                Candidate::Invalid(_) => invalid_count += 1,
                Candidate::Undecided(id, e) => {
                    warn!(fragment = %id, error = %e, "candidate undecided after quorum retries");
                    undecided.get_or_insert(e);
                }
            }
        }

        // Step 3: enough survivors? The terminal condition wins: if any
        // candidate hit the expiry wall, that is the answer regardless of
        // how the count came out.
        if valid.len() < required {
            if let Some(&fragment_id) = expired.first() {
                self.note_failure(session_id, now);
                return Err(ReconstructError::FragmentExpired { fragment_id });
            }
            if let Some(e) = undecided {
                // The network, not the fragments, blocked the decision.
                return Err(ReconstructError::Validation(e));
            }
            info!(
                session = %session_id,
                valid = valid.len(),
                invalid = invalid_count,
                required,
                "reconstruction refused: below threshold"
            );
            return Err(ReconstructError::InsufficientFragments {
                valid_count: valid.len(),
                required,
            });
        }

        for (fragment, _) in &valid {
            self.audit.append(
                ACTOR,
                AuditEvent::Validated,
                session_id,
                Some(fragment.id),
                now,
            );
        }

        // Step 5: unseal exactly `k` shares. A trapdoor or ciphertext that
        // vanished since validation means the daemon got there first —
        // which is the expiry guarantee, not a race bug.
        let chosen = &valid[..required];
        let mut points = Vec::with_capacity(required);
        for (fragment, _) in chosen {
            points.push(self.unseal(fragment).await?);
        }

        // Step 6: only now does anything secret-shaped exist.
        let secret = sharing::combine(&points, required, session.secret_len)?;

        // Step 7: integrity. A mismatch is fatal for the session; we log
        // it, audit it, and do not go fishing for a "better" subset.
        if *blake3::hash(&secret).as_bytes() != session.checksum {
            self.note_failure(session_id, now);
            return Err(ReconstructError::IntegrityCheckFailed);
        }

        let fragments_used: Vec<FragmentId> = chosen.iter().map(|(f, _)| f.id).collect();
        let remaining_ms = chosen.iter().map(|&(_, r)| r).min().unwrap_or(0);

        for id in &fragments_used {
            self.audit
                .append(ACTOR, AuditEvent::Reconstructed, session_id, Some(*id), now);
        }

        // Step 8 epilogue: single-use sessions consume their fragments by
        // pulling expiry to now. Destruction itself stays daemon-owned —
        // same lock, same audit trail, same idempotence.
        if session.single_use {
            for id in &fragments_used {
                self.registry.expire_now(id, now).await;
            }
        }

        info!(
            session = %session_id,
            used = fragments_used.len(),
            remaining_ms,
            single_use = session.single_use,
            "secret reconstructed"
        );

        Ok(Reconstruction {
            secret,
            session_id,
            fragments_used,
            remaining_ms,
        })
    }

    /// Local checks, then the quorum read, for one candidate.
    async fn classify(&self, handle: &FragmentHandle, now: u64) -> Candidate {
        let id = handle.fragment_id();

        // Gone from the registry: purged. Locally past expiry or already
        // transitioning: the daemon will get to it within a poll tick, and
        // we must not race it.
        let Some(fragment) = self.registry.snapshot(&id).await else {
            return Candidate::Expired(id);
        };
        if fragment.state != LifecycleState::Active || fragment.is_expired(now) {
            return Candidate::Expired(id);
        }

        let request = FreshnessRequest::for_metadata(&fragment.metadata(), now);
        match self.quorum.check_with_retry(&request).await {
            Ok(decision) if decision.fresh => {
                Candidate::Valid(Box::new(fragment), decision.remaining_ms)
            }
            Ok(_) => Candidate::Invalid(id),
            Err(e) => Candidate::Undecided(id, e),
        }
    }

    /// Fetch trapdoor and ciphertext, open the seal, yield the share point.
    async fn unseal(&self, fragment: &Fragment) -> Result<SharePoint, ReconstructError> {
        let trapdoor = self
            .vault
            .fetch(&fragment.id)
            .ok_or(ReconstructError::FragmentExpired {
                fragment_id: fragment.id,
            })?;

        let ciphertext = match self.store.read(&fragment.location).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                return Err(ReconstructError::FragmentExpired {
                    fragment_id: fragment.id,
                })
            }
            Err(e) => {
                return Err(ReconstructError::Storage {
                    fragment_id: fragment.id,
                    source: e,
                })
            }
        };

        let aad = seal_binding(
            &fragment.id,
            &fragment.session_id,
            fragment.index,
            fragment.expires_at_ms,
        );
        let data = timelock::open(&trapdoor, &ciphertext, &aad)?;

        Ok(SharePoint {
            index: fragment.index,
            data,
        })
    }

    fn note_failure(&self, session_id: SessionId, now: u64) {
        self.audit
            .append(ACTOR, AuditEvent::ReconstructionFailed, session_id, None, now);
    }
}
