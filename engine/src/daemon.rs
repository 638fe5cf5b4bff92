//! # Expiry Enforcement Daemon
//!
//! The component that makes "temporal" mean something. A continuously
//! scheduled task scans the registry every poll interval and, for every
//! fragment past its expiry, runs the destruction sequence:
//!
//! 1. destroy the trapdoor (the instant-unlock path dies first — it is the
//!    primary guarantee and must not wait on storage),
//! 2. overwrite the ciphertext with pseudorandom passes, bounded-backoff
//!    retries, then deallocate,
//! 3. append a signed `expired` audit record,
//! 4. advance the lifecycle to `Purged` and drop the fragment from the
//!    active registry.
//!
//! The whole sequence runs under the fragment's exclusive write lock, so a
//! concurrent reconstruction can never observe half-erased state. Purging
//! an already-purged fragment is a no-op — the daemon may be restarted,
//! sweeps may overlap with manual purges, and none of that may double-free
//! storage or error out.
//!
//! An overwrite that cannot be *confirmed* within the attempt budget and
//! grace period is [`DaemonError::DeletionConfirmationFailed`]: a critical
//! breach of the engine's core guarantee, propagated out of the run loop
//! for the supervisor to alert on. It is never downgraded to a log line.
//!
//! ## Shutdown
//!
//! The loop watches a `tokio::sync::watch` channel and observes it only at
//! sweep boundaries. A destruction that has started always runs to
//! completion — cancelling mid-overwrite would leave exactly the
//! half-erased state the locking exists to prevent.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::config::{
    DEFAULT_POLL_INTERVAL, DELETION_GRACE_PERIOD, DELETION_INITIAL_BACKOFF, DELETION_MAX_ATTEMPTS,
};
use crate::fragment::{FragmentId, LifecycleState};
use crate::registry::FragmentRegistry;
use crate::storage::{FragmentStore, StoreError};
use crate::time::Clock;
use crate::timelock::TrapdoorVault;

/// Actor label in audit records written by the daemon.
const ACTOR: &str = "daemon";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Daemon timing and retry parameters.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Time between registry scans.
    pub poll_interval: Duration,

    /// Attempts to confirm a storage overwrite/delete before escalating.
    pub max_erase_attempts: u32,

    /// Backoff before the second attempt; doubles per attempt after that.
    pub initial_backoff: Duration,

    /// Hard wall-clock bound on confirming one fragment's erasure.
    pub deletion_grace: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_erase_attempts: DELETION_MAX_ATTEMPTS,
            initial_backoff: DELETION_INITIAL_BACKOFF,
            deletion_grace: DELETION_GRACE_PERIOD,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors & Reports
// ---------------------------------------------------------------------------

/// Daemon failures.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The core guarantee could not be upheld: a fragment's storage
    /// erasure was not confirmed within the attempt budget and grace
    /// period. Critical. The trapdoor is already destroyed by this point,
    /// so the *instant* unlock path is closed either way — but ciphertext
    /// whose erasure is unconfirmed must be treated as exfiltrated.
    #[error(
        "deletion confirmation failed for fragment {fragment_id} after {attempts} attempt(s): {source}"
    )]
    DeletionConfirmationFailed {
        fragment_id: FragmentId,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// The shutdown signal was received. The clean exit path — the loop
    /// stopped because someone asked it to, not because something broke.
    #[error("expiry daemon received shutdown signal")]
    Shutdown,
}

/// What one purge attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// Full destruction sequence ran.
    Purged,
    /// Nothing to do — the fragment was already purged or never existed.
    AlreadyGone,
}

/// Summary of one sweep across the registry.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Fragments whose expiry had passed at scan time.
    pub due: usize,
    /// Fragments fully destroyed this sweep.
    pub purged: usize,
    /// Idempotent no-ops (already gone by the time we got the lock).
    pub already_gone: usize,
    /// Fragments whose erasure could not be confirmed.
    pub failed: Vec<FragmentId>,
}

// ---------------------------------------------------------------------------
// ExpiryDaemon
// ---------------------------------------------------------------------------

/// The scheduled destruction task. Construct one per engine instance and
/// drive it with [`run`](Self::run), or call [`sweep`](Self::sweep)
/// directly from tests that control the clock.
pub struct ExpiryDaemon {
    registry: Arc<FragmentRegistry>,
    store: Arc<dyn FragmentStore>,
    vault: Arc<TrapdoorVault>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    config: DaemonConfig,
}

impl ExpiryDaemon {
    pub fn new(
        registry: Arc<FragmentRegistry>,
        store: Arc<dyn FragmentStore>,
        vault: Arc<TrapdoorVault>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        config: DaemonConfig,
    ) -> Self {
        Self {
            registry,
            store,
            vault,
            audit,
            clock,
            config,
        }
    }

    /// Run until shutdown. Sweeps at `poll_interval`; the shutdown channel
    /// is only consulted between sweeps, so in-flight destructions drain.
    ///
    /// Returns `Err(Shutdown)` on clean exit, or
    /// `Err(DeletionConfirmationFailed)` the moment a sweep cannot confirm
    /// an erasure — the supervisor decides whether to alert, page, or
    /// both. (Both.)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DaemonError> {
        info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "expiry daemon starting"
        );

        loop {
            if *shutdown.borrow() {
                info!("expiry daemon received shutdown signal, draining complete, exiting");
                return Err(DaemonError::Shutdown);
            }

            let report = self.sweep().await;
            if report.due > 0 {
                debug!(
                    due = report.due,
                    purged = report.purged,
                    already_gone = report.already_gone,
                    "sweep complete"
                );
            }

            if let Some(&fragment_id) = report.failed.first() {
                error!(
                    fragment = %fragment_id,
                    failed = report.failed.len(),
                    "unconfirmed deletion -- temporal guarantee violated, escalating"
                );
                return Err(DaemonError::DeletionConfirmationFailed {
                    fragment_id,
                    attempts: self.config.max_erase_attempts,
                    source: StoreError::Backend("unconfirmed after bounded retries".into()),
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {
                    info!("expiry daemon shutting down during idle wait");
                    return Err(DaemonError::Shutdown);
                }
            }
        }
    }

    /// One scan-and-destroy pass over the registry. Public so tests (and
    /// single-stepping operators) can drive expiry deterministically
    /// against an injected clock.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let due = self.registry.scan_expired(now);

        let mut report = SweepReport {
            due: due.len(),
            ..SweepReport::default()
        };

        for fragment_id in due {
            match self.purge_fragment(&fragment_id).await {
                Ok(PurgeOutcome::Purged) => report.purged += 1,
                Ok(PurgeOutcome::AlreadyGone) => report.already_gone += 1,
                Err(e) => {
                    error!(fragment = %fragment_id, error = %e, "purge failed");
                    report.failed.push(fragment_id);
                }
            }
        }

        report
    }

    /// Destroy one fragment, idempotently, under its exclusive lock.
    pub async fn purge_fragment(&self, id: &FragmentId) -> Result<PurgeOutcome, DaemonError> {
        // Removed from the map means a previous purge finished. No-op.
        let Some(cell) = self.registry.fragment_cell(id) else {
            return Ok(PurgeOutcome::AlreadyGone);
        };

        // Exclusive for the whole destruction — reconstruction reads wait
        // and then see either a live fragment or nothing, never rubble.
        let mut fragment = cell.write().await;

        match fragment.state {
            LifecycleState::Purged => return Ok(PurgeOutcome::AlreadyGone),
            LifecycleState::Active => {
                debug_assert!(fragment.state.can_advance_to(LifecycleState::Expiring));
                fragment.state = LifecycleState::Expiring;
            }
            // Already `Expiring`: a previous attempt died mid-destruction
            // (e.g. daemon restart). Resume; every step below tolerates
            // partially completed work.
            LifecycleState::Expiring => {}
        }

        info!(
            fragment = %fragment.id,
            session = %fragment.session_id,
            expired_at = fragment.expires_at_ms,
            state = %fragment.state,
            "destruction starting"
        );

        // Step 1: the trapdoor dies first, unconditionally. Even if the
        // storage backend is on fire, the instant-decrypt path closes now.
        self.vault.destroy(&fragment.id);

        // Step 2: overwrite and deallocate ciphertext, with bounded retry.
        self.erase_storage(&fragment.id, &fragment).await?;

        // Step 3: signed audit record of the destruction. Stamped with the
        // fragment's expiry rather than the purge instant -- the record
        // attests *when the guarantee took effect*; the purge timing is in
        // the surrounding logs.
        self.audit.append(
            ACTOR,
            AuditEvent::Expired,
            fragment.session_id,
            Some(fragment.id),
            fragment.expires_at_ms,
        );

        // Step 4: terminal state, then out of the active registry.
        debug_assert!(fragment.state.can_advance_to(LifecycleState::Purged));
        fragment.state = LifecycleState::Purged;

        let session_id = fragment.session_id;
        info!(
            fragment = %fragment.id,
            session = %session_id,
            state = %fragment.state,
            "destruction complete"
        );
        drop(fragment);

        self.registry.remove_fragment(id);
        if self.registry.retire_session(&session_id) {
            info!(session = %session_id, "all fragments purged, session retired");
        }

        Ok(PurgeOutcome::Purged)
    }

    /// Overwrite-then-delete with exponential backoff, bounded by attempt
    /// count and the deletion grace period.
    async fn erase_storage(
        &self,
        id: &FragmentId,
        fragment: &crate::fragment::Fragment,
    ) -> Result<(), DaemonError> {
        let started = self.clock.now_ms();
        let grace_ms = self.config.deletion_grace.as_millis() as u64;
        let mut backoff = self.config.initial_backoff;
        let mut last_err: Option<StoreError> = None;

        for attempt in 1..=self.config.max_erase_attempts {
            match self.try_erase(fragment).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        fragment = %id,
                        attempt,
                        error = %e,
                        "storage erase attempt failed"
                    );
                    last_err = Some(e);
                }
            }

            let out_of_time = self.clock.now_ms().saturating_sub(started) >= grace_ms;
            if attempt == self.config.max_erase_attempts || out_of_time {
                return Err(DaemonError::DeletionConfirmationFailed {
                    fragment_id: *id,
                    attempts: attempt,
                    source: last_err
                        .unwrap_or_else(|| StoreError::Backend("unknown erase failure".into())),
                });
            }

            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        unreachable!("erase loop returns on success or final attempt");
    }

    /// One overwrite+delete attempt. A location the store no longer knows
    /// counts as confirmed — there is nothing left to erase, which is the
    /// goal state, not an error.
    async fn try_erase(&self, fragment: &crate::fragment::Fragment) -> Result<(), StoreError> {
        match self
            .store
            .secure_overwrite(&fragment.location, fragment.erase_passes)
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        }

        match self.store.delete(&fragment.location).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
