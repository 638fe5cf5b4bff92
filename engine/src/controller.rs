//! # Fragmentation Controller
//!
//! The entry point of the pipeline: secret in, session of time-locked
//! fragments out. Splitting, sealing, persisting, and registering happen
//! as one operation with one critical property — **a fragment never exists
//! without an expiry guarantee**. Until the atomic registry insert
//! succeeds, nothing the controller built is reachable; if anything fails
//! along the way, everything already persisted is overwritten and deleted
//! before the error propagates. There is no code path that leaves a sealed
//! share in storage without the daemon watching its clock.
//!
//! Expiry times get per-fragment uniform jitter so a session's fragments
//! don't all land on the same daemon tick. Mass-expiry is not a
//! correctness problem, but a synchronized destruction spike is an
//! operational one — and a timing side channel on top.

use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::config::ISSUANCE_BUDGET_ITERATIONS;
use crate::fragment::{
    binding_hash, seal_binding, Fragment, FragmentHandle, FragmentMetadata, FragmentationPolicy,
    FragmentId, LifecycleState, PolicyError, Session, SessionId,
};
use crate::registry::{FragmentRegistry, RegistryError};
use crate::sharing::{self, ShareError};
use crate::storage::{FragmentStore, StorageLocation, StoreError};
use crate::time::Clock;
use crate::timelock::{self, TimeLockError, TimeLockPuzzle, TrapdoorVault};

/// Actor label in audit records written by the controller.
const ACTOR: &str = "controller";

/// Fragmentation failures. `Policy` is the only variant a well-behaved
/// caller should ever see; the rest indicate subsystem trouble.
#[derive(Debug, Error)]
pub enum FragmentationError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Share(#[from] ShareError),

    #[error(transparent)]
    Seal(#[from] TimeLockError),

    #[error("storage rejected fragment ciphertext: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Everything a caller gets back from one fragmentation: the immutable
/// session record, opaque handles for later reconstruction, and the
/// metadata to distribute to validators (transport is the caller's
/// concern).
#[derive(Debug, Clone)]
pub struct SessionReceipt {
    pub session: Session,
    pub handles: Vec<FragmentHandle>,
    pub metadata: Vec<FragmentMetadata>,
}

/// Splits secrets and registers the results. Owns nothing exclusively —
/// every collaborator is shared with the daemon and the gate.
pub struct FragmentationController {
    registry: Arc<FragmentRegistry>,
    store: Arc<dyn FragmentStore>,
    vault: Arc<TrapdoorVault>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
}

impl FragmentationController {
    pub fn new(
        registry: Arc<FragmentRegistry>,
        store: Arc<dyn FragmentStore>,
        vault: Arc<TrapdoorVault>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            vault,
            audit,
            clock,
        }
    }

    /// Fragment `secret` under `policy`.
    ///
    /// Rejects before any work on a bad policy or empty secret. On success,
    /// the session and all `n` fragments are registered, trapdoors are in
    /// the vault, ciphertexts are persisted, and `created` audit records
    /// are written — all observable at once, or not at all.
    pub async fn fragment(
        &self,
        secret: &[u8],
        policy: &FragmentationPolicy,
    ) -> Result<SessionReceipt, FragmentationError> {
        policy.validate()?;
        if secret.is_empty() {
            return Err(PolicyError::EmptySecret.into());
        }

        let now = self.clock.now_ms();
        let session_id = SessionId::generate();
        let iterations = self.puzzle_iterations(policy);

        // Phase 1: pure computation. Nothing is observable yet.
        let points = sharing::split(secret, policy.threshold, policy.total_shares)?;
        let lifetime_ms = policy.lifetime.as_millis() as u64;
        let jitter_ms = policy.jitter.as_millis() as i64;
        let erase_passes = policy.effective_erase_passes();

        let mut fragments = Vec::with_capacity(points.len());
        let mut trapdoors = Vec::with_capacity(points.len());

        for point in &points {
            let id = FragmentId::generate();
            let expires_at_ms = jittered_expiry(now, lifetime_ms, jitter_ms);
            let (puzzle, trapdoor) = TimeLockPuzzle::generate(iterations);

            let aad = seal_binding(&id, &session_id, point.index, expires_at_ms);
            let ciphertext = timelock::seal(&trapdoor, &point.data, &aad)?;

            fragments.push(Fragment {
                id,
                session_id,
                index: point.index,
                location: StorageLocation::new(format!("tessera/{session_id}/{id}")),
                validation_hash: binding_hash(&id, expires_at_ms),
                ciphertext,
                puzzle,
                created_at_ms: now,
                expires_at_ms,
                erase_passes,
                state: LifecycleState::Active,
            });
            trapdoors.push((id, trapdoor));
        }

        let session = Session {
            id: session_id,
            threshold: policy.threshold,
            total_shares: policy.total_shares,
            created_at_ms: now,
            security_level: policy.security_level,
            secret_len: secret.len(),
            checksum: *blake3::hash(secret).as_bytes(),
            fragment_ids: fragments.iter().map(|f| f.id).collect(),
            single_use: policy.single_use,
        };

        // Phase 2: persist ciphertexts. Roll back whatever landed if any
        // write fails — an orphan ciphertext with no registry entry would
        // sit outside the expiry guarantee forever.
        for (written, fragment) in fragments.iter().enumerate() {
            if let Err(e) = self.store.write(&fragment.location, &fragment.ciphertext).await {
                self.rollback_store(&fragments[..written]).await;
                return Err(e.into());
            }
        }

        // Phase 3: trapdoors first, then the atomic registry insert.
        // This order means a registered fragment always has its trapdoor;
        // the reverse order would open a window where the gate can see a
        // fragment it cannot unseal.
        for (id, trapdoor) in trapdoors {
            self.vault.deposit(id, trapdoor);
        }
        if let Err(e) = self
            .registry
            .register_session(session.clone(), fragments.clone())
        {
            for fragment in &fragments {
                self.vault.destroy(&fragment.id);
            }
            self.rollback_store(&fragments).await;
            return Err(e.into());
        }

        for fragment in &fragments {
            self.audit
                .append(ACTOR, AuditEvent::Created, session_id, Some(fragment.id), now);
        }

        info!(
            session = %session_id,
            shares = policy.total_shares,
            threshold = policy.threshold,
            lifetime_ms,
            level = %policy.security_level,
            "session fragmented"
        );

        Ok(SessionReceipt {
            handles: fragments.iter().map(Fragment::handle).collect(),
            metadata: fragments.iter().map(Fragment::metadata).collect(),
            session,
        })
    }

    /// Chain length for this policy: explicit override, or model-calibrated
    /// and clamped to the issuance budget.
    fn puzzle_iterations(&self, policy: &FragmentationPolicy) -> u64 {
        if let Some(explicit) = policy.puzzle_iterations {
            return explicit.max(1);
        }
        let calibrated = TimeLockPuzzle::calibrate_iterations(
            policy.lifetime,
            policy.security_level.puzzle_multiplier(),
        );
        if calibrated > ISSUANCE_BUDGET_ITERATIONS {
            warn!(
                calibrated,
                budget = ISSUANCE_BUDGET_ITERATIONS,
                "time-lock model demands more iterations than the issuance \
                 budget affords; clamping -- the temporal guarantee rests on \
                 trapdoor destruction"
            );
        }
        calibrated.min(ISSUANCE_BUDGET_ITERATIONS)
    }

    /// Best-effort erasure of partially persisted ciphertexts during a
    /// failed fragmentation. Errors are logged, not propagated — the
    /// original failure is the one the caller needs to see.
    async fn rollback_store(&self, written: &[Fragment]) {
        for fragment in written {
            if let Err(e) = self
                .store
                .secure_overwrite(&fragment.location, fragment.erase_passes)
                .await
            {
                warn!(fragment = %fragment.id, error = %e, "rollback overwrite failed");
            }
            if let Err(e) = self.store.delete(&fragment.location).await {
                warn!(fragment = %fragment.id, error = %e, "rollback delete failed");
            }
        }
    }
}

/// Nominal expiry plus uniform jitter in `[-jitter, +jitter]`, clamped to
/// stay strictly after creation.
fn jittered_expiry(now: u64, lifetime_ms: u64, jitter_ms: i64) -> u64 {
    let offset = if jitter_ms > 0 {
        rand::rngs::OsRng.gen_range(-jitter_ms..=jitter_ms)
    } else {
        0
    };
    let nominal = now + lifetime_ms;
    let expires = nominal.saturating_add_signed(offset);
    expires.max(now + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::time::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Harness {
        controller: FragmentationController,
        registry: Arc<FragmentRegistry>,
        store: Arc<MemoryStore>,
        vault: Arc<TrapdoorVault>,
        audit: Arc<AuditLog>,
    }

    fn setup() -> Harness {
        let registry = Arc::new(FragmentRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let vault = Arc::new(TrapdoorVault::new());
        let audit = Arc::new(AuditLog::new());
        let clock = Arc::new(ManualClock::at(1_000_000));

        let controller = FragmentationController::new(
            Arc::clone(&registry),
            Arc::clone(&store) as Arc<dyn FragmentStore>,
            Arc::clone(&vault),
            Arc::clone(&audit),
            clock,
        );
        Harness {
            controller,
            registry,
            store,
            vault,
            audit,
        }
    }

    fn fast_policy() -> FragmentationPolicy {
        FragmentationPolicy {
            lifetime: Duration::from_secs(60),
            jitter: Duration::from_secs(2),
            puzzle_iterations: Some(64),
            ..FragmentationPolicy::default()
        }
    }

    #[tokio::test]
    async fn fragment_populates_every_subsystem() {
        let h = setup();
        let receipt = h
            .controller
            .fragment(b"a secret worth guarding", &fast_policy())
            .await
            .unwrap();

        assert_eq!(receipt.handles.len(), 5);
        assert_eq!(receipt.metadata.len(), 5);
        assert_eq!(receipt.session.threshold, 3);
        assert_eq!(receipt.session.secret_len, 23);

        assert_eq!(h.registry.live_sessions(), 1);
        assert_eq!(h.registry.active_fragments(), 5);
        assert_eq!(h.vault.len(), 5);
        assert_eq!(h.store.len(), 5);
        // One `created` record per fragment.
        assert_eq!(h.audit.len(), 5);
        h.audit.verify_chain().unwrap();
    }

    #[tokio::test]
    async fn empty_secret_rejected_without_side_effects() {
        let h = setup();
        let result = h.controller.fragment(b"", &fast_policy()).await;

        assert!(matches!(
            result,
            Err(FragmentationError::Policy(PolicyError::EmptySecret))
        ));
        assert_eq!(h.registry.live_sessions(), 0);
        assert!(h.store.is_empty());
        assert!(h.vault.is_empty());
        assert!(h.audit.is_empty());
    }

    #[tokio::test]
    async fn invalid_policy_rejected_before_any_work() {
        let h = setup();
        let bad = FragmentationPolicy {
            threshold: 9,
            total_shares: 5,
            ..fast_policy()
        };
        let result = h.controller.fragment(b"secret", &bad).await;

        assert!(matches!(
            result,
            Err(FragmentationError::Policy(
                PolicyError::ThresholdExceedsShares { .. }
            ))
        ));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn expiry_is_jittered_within_bounds() {
        let h = setup();
        let policy = FragmentationPolicy {
            total_shares: 30,
            threshold: 2,
            lifetime: Duration::from_secs(60),
            jitter: Duration::from_secs(5),
            puzzle_iterations: Some(16),
            ..FragmentationPolicy::default()
        };
        let receipt = h.controller.fragment(b"jitter me", &policy).await.unwrap();

        let now = 1_000_000u64;
        let nominal = now + 60_000;
        let mut distinct = std::collections::HashSet::new();
        for meta in &receipt.metadata {
            assert!(meta.expires_at_ms >= nominal - 5_000);
            assert!(meta.expires_at_ms <= nominal + 5_000);
            assert!(meta.expires_at_ms > now);
            distinct.insert(meta.expires_at_ms);
        }
        // 30 draws over a 10s millisecond range: collisions are possible,
        // uniformity collapse is not.
        assert!(distinct.len() > 15);
    }

    #[tokio::test]
    async fn ciphertext_is_not_the_share() {
        let h = setup();
        let secret = b"plaintext never hits storage";
        let receipt = h.controller.fragment(secret, &fast_policy()).await.unwrap();

        for handle in &receipt.handles {
            let fragment = h.registry.snapshot(&handle.fragment_id()).await.unwrap();
            let stored = h.store.peek(&fragment.location).unwrap();
            assert_eq!(stored, fragment.ciphertext);
            // Sealed bytes: nonce + share (secret_len) + tag.
            assert_eq!(stored.len(), 12 + secret.len() + 16);
            assert!(!stored
                .windows(secret.len().min(16))
                .any(|w| w == &secret[..secret.len().min(16)]));
        }
    }

    /// Store that starts failing after `allow` successful writes.
    struct QuotaStore {
        inner: MemoryStore,
        allow: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl FragmentStore for QuotaStore {
        async fn write(&self, location: &StorageLocation, bytes: &[u8]) -> Result<(), StoreError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) >= self.allow {
                return Err(StoreError::Unreachable("write quota exhausted".into()));
            }
            self.inner.write(location, bytes).await
        }

        async fn read(&self, location: &StorageLocation) -> Result<Vec<u8>, StoreError> {
            self.inner.read(location).await
        }

        async fn secure_overwrite(
            &self,
            location: &StorageLocation,
            passes: u32,
        ) -> Result<(), StoreError> {
            self.inner.secure_overwrite(location, passes).await
        }

        async fn delete(&self, location: &StorageLocation) -> Result<(), StoreError> {
            self.inner.delete(location).await
        }
    }

    #[tokio::test]
    async fn partial_store_failure_rolls_back_everything() {
        let registry = Arc::new(FragmentRegistry::new());
        let store = Arc::new(QuotaStore {
            inner: MemoryStore::new(),
            allow: 3,
            writes: AtomicUsize::new(0),
        });
        let vault = Arc::new(TrapdoorVault::new());
        let audit = Arc::new(AuditLog::new());
        let controller = FragmentationController::new(
            Arc::clone(&registry),
            Arc::clone(&store) as Arc<dyn FragmentStore>,
            Arc::clone(&vault),
            Arc::clone(&audit),
            Arc::new(ManualClock::at(50_000)),
        );

        let result = controller.fragment(b"doomed", &fast_policy()).await;
        assert!(matches!(result, Err(FragmentationError::Store(_))));

        // Nothing observable survives: no registration, no trapdoors, no
        // audit records, and the three successful writes were erased.
        assert_eq!(registry.live_sessions(), 0);
        assert_eq!(registry.active_fragments(), 0);
        assert!(vault.is_empty());
        assert!(audit.is_empty());
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn handles_and_metadata_line_up_with_session_order() {
        let h = setup();
        let receipt = h.controller.fragment(b"ordering", &fast_policy()).await.unwrap();

        for (i, handle) in receipt.handles.iter().enumerate() {
            assert_eq!(handle.session_id(), receipt.session.id);
            assert_eq!(handle.fragment_id(), receipt.session.fragment_ids[i]);
            assert_eq!(receipt.metadata[i].fragment_id, handle.fragment_id());
        }
    }
}
