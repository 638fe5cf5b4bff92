//! # Fragment Registry
//!
//! The shared, injectable map of live sessions and fragments. Three parties
//! touch it concurrently — the controller (insert), the daemon (scan,
//! destroy, remove), and the gate (read) — and none of them takes a global
//! lock.
//!
//! ## Locking model
//!
//! - The maps themselves are `DashMap`s: sharded, concurrent, no global
//!   lock for lookups or scans.
//! - Every fragment sits behind its own `tokio::sync::RwLock`. The daemon
//!   takes the *write* lock for the entire destruction sequence — which
//!   spans awaits into the storage backend, hence tokio locks and not
//!   parking_lot — so a gate read can never observe a half-erased
//!   fragment.
//! - Batch registration takes a registration mutex so a session and all of
//!   its fragments appear atomically: no scan can see a session whose
//!   fragments are still trickling in, and no fragment ever exists outside
//!   the daemon's scan set.
//!
//! Purged fragments are removed from the map (that *is* the "active
//! registry" of the design); the session record outlives them until the
//! daemon retires it, so late readers can still distinguish "expired" from
//! "never existed".

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::fragment::{binding_hash, Fragment, FragmentId, Session, SessionId};
use crate::time::UnixMillis;

/// Registry consistency failures. These indicate caller bugs (or UUID
/// collisions, which indicate cosmic rays), not runtime conditions.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session {0} is already registered")]
    DuplicateSession(SessionId),

    #[error("fragment {0} is already registered")]
    DuplicateFragment(FragmentId),

    #[error("fragment batch does not match session fragment list")]
    BatchMismatch,
}

/// Shared handle to one fragment's record and its destruction lock.
pub type FragmentCell = Arc<RwLock<Fragment>>;

/// Concurrency-safe insert/scan/remove over sessions and fragments.
#[derive(Debug, Default)]
pub struct FragmentRegistry {
    sessions: DashMap<SessionId, Session>,
    fragments: DashMap<FragmentId, FragmentCell>,
    /// Serializes batch registration only. Scans and reads never take it.
    registration: Mutex<()>,
}

impl FragmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Atomically register a session together with all of its fragments.
    ///
    /// All-or-nothing: on any duplicate the registry is left untouched.
    /// After this returns, every fragment is inside the daemon's scan set —
    /// creation and expiry-registration are inseparable by construction.
    pub fn register_session(
        &self,
        session: Session,
        fragments: Vec<Fragment>,
    ) -> Result<(), RegistryError> {
        let _guard = self.registration.lock();

        if session.fragment_ids.len() != fragments.len()
            || fragments
                .iter()
                .any(|f| !session.fragment_ids.contains(&f.id))
        {
            return Err(RegistryError::BatchMismatch);
        }
        if self.sessions.contains_key(&session.id) {
            return Err(RegistryError::DuplicateSession(session.id));
        }
        if let Some(f) = fragments.iter().find(|f| self.fragments.contains_key(&f.id)) {
            return Err(RegistryError::DuplicateFragment(f.id));
        }

        self.sessions.insert(session.id, session);
        for fragment in fragments {
            self.fragments
                .insert(fragment.id, Arc::new(RwLock::new(fragment)));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// The immutable session record, if not yet retired.
    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// The shared cell for a fragment — what the daemon locks for
    /// destruction. `None` once purged and removed.
    pub fn fragment_cell(&self, id: &FragmentId) -> Option<FragmentCell> {
        // Clone the Arc out and drop the shard guard immediately; holding
        // DashMap guards across awaits is how deadlocks are born.
        self.fragments.get(id).map(|cell| Arc::clone(&cell))
    }

    /// A point-in-time copy of a fragment's record.
    pub async fn snapshot(&self, id: &FragmentId) -> Option<Fragment> {
        let cell = self.fragment_cell(id)?;
        let guard = cell.read().await;
        Some(guard.clone())
    }

    // -----------------------------------------------------------------------
    // Scanning
    // -----------------------------------------------------------------------

    /// Ids of fragments whose expiry has passed at `now`.
    ///
    /// Uses `try_read`: a fragment whose write lock is held is mid-
    /// destruction already, and skipping it is both correct and exactly
    /// what keeps the scan non-blocking.
    pub fn scan_expired(&self, now: UnixMillis) -> Vec<FragmentId> {
        let mut due = Vec::new();
        for entry in self.fragments.iter() {
            if let Ok(fragment) = entry.value().try_read() {
                if fragment.is_expired(now) {
                    due.push(fragment.id);
                }
            }
        }
        due
    }

    /// Number of fragments currently in the active registry.
    pub fn active_fragments(&self) -> usize {
        self.fragments.len()
    }

    /// Number of live (unretired) sessions.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Pull a fragment's expiry to `now`, consuming it. Used by the gate
    /// for single-use sessions; the daemon picks the fragment up on its
    /// next sweep. The binding hash is recomputed so the record stays
    /// self-consistent — validators still hold the original metadata and
    /// will rightly refuse the fragment from here on.
    pub async fn expire_now(&self, id: &FragmentId, now: UnixMillis) {
        if let Some(cell) = self.fragment_cell(id) {
            let mut fragment = cell.write().await;
            // Expiry must stay strictly after creation.
            let expires = now.max(fragment.created_at_ms + 1);
            fragment.expires_at_ms = expires;
            fragment.validation_hash = binding_hash(&fragment.id, expires);
        }
    }

    /// Drop a purged fragment from the active registry. The daemon calls
    /// this as the final step of destruction; calling it twice is a no-op.
    pub fn remove_fragment(&self, id: &FragmentId) {
        self.fragments.remove(id);
    }

    /// Retire a session whose fragments are all gone. Returns `true` if the
    /// session was removed, `false` if fragments remain or it was already
    /// retired.
    pub fn retire_session(&self, id: &SessionId) -> bool {
        let _guard = self.registration.lock();

        let all_gone = match self.sessions.get(id) {
            Some(session) => session
                .fragment_ids
                .iter()
                .all(|fid| !self.fragments.contains_key(fid)),
            None => return false,
        };

        if all_gone {
            self.sessions.remove(id);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{FragmentationPolicy, LifecycleState, SecurityLevel};
    use crate::storage::StorageLocation;
    use crate::timelock::TimeLockPuzzle;

    fn make_session_with_fragments(count: u8, expires_at_ms: u64) -> (Session, Vec<Fragment>) {
        let session_id = SessionId::generate();
        let mut fragments = Vec::new();
        for index in 1..=count {
            let id = FragmentId::generate();
            let (puzzle, _) = TimeLockPuzzle::generate(16);
            fragments.push(Fragment {
                id,
                session_id,
                index,
                ciphertext: vec![index; 8],
                puzzle,
                location: StorageLocation::new(format!("frag/{id}")),
                created_at_ms: 1_000,
                expires_at_ms,
                erase_passes: FragmentationPolicy::default().erase_passes,
                validation_hash: binding_hash(&id, expires_at_ms),
                state: LifecycleState::Active,
            });
        }
        let session = Session {
            id: session_id,
            threshold: count.min(2),
            total_shares: count,
            created_at_ms: 1_000,
            security_level: SecurityLevel::Standard,
            secret_len: 8,
            checksum: [0u8; 32],
            fragment_ids: fragments.iter().map(|f| f.id).collect(),
            single_use: false,
        };
        (session, fragments)
    }

    #[tokio::test]
    async fn register_and_snapshot() {
        let registry = FragmentRegistry::new();
        let (session, fragments) = make_session_with_fragments(3, 60_000);
        let first = fragments[0].id;

        registry.register_session(session.clone(), fragments).unwrap();

        assert_eq!(registry.live_sessions(), 1);
        assert_eq!(registry.active_fragments(), 3);

        let snap = registry.snapshot(&first).await.unwrap();
        assert_eq!(snap.session_id, session.id);
        assert_eq!(snap.state, LifecycleState::Active);
    }

    #[tokio::test]
    async fn duplicate_session_rejected_atomically() {
        let registry = FragmentRegistry::new();
        let (session, fragments) = make_session_with_fragments(2, 60_000);

        registry
            .register_session(session.clone(), fragments.clone())
            .unwrap();

        // Re-registering must fail and must not disturb existing entries.
        assert!(matches!(
            registry.register_session(session, fragments),
            Err(RegistryError::DuplicateSession(_))
        ));
        assert_eq!(registry.active_fragments(), 2);
    }

    #[tokio::test]
    async fn batch_mismatch_rejected() {
        let registry = FragmentRegistry::new();
        let (session, mut fragments) = make_session_with_fragments(3, 60_000);
        fragments.pop();

        assert!(matches!(
            registry.register_session(session, fragments),
            Err(RegistryError::BatchMismatch)
        ));
        assert_eq!(registry.live_sessions(), 0);
    }

    #[tokio::test]
    async fn scan_finds_only_expired() {
        let registry = FragmentRegistry::new();
        let (s1, f1) = make_session_with_fragments(2, 5_000);
        let (s2, f2) = make_session_with_fragments(2, 50_000);
        let expired_ids: Vec<FragmentId> = f1.iter().map(|f| f.id).collect();

        registry.register_session(s1, f1).unwrap();
        registry.register_session(s2, f2).unwrap();

        let mut due = registry.scan_expired(10_000);
        due.sort();
        let mut expected = expired_ids;
        expected.sort();
        assert_eq!(due, expected);
    }

    #[tokio::test]
    async fn scan_skips_fragments_under_destruction() {
        let registry = FragmentRegistry::new();
        let (session, fragments) = make_session_with_fragments(2, 5_000);
        let locked_id = fragments[0].id;
        registry.register_session(session, fragments).unwrap();

        let cell = registry.fragment_cell(&locked_id).unwrap();
        let _write_guard = cell.write().await;

        let due = registry.scan_expired(10_000);
        assert_eq!(due.len(), 1);
        assert_ne!(due[0], locked_id);
    }

    #[tokio::test]
    async fn expire_now_pulls_expiry_and_rebinds() {
        let registry = FragmentRegistry::new();
        let (session, fragments) = make_session_with_fragments(1, 900_000);
        let id = fragments[0].id;
        registry.register_session(session, fragments).unwrap();

        registry.expire_now(&id, 2_000).await;

        let snap = registry.snapshot(&id).await.unwrap();
        assert_eq!(snap.expires_at_ms, 2_000);
        assert!(snap.is_expired(2_000));
        assert_eq!(snap.validation_hash, binding_hash(&id, 2_000));
        assert!(snap.expires_at_ms > snap.created_at_ms);
    }

    #[tokio::test]
    async fn retire_session_only_after_all_fragments_removed() {
        let registry = FragmentRegistry::new();
        let (session, fragments) = make_session_with_fragments(2, 5_000);
        let ids: Vec<FragmentId> = fragments.iter().map(|f| f.id).collect();
        let sid = session.id;
        registry.register_session(session, fragments).unwrap();

        assert!(!registry.retire_session(&sid));

        registry.remove_fragment(&ids[0]);
        assert!(!registry.retire_session(&sid));

        registry.remove_fragment(&ids[1]);
        assert!(registry.retire_session(&sid));
        assert!(registry.session(&sid).is_none());

        // Second retire is a no-op.
        assert!(!registry.retire_session(&sid));
    }

    #[tokio::test]
    async fn remove_fragment_is_idempotent() {
        let registry = FragmentRegistry::new();
        let (session, fragments) = make_session_with_fragments(1, 5_000);
        let id = fragments[0].id;
        registry.register_session(session, fragments).unwrap();

        registry.remove_fragment(&id);
        registry.remove_fragment(&id);
        assert_eq!(registry.active_fragments(), 0);
    }
}
