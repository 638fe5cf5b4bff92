//! # Storage Contract
//!
//! The engine does not implement storage. It defines the contract the
//! surrounding system must fulfill — write, read back, securely overwrite,
//! delete — and drives it through [`FragmentStore`]. Disk, database,
//! distributed KV: the backing medium is the caller's problem, injected at
//! construction like every other dependency here.
//!
//! [`MemoryStore`] is the reference implementation used by the test suite
//! and the demo binary. It honors the contract exactly, including the
//! overwrite-before-delete discipline, which makes it good enough to prove
//! engine behavior and useless as durable storage — both on purpose.
//!
//! A note on `secure_overwrite`: on wear-leveled media a logical overwrite
//! may never touch the physical cells. The engine's primary guarantee
//! therefore rests on trapdoor destruction; overwrite is defense-in-depth,
//! and what the daemon escalates on is a backend that cannot *confirm* the
//! overwrite, not one with imperfect physics.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a ciphertext lives, as far as the engine cares: an opaque key the
/// backing store can resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation(String);

impl StorageLocation {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The location does not exist (never written, or already deleted).
    #[error("storage location not found: {0}")]
    NotFound(String),

    /// The backend could not be reached. Retryable from the daemon's
    /// perspective, up to its bounded backoff budget.
    #[error("storage backend unreachable: {0}")]
    Unreachable(String),

    /// Anything else the backend wants to report.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// The contract a storage backend fulfills for the engine.
///
/// All operations are asynchronous and must be safe to call concurrently;
/// the daemon, controller, and gate share one store.
#[async_trait]
pub trait FragmentStore: Send + Sync {
    /// Persist `bytes` at `location`, overwriting any previous value.
    async fn write(&self, location: &StorageLocation, bytes: &[u8]) -> Result<(), StoreError>;

    /// Read back the bytes at `location`.
    async fn read(&self, location: &StorageLocation) -> Result<Vec<u8>, StoreError>;

    /// Overwrite the value at `location` with `passes` rounds of
    /// pseudorandom data. Returning `Ok` asserts the overwrite was
    /// *confirmed* by the backend — the daemon treats anything else as a
    /// deletion-confirmation problem.
    async fn secure_overwrite(
        &self,
        location: &StorageLocation,
        passes: u32,
    ) -> Result<(), StoreError>;

    /// Deallocate `location`. Deleting a missing location is an error;
    /// the daemon's idempotence lives above this layer, in the lifecycle
    /// state, not in the store.
    async fn delete(&self, location: &StorageLocation) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Concurrent in-memory store for tests and the demo harness.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cells: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live locations.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Test hook: raw view of a cell, bypassing the contract.
    pub fn peek(&self, location: &StorageLocation) -> Option<Vec<u8>> {
        self.cells.get(location.as_str()).map(|v| v.clone())
    }
}

#[async_trait]
impl FragmentStore for MemoryStore {
    async fn write(&self, location: &StorageLocation, bytes: &[u8]) -> Result<(), StoreError> {
        self.cells
            .insert(location.as_str().to_owned(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, location: &StorageLocation) -> Result<Vec<u8>, StoreError> {
        self.cells
            .get(location.as_str())
            .map(|v| v.clone())
            .ok_or_else(|| StoreError::NotFound(location.as_str().to_owned()))
    }

    async fn secure_overwrite(
        &self,
        location: &StorageLocation,
        passes: u32,
    ) -> Result<(), StoreError> {
        let mut cell = self
            .cells
            .get_mut(location.as_str())
            .ok_or_else(|| StoreError::NotFound(location.as_str().to_owned()))?;

        let mut rng = rand::rngs::OsRng;
        for _ in 0..passes.max(1) {
            rng.fill_bytes(&mut cell);
        }
        // Final deterministic pass so the cell provably carries no
        // RNG-chosen residue of its own history.
        cell.fill(0);
        Ok(())
    }

    async fn delete(&self, location: &StorageLocation) -> Result<(), StoreError> {
        self.cells
            .remove(location.as_str())
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(location.as_str().to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(s: &str) -> StorageLocation {
        StorageLocation::new(s)
    }

    #[tokio::test]
    async fn write_read_round_trip() {
        let store = MemoryStore::new();
        store.write(&loc("a"), b"ciphertext").await.unwrap();
        assert_eq!(store.read(&loc("a")).await.unwrap(), b"ciphertext");
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.read(&loc("ghost")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn overwrite_destroys_content_in_place() {
        let store = MemoryStore::new();
        store.write(&loc("x"), b"sensitive bytes").await.unwrap();

        store.secure_overwrite(&loc("x"), 7).await.unwrap();

        // Same length, zeroed content — the original is gone but the cell
        // still exists until delete.
        let after = store.peek(&loc("x")).unwrap();
        assert_eq!(after.len(), b"sensitive bytes".len());
        assert!(after.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn overwrite_missing_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.secure_overwrite(&loc("ghost"), 3).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_and_second_delete_errors() {
        let store = MemoryStore::new();
        store.write(&loc("x"), b"bytes").await.unwrap();

        store.delete(&loc("x")).await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            store.delete(&loc("x")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_writes_to_distinct_cells() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let s = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                s.write(&loc(&format!("cell-{i}")), &[i as u8; 8]).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.len(), 16);
    }
}
