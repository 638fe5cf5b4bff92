//! # Injected Time
//!
//! Every expiry decision in the engine flows through the [`Clock`] trait
//! instead of touching the system clock directly. Expiry is the core
//! security property of this engine; a property you can only test by
//! actually waiting five minutes is a property you will stop testing.
//!
//! Production code injects [`SystemClock`]. Tests inject [`ManualClock`]
//! and advance time explicitly, which makes "reconstruct at t=6min after a
//! 5min expiry" a synchronous assertion instead of a six-minute CI stall.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch. The engine's single time unit —
/// coarse enough to serialize everywhere, fine enough for jitter spreading.
pub type UnixMillis = u64;

/// A source of "now". Injected into every component that makes expiry
/// decisions (controller, daemon, validators, gate).
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the UNIX epoch.
    fn now_ms(&self) -> UnixMillis;
}

// ---------------------------------------------------------------------------
// SystemClock
// ---------------------------------------------------------------------------

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> UnixMillis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// A clock that only moves when told to. The workhorse of the expiry tests.
///
/// Shared freely across threads — reads and advances are atomic. Going
/// backwards is deliberately not offered; real clocks can regress, but the
/// engine treats time as monotonic and the tests should too.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at the given instant.
    pub fn at(now_ms: UnixMillis) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    /// Advance the clock by `delta_ms` milliseconds.
    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> UnixMillis {
        self.now.load(Ordering::SeqCst)
    }
}
