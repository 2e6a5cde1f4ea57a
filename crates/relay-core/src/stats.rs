//! Process-wide connection counters.
//!
//! Counters are plain atomics behind an `Arc`; nothing on the relay path
//! takes a lock to update them. A periodic reporter reads them for logging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

/// Aggregate counters shared by every connection of one listener.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    active: AtomicU64,
    total: AtomicU64,
    bytes: AtomicU64,
}

/// Point-in-time copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active: u64,
    pub total: u64,
    pub bytes: u64,
}

impl ConnectionStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new connection.
    ///
    /// The returned guard carries the connection's id (its position in the
    /// `total` sequence, starting at 1) and decrements `active` when dropped.
    pub fn open(self: &Arc<Self>) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        let id = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        ConnectionGuard {
            id,
            stats: Arc::clone(self),
        }
    }

    pub fn record_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Relaxed reads; fine for logging, not for synchronisation.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active: self.active.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// RAII guard that decrements the active count on drop.
/// Owns an `Arc` so it can be moved into spawned tasks.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: u64,
    stats: Arc<ConnectionStats>,
}

impl ConnectionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn record_bytes(&self, n: u64) {
        self.stats.record_bytes(n);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Log a snapshot every `every`. A zero interval disables reporting.
pub fn spawn_reporter(
    stats: Arc<ConnectionStats>,
    every: Duration,
    label: &'static str,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snap = stats.snapshot();
            info!(
                active = snap.active,
                total = snap.total,
                bytes = snap.bytes,
                "{label} stats"
            );
        }
    }))
}
