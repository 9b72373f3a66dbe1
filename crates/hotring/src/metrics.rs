use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for ring activity.
///
/// All methods use `Ordering::Relaxed` because these are purely statistical
/// counters: no control flow depends on them being up to date, and slightly
/// stale reads are acceptable for observability.
#[derive(Debug, Default)]
pub struct Metrics {
    appends: AtomicU64,
    bytes_appended: AtomicU64,
    full_events: AtomicU64,
    bytes_read: AtomicU64,
    commit_spins: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_append(&self, bytes: u64) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_full_event(&self) {
        self.full_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_commit_spin(&self) {
        self.commit_spins.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            full_events: self.full_events.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            commit_spins: self.commit_spins.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`Metrics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub appends: u64,
    pub bytes_appended: u64,
    pub full_events: u64,
    pub bytes_read: u64,
    pub commit_spins: u64,
}
