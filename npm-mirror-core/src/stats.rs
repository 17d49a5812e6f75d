//! Counters shared by every worker during a run.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct SyncStats {
    packages_scheduled: AtomicU64,
    tarballs_scheduled: AtomicU64,
    fresh: AtomicU64,
    not_modified: AtomicU64,
    skipped: AtomicU64,
    unpublished: AtomicU64,
    versions_removed: AtomicU64,
    bytes_written: AtomicU64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package_scheduled(&self) {
        self.packages_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tarball_scheduled(&self) {
        self.tarballs_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fresh(&self) {
        self.fresh.fetch_add(1, Ordering::Relaxed);
    }

    pub fn not_modified(&self) {
        self.not_modified.fetch_add(1, Ordering::Relaxed);
    }

    /// Forbidden, not found, or empty responses.
    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Package documents stored from a 404 body.
    pub fn unpublished(&self) {
        self.unpublished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn version_removed(&self) {
        self.versions_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wrote(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn summary(&self, failed_tasks: usize) -> SyncSummary {
        SyncSummary {
            packages_scheduled: self.packages_scheduled.load(Ordering::Relaxed),
            tarballs_scheduled: self.tarballs_scheduled.load(Ordering::Relaxed),
            fresh: self.fresh.load(Ordering::Relaxed),
            not_modified: self.not_modified.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            unpublished: self.unpublished.load(Ordering::Relaxed),
            failed_tasks: failed_tasks as u64,
            versions_removed: self.versions_removed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`SyncStats`] at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub packages_scheduled: u64,
    pub tarballs_scheduled: u64,
    pub fresh: u64,
    pub not_modified: u64,
    pub skipped: u64,
    pub unpublished: u64,
    pub failed_tasks: u64,
    pub versions_removed: u64,
    pub bytes_written: u64,
}
