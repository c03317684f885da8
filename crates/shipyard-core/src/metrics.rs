//! Process-wide deployment counters.
//!
//! Incremented at the call site without locking; [`Metrics::flush`] reports
//! them all as one `info!` event, typically when a CLI run ends.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    deployments_started: AtomicU64,
    deployments_blocked: AtomicU64,
    deployments_failed: AtomicU64,
    deployments_succeeded: AtomicU64,
    builds_submitted: AtomicU64,
    status_polls: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub deployments_started: u64,
    pub deployments_blocked: u64,
    pub deployments_failed: u64,
    pub deployments_succeeded: u64,
    pub builds_submitted: u64,
    pub status_polls: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64, name: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(metric = name, "counter incremented");
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            deployments_started: AtomicU64::new(0),
            deployments_blocked: AtomicU64::new(0),
            deployments_failed: AtomicU64::new(0),
            deployments_succeeded: AtomicU64::new(0),
            builds_submitted: AtomicU64::new(0),
            status_polls: AtomicU64::new(0),
        }
    }

    pub fn inc_started(&self) {
        bump(&self.deployments_started, "deployments_started");
    }

    pub fn inc_blocked(&self) {
        bump(&self.deployments_blocked, "deployments_blocked");
    }

    pub fn inc_failed(&self) {
        bump(&self.deployments_failed, "deployments_failed");
    }

    pub fn inc_succeeded(&self) {
        bump(&self.deployments_succeeded, "deployments_succeeded");
    }

    pub fn inc_builds_submitted(&self) {
        bump(&self.builds_submitted, "builds_submitted");
    }

    /// One read of a build or service status inside a polling loop.
    pub fn inc_status_polls(&self) {
        bump(&self.status_polls, "status_polls");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            deployments_started: self.deployments_started.load(Ordering::Relaxed),
            deployments_blocked: self.deployments_blocked.load(Ordering::Relaxed),
            deployments_failed: self.deployments_failed.load(Ordering::Relaxed),
            deployments_succeeded: self.deployments_succeeded.load(Ordering::Relaxed),
            builds_submitted: self.builds_submitted.load(Ordering::Relaxed),
            status_polls: self.status_polls.load(Ordering::Relaxed),
        }
    }

    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            deployments_started = s.deployments_started,
            deployments_blocked = s.deployments_blocked,
            deployments_failed = s.deployments_failed,
            deployments_succeeded = s.deployments_succeeded,
            builds_submitted = s.builds_submitted,
            status_polls = s.status_polls,
        );
    }

    pub fn reset(&self) {
        for counter in [
            &self.deployments_started,
            &self.deployments_blocked,
            &self.deployments_failed,
            &self.deployments_succeeded,
            &self.builds_submitted,
            &self.status_polls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
