//! Atomic decision counters.
//!
//! Lock-free counters for tracking request volume and outcomes.
//! All atomics use `Relaxed` ordering — these are monotonic display counters
//! with no synchronization requirements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

struct StatsInner {
    total_requests: AtomicU64,
    redirects: AtomicU64,
    normal_flows: AtomicU64,
    links_signed: AtomicU64,
}

/// Thread-safe atomic decision statistics. Cheap to clone (Arc).
#[derive(Clone)]
pub struct DecisionStats {
    inner: Arc<StatsInner>,
}

/// Snapshot of current stats values, serializable to JSON.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub redirects: u64,
    pub normal_flows: u64,
    pub links_signed: u64,
}

impl DecisionStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsInner {
                total_requests: AtomicU64::new(0),
                redirects: AtomicU64::new(0),
                normal_flows: AtomicU64::new(0),
                links_signed: AtomicU64::new(0),
            }),
        }
    }

    pub fn inc_requests(&self) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_redirects(&self) {
        self.inner.redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_normal_flows(&self) {
        self.inner.normal_flows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_links_signed(&self) {
        self.inner.links_signed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            redirects: self.inner.redirects.load(Ordering::Relaxed),
            normal_flows: self.inner.normal_flows.load(Ordering::Relaxed),
            links_signed: self.inner.links_signed.load(Ordering::Relaxed),
        }
    }
}

impl Default for DecisionStats {
    fn default() -> Self {
        Self::new()
    }
}
