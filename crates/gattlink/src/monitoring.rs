//! Operational counters for link health monitoring

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Link Statistics
// ----------------------------------------------------------------------------

/// Counters maintained by the driver task. Shared with facade handles via
/// `Arc`; reads are lock-free.
#[derive(Debug, Default)]
pub struct LinkStats {
    /// Operations resolved successfully
    pub ops_completed: AtomicU64,
    /// Operations resolved with an error
    pub ops_failed: AtomicU64,
    /// Completions that arrived with no operation outstanding
    pub protocol_violations: AtomicU64,
    /// Unsolicited notifications dropped for lack of a registered handler
    pub notifications_dropped: AtomicU64,
    /// Times the link dropped while work was outstanding
    pub connections_lost: AtomicU64,
    /// Reconnect attempts synthesized by the auto-connect policy
    pub reconnect_attempts: AtomicU64,
    /// Adapter power-cycle recoveries triggered by a hang status
    pub adapter_recoveries: AtomicU64,
}

impl LinkStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ops_completed: self.ops_completed.load(Ordering::Relaxed),
            ops_failed: self.ops_failed.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            adapter_recoveries: self.adapter_recoveries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the link counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub ops_completed: u64,
    pub ops_failed: u64,
    pub protocol_violations: u64,
    pub notifications_dropped: u64,
    pub connections_lost: u64,
    pub reconnect_attempts: u64,
    pub adapter_recoveries: u64,
}
