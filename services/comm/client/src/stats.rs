//! Per-client send counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Send counters kept by a client
#[derive(Debug, Default)]
pub struct ClientStats {
    issued: AtomicU64,
    accepted: AtomicU64,
    in_flight: AtomicU64,
    reconnects: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`ClientStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStatsSnapshot {
    /// Sends handed to the session
    pub issued: u64,
    /// Sends resolved successfully before the call returned
    pub accepted: u64,
    /// Sends still pending when the call returned
    pub in_flight: u64,
    /// Sends that produced a reconnect signal
    pub reconnects: u64,
    /// Sends rejected with a non-transport failure
    pub rejected: u64,
}

impl ClientStats {
    pub(crate) fn record_issued(&self) {
        self.issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_in_flight(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counters
    pub fn snapshot(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            issued: self.issued.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
