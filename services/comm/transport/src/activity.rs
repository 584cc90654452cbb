//! Session activity timestamps and idle-time computation.
//!
//! Timestamps are monotonic offsets from a process-wide anchor taken on first
//! use, so they can be stored in atomics and compared without a wall clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic process clock
pub mod clock {
    use super::*;

    static START: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);

    /// Elapsed time since the process clock anchor
    pub fn now() -> Duration {
        START.elapsed()
    }
}

/// Snapshot of the three activity timestamps of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityTimestamps {
    /// Last message fully received
    pub last_receive: Duration,
    /// Last send enqueued (not necessarily written)
    pub last_send_schedule: Duration,
    /// Last send whose bytes were fully flushed
    pub last_send: Duration,
}

/// Idle time at `now`: elapsed time since the most recent activity in any direction
pub fn idle_time_at(now: Duration, ts: &ActivityTimestamps) -> Duration {
    let since_receive = now.saturating_sub(ts.last_receive);
    let since_schedule = now.saturating_sub(ts.last_send_schedule);
    let since_send = now.saturating_sub(ts.last_send);

    since_receive.min(since_schedule).min(since_send)
}

/// Atomically updated activity timestamps.
///
/// Each stamp only moves forward even if writers race.
#[derive(Debug)]
pub struct ActivityTracker {
    last_receive_ms: AtomicU64,
    last_send_schedule_ms: AtomicU64,
    last_send_ms: AtomicU64,
}

impl ActivityTracker {
    /// Create a tracker with every stamp set to the current time
    pub fn new() -> Self {
        let now = as_millis(clock::now());
        Self {
            last_receive_ms: AtomicU64::new(now),
            last_send_schedule_ms: AtomicU64::new(now),
            last_send_ms: AtomicU64::new(now),
        }
    }

    /// Record a fully received message
    pub fn touch_receive(&self) {
        self.last_receive_ms
            .fetch_max(as_millis(clock::now()), Ordering::AcqRel);
    }

    /// Record an enqueued send
    pub fn touch_send_schedule(&self) {
        self.last_send_schedule_ms
            .fetch_max(as_millis(clock::now()), Ordering::AcqRel);
    }

    /// Record a flushed send
    pub fn touch_send(&self) {
        self.last_send_ms
            .fetch_max(as_millis(clock::now()), Ordering::AcqRel);
    }

    /// Last receive time
    pub fn last_receive(&self) -> Duration {
        Duration::from_millis(self.last_receive_ms.load(Ordering::Acquire))
    }

    /// Last send-schedule time
    pub fn last_send_schedule(&self) -> Duration {
        Duration::from_millis(self.last_send_schedule_ms.load(Ordering::Acquire))
    }

    /// Last send time
    pub fn last_send(&self) -> Duration {
        Duration::from_millis(self.last_send_ms.load(Ordering::Acquire))
    }

    /// Snapshot all three stamps
    pub fn snapshot(&self) -> ActivityTimestamps {
        ActivityTimestamps {
            last_receive: self.last_receive(),
            last_send_schedule: self.last_send_schedule(),
            last_send: self.last_send(),
        }
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn as_millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}
