//! Transport session abstraction consumed by communication clients.

use crate::activity::{idle_time_at, clock, ActivityTimestamps};
use crate::message::Outbound;
use crate::meta::{MetaKey, MetaValue};
use crate::pending::PendingSend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for a transport session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest frame accepted in either direction
    pub max_frame_size: usize,
    /// Initial read buffer capacity in bytes
    pub read_buffer_size: usize,
    /// Capacity of the inbound event channel
    pub event_channel_capacity: usize,
    /// Disable Nagle's algorithm on TCP streams
    pub tcp_nodelay: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: crate::frame::DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: 64 * 1024,
            event_channel_capacity: 1024,
            tcp_nodelay: true,
        }
    }
}

/// One established network connection.
///
/// Activity timestamps are offsets on the process clock
/// ([`crate::activity::clock::now`]) and never decrease.
pub trait TransportSession: Send + Sync + fmt::Debug {
    /// Session identifier, unique within the process
    fn id(&self) -> u64;

    /// Remote peer address, if the session is bound to a socket
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Issue a payload; the returned operation may already be resolved
    fn send(&self, payload: Outbound) -> PendingSend;

    /// Close the session. Returns `true` only for the call that closed it.
    fn close(&self) -> bool;

    /// Whether the session has been closed
    fn is_closed(&self) -> bool;

    /// Store a value in a metadata slot
    fn attach(&self, key: MetaKey, value: MetaValue) -> Option<MetaValue>;

    /// Clear a metadata slot
    fn remove(&self, key: MetaKey) -> Option<MetaValue>;

    /// Read a metadata slot
    fn meta(&self, key: MetaKey) -> Option<MetaValue>;

    /// Last time a message was fully received
    fn last_receive_time(&self) -> Duration;

    /// Last time a send was enqueued
    fn last_send_schedule_time(&self) -> Duration;

    /// Last time a send was fully written
    fn last_send_time(&self) -> Duration;

    /// Snapshot of the three activity timestamps
    fn activity(&self) -> ActivityTimestamps {
        ActivityTimestamps {
            last_receive: self.last_receive_time(),
            last_send_schedule: self.last_send_schedule_time(),
            last_send: self.last_send_time(),
        }
    }

    /// Elapsed time since the most recent activity in any direction
    fn idle_time(&self) -> Duration {
        idle_time_at(clock::now(), &self.activity())
    }
}

/// Events emitted by a running session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Received a complete frame
    MessageReceived {
        /// Session the frame arrived on
        session_id: u64,
        /// Decoded frame
        frame: crate::frame::Frame,
    },
    /// Session closed, locally or by the peer
    Closed {
        /// Session that closed
        session_id: u64,
        /// Reason, when the close was caused by an error
        reason: Option<String>,
    },
}
