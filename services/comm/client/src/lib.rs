//! Session-backed communication client: lifecycle, async send protocol, idle tracking.
//!
//! The client wraps an already established transport session and gives the
//! connection pool, failure detector and dispatcher one contract for
//! sending to a peer:
//!
//! - `close` / `force_close` with exactly-once graceful close
//! - buffer and message sends returning a [`SendOutcome`]
//! - per-send acknowledgment callbacks that fire at most once
//! - `idle_time` for pool eviction
//!
//! Transport faults become [`SendOutcome::NeedsReconnect`] so callers can
//! discard the connection cheaply; anything else is a [`ClientError`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod outcome;
pub mod session_client;
pub mod stats;

#[cfg(test)]
mod testing;

// Re-export main types
pub use client::{Capabilities, ClientBase, ClientId, CommunicationClient, Handshake, MessageClient};
pub use error::ClientError;
pub use outcome::SendOutcome;
pub use session_client::SessionClient;
pub use stats::{ClientStats, ClientStatsSnapshot};
