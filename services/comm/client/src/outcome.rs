//! Result of a send accepted by a client.

use comm_transport::TransportError;
use std::sync::Arc;

/// What happened to a send by the time the send call returned
#[must_use]
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Resolved successfully before the call returned
    Accepted,
    /// Still pending; any acknowledgment callback reports the result
    InFlight,
    /// Resolved with a transport fault. Discard this connection; the send is
    /// safe to retry on another one.
    NeedsReconnect(Arc<TransportError>),
}

impl SendOutcome {
    /// Whether the caller should drop this connection and reconnect
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, SendOutcome::NeedsReconnect(_))
    }

    /// Whether the session took the send (resolved or not)
    pub fn is_accepted(&self) -> bool {
        matches!(self, SendOutcome::Accepted | SendOutcome::InFlight)
    }
}
