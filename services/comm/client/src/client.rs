//! Client capability traits and shared lifecycle state.
//!
//! Clients are split by what they can actually do:
//!
//! - [`CommunicationClient`]: lifecycle and idleness, shared by every variant
//! - [`MessageClient`]: structured, asynchronous sends through a session
//!
//! Raw byte sends after a handshake belong to blocking-socket clients, which
//! override [`CommunicationClient::do_handshake`] and
//! [`CommunicationClient::send_raw`]. The pool holds clients as
//! `dyn CommunicationClient` and reads [`CommunicationClient::capabilities`]
//! to pick a dispatch strategy; calling a raw operation on a client that
//! lacks the capability fails with [`ClientError::Unsupported`].

use crate::error::ClientError;
use crate::outcome::SendOutcome;
use bytes::Bytes;
use comm_transport::{AckCallback, Message};
use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Identity of a client instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a fresh identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation sets a client supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Structured messages sent asynchronously through a session
    pub structured_async_send: bool,
    /// Raw bytes sent synchronously after a handshake
    pub raw_sync_send: bool,
}

/// Handshake exchange run over a raw stream before first use
pub trait Handshake {
    /// Perform the exchange
    fn exchange(&mut self, reader: &mut dyn Read, writer: &mut dyn Write) -> std::io::Result<()>;
}

/// Lifecycle and health contract shared by every client variant
pub trait CommunicationClient: Send + Sync + fmt::Debug + fmt::Display {
    /// Client identity
    fn id(&self) -> ClientId;

    /// Close gracefully. Returns `true` only for the call that closed it.
    fn close(&self) -> bool;

    /// Release the connection unconditionally
    fn force_close(&self);

    /// Whether the client has been closed
    fn is_closed(&self) -> bool;

    /// Whether the underlying connection is gone, even if the client is open
    fn is_session_closed(&self) -> bool;

    /// Elapsed time since the most recent activity on the connection
    fn idle_time(&self) -> Duration;

    /// Whether sends complete asynchronously
    fn is_async(&self) -> bool;

    /// Operation sets this client supports
    fn capabilities(&self) -> Capabilities;

    /// Run a handshake over the raw connection
    fn do_handshake(&self, _handshake: &mut dyn Handshake) -> Result<(), ClientError> {
        Err(ClientError::Unsupported {
            operation: "do_handshake",
            client: self.to_string(),
        })
    }

    /// Send raw bytes synchronously
    fn send_raw(&self, _data: &[u8]) -> Result<(), ClientError> {
        Err(ClientError::Unsupported {
            operation: "send_raw",
            client: self.to_string(),
        })
    }
}

/// Structured, asynchronous send capability
pub trait MessageClient: CommunicationClient {
    /// Send a pre-built, already framed buffer
    fn send_buffer(&self, data: Bytes) -> Result<SendOutcome, ClientError>;

    /// Send a message to the session's peer.
    ///
    /// `target` must be `None`: the session determines the destination.
    /// When `ack` is given and the send is still pending on return, `ack`
    /// fires exactly once with the eventual outcome. When the send resolved
    /// before return, the outcome is reported only through the return value
    /// and `ack` is dropped uninvoked.
    fn send_message(
        &self,
        target: Option<Uuid>,
        msg: Box<dyn Message>,
        ack: Option<AckCallback>,
    ) -> Result<SendOutcome, ClientError>;
}

/// Open/closed flag shared by client variants
#[derive(Debug, Default)]
pub struct ClientBase {
    closed: AtomicBool,
}

impl ClientBase {
    /// Create an open client state
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip to closed. Returns `true` only on the transition.
    pub fn close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark closed regardless of prior state
    pub fn force_close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
