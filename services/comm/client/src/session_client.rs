//! Communication client bound to an established transport session.
//!
//! A [`SessionClient`] is only ever created after a lower layer has finished
//! connection setup, so it has no handshake or raw-byte capability. It owns
//! its session 1:1 for the life of the connection and never touches bytes;
//! it orchestrates the send request, acknowledgment registration and failure
//! classification around the session.

use crate::client::{Capabilities, ClientBase, ClientId, CommunicationClient, MessageClient};
use crate::error::ClientError;
use crate::outcome::SendOutcome;
use crate::stats::{ClientStats, ClientStatsSnapshot};
use bytes::Bytes;
use comm_transport::{
    clock, idle_time_at, AckCallback, Message, MetaKey, PendingSend, SendResult, TransportSession,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Client for a session-based, event-driven connection
#[derive(Debug)]
pub struct SessionClient {
    id: ClientId,
    base: ClientBase,
    session: Arc<dyn TransportSession>,
    stats: ClientStats,
}

impl SessionClient {
    /// Bind a new client to a freshly established session
    pub fn new(session: Arc<dyn TransportSession>) -> Self {
        let id = ClientId::new();

        if session.attach(MetaKey::Client, Arc::new(id)).is_some() {
            warn!("Session {} was already bound to a client; rebinding to {}", session.id(), id);
        }
        debug!("Created client {} for session {}", id, session.id());

        Self {
            id,
            base: ClientBase::new(),
            session,
            stats: ClientStats::default(),
        }
    }

    /// Underlying session
    pub fn session(&self) -> &Arc<dyn TransportSession> {
        &self.session
    }

    /// Snapshot of send counters
    pub fn stats(&self) -> ClientStatsSnapshot {
        self.stats.snapshot()
    }

    /// Idle time evaluated at `now` on the process clock
    pub fn idle_time_at(&self, now: Duration) -> Duration {
        // Session can be used for receiving and sending.
        idle_time_at(now, &self.session.activity())
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.base.is_closed() {
            return Err(ClientError::Closed {
                client: self.to_string(),
            });
        }
        Ok(())
    }

    fn release_session(&self) {
        let ours = self
            .session
            .meta(MetaKey::Client)
            .and_then(|v| v.downcast::<ClientId>().ok())
            .map(|bound| *bound == self.id)
            .unwrap_or(false);
        if ours {
            self.session.remove(MetaKey::Client);
        }

        self.session.close();
    }

    /// Turn a send that resolved before return into an outcome
    fn observe(&self, result: SendResult) -> Result<SendOutcome, ClientError> {
        match result {
            Ok(()) => {
                self.stats.record_accepted();
                Ok(SendOutcome::Accepted)
            }
            Err(e) => {
                debug!("Failed to send message [client={}, err={}]", self, e);

                if e.is_io_fault() {
                    self.stats.record_reconnect();
                    Ok(SendOutcome::NeedsReconnect(e))
                } else {
                    self.stats.record_rejected();
                    Err(ClientError::SendFailed {
                        client: self.to_string(),
                        source: e,
                    })
                }
            }
        }
    }

    fn in_flight(&self) -> Result<SendOutcome, ClientError> {
        self.stats.record_in_flight();
        Ok(SendOutcome::InFlight)
    }

    fn finish(&self, pending: PendingSend) -> Result<SendOutcome, ClientError> {
        match pending.try_result() {
            Some(result) => self.observe(result),
            None => self.in_flight(),
        }
    }
}

impl CommunicationClient for SessionClient {
    fn id(&self) -> ClientId {
        self.id
    }

    fn close(&self) -> bool {
        let res = self.base.close();

        if res {
            self.release_session();
        }

        res
    }

    fn force_close(&self) {
        self.base.force_close();

        self.release_session();
    }

    fn is_closed(&self) -> bool {
        self.base.is_closed()
    }

    fn is_session_closed(&self) -> bool {
        self.session.is_closed()
    }

    fn idle_time(&self) -> Duration {
        self.idle_time_at(clock::now())
    }

    fn is_async(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            structured_async_send: true,
            raw_sync_send: false,
        }
    }
}

impl MessageClient for SessionClient {
    fn send_buffer(&self, data: Bytes) -> Result<SendOutcome, ClientError> {
        self.ensure_open()?;

        self.stats.record_issued();
        let pending = self.session.send(data.into());

        self.finish(pending)
    }

    fn send_message(
        &self,
        target: Option<Uuid>,
        msg: Box<dyn Message>,
        ack: Option<AckCallback>,
    ) -> Result<SendOutcome, ClientError> {
        // Node ID is never provided in asynchronous send mode.
        debug_assert!(target.is_none(), "target must be None for session-bound sends");
        if let Some(target) = target {
            return Err(ClientError::UnexpectedTarget {
                client: self.to_string(),
                target: target.to_string(),
            });
        }

        self.ensure_open()?;

        self.stats.record_issued();
        let pending = self.session.send(msg.into());

        if let Some(ack) = ack {
            match pending.on_complete(ack) {
                // Registered while pending: the callback owns the outcome.
                Ok(()) => return self.in_flight(),
                // Already resolved: report through the return value only.
                Err(_unfired) if pending.is_done() => {}
                Err(_unfired) => {
                    warn!("Session {} refused acknowledgment callback [client={}]", self.session.id(), self);
                }
            }
        }

        self.finish(pending)
    }
}

impl fmt::Display for SessionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionClient [id={}, session={}", self.id, self.session.id())?;
        if let Some(peer) = self.session.remote_addr() {
            write!(f, ", peer={}", peer)?;
        }
        write!(f, ", closed={}]", self.base.is_closed())
    }
}
