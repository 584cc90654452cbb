//! Stream-backed transport session.
//!
//! A [`StreamSession`] owns one [`IoStream`] and runs two tasks over it: a
//! writer that drains a FIFO queue of framed sends and resolves their pending
//! operations, and a reader that decodes inbound frames into
//! [`SessionEvent`]s. Either task closing the session stops both.
//!
//! A local `close` stops new sends and lets the writer flush what it already
//! accepted. A fault (write error, read error, peer EOF) aborts instead: the
//! queued sends fail with [`TransportError::SessionClosed`].

use crate::activity::ActivityTracker;
use crate::error::TransportError;
use crate::frame::{encode_message, FrameDecoder, MAX_FRAME_SIZE_LIMIT};
use crate::message::Outbound;
use crate::meta::{MetaKey, MetaValue, SessionMeta};
use crate::pending::{PendingSend, SendCompleter};
use crate::session::{SessionConfig, SessionEvent, TransportSession};
use crate::transport::{connect_tcp, IoStream};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// How the I/O tasks should wind down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Running,
    /// Write everything already queued, then stop
    Drain,
    /// Stop now and fail whatever is queued
    Abort,
}

struct WriteRequest {
    bytes: Bytes,
    completer: SendCompleter,
}

/// Statistics for a session
#[derive(Debug, Default)]
struct SessionCounters {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
}

/// Point-in-time copy of session statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Total bytes received
    pub bytes_in: u64,
    /// Total bytes sent
    pub bytes_out: u64,
    /// Number of frames received
    pub frames_received: u64,
    /// Number of frames sent
    pub frames_sent: u64,
}

/// Transport session running over an [`IoStream`]
pub struct StreamSession {
    id: u64,
    peer: Option<SocketAddr>,
    config: SessionConfig,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<Shutdown>,
    write_tx: mpsc::UnboundedSender<WriteRequest>,
    activity: ActivityTracker,
    meta: SessionMeta,
    counters: SessionCounters,
}

impl StreamSession {
    /// Start a session over an established stream.
    ///
    /// Spawns the reader and writer tasks on the current tokio runtime.
    /// Inbound frames and the final close are reported on `event_tx`.
    pub fn start(
        stream: IoStream,
        mut config: SessionConfig,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> std::io::Result<Arc<StreamSession>> {
        if config.max_frame_size > MAX_FRAME_SIZE_LIMIT {
            warn!(
                "max_frame_size {} exceeds the wire limit; using {}",
                config.max_frame_size, MAX_FRAME_SIZE_LIMIT
            );
            config.max_frame_size = MAX_FRAME_SIZE_LIMIT;
        }
        stream.set_nodelay(config.tcp_nodelay)?;
        let peer = stream.peer_addr();

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(Shutdown::Running);

        let session = Arc::new(StreamSession {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            config,
            closed: AtomicBool::new(false),
            shutdown_tx,
            write_tx,
            activity: ActivityTracker::new(),
            meta: SessionMeta::new(),
            counters: SessionCounters::default(),
        });

        info!("Starting session {} with {:?}", session.id, peer);

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(write_loop(
            session.clone(),
            writer,
            write_rx,
            shutdown_rx.clone(),
        ));
        tokio::spawn(read_loop(session.clone(), reader, event_tx, shutdown_rx));

        Ok(session)
    }

    /// Connect to a peer over TCP and start a session
    pub async fn connect(
        addr: SocketAddr,
        config: SessionConfig,
        connect_timeout: Duration,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<StreamSession>, TransportError> {
        debug!("Connecting session to {}", addr);
        let stream = tokio::time::timeout(connect_timeout, connect_tcp(addr))
            .await
            .map_err(|_| {
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                ))
            })??;

        Ok(Self::start(IoStream::Plain(stream), config, event_tx)?)
    }

    /// Snapshot of session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            bytes_in: self.counters.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.counters.bytes_out.load(Ordering::Relaxed),
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
        }
    }

    /// Reason recorded when the session was closed by a fault
    pub fn last_error(&self) -> Option<Arc<String>> {
        self.meta.get::<String>(MetaKey::LastError)
    }

    fn close_with_reason(&self, reason: Option<&str>, mode: Shutdown) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if let Some(reason) = reason {
            self.meta
                .attach(MetaKey::LastError, Arc::new(reason.to_string()));
            info!("Session {} closed: {}", self.id, reason);
        } else {
            info!("Session {} closed", self.id);
        }

        self.shutdown_tx.send_replace(mode);
        true
    }

    fn frame(&self, payload: Outbound) -> Result<Bytes, TransportError> {
        let limit = self.config.max_frame_size;
        match payload {
            Outbound::Buffer(buf) if buf.len() > limit => Err(TransportError::FrameTooLarge {
                size: buf.len(),
                limit,
            }),
            Outbound::Buffer(buf) => Ok(buf),
            Outbound::Message(msg) => encode_message(msg.as_ref(), limit),
        }
    }
}

impl TransportSession for StreamSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn send(&self, payload: Outbound) -> PendingSend {
        if self.is_closed() {
            return PendingSend::failed(TransportError::SessionClosed);
        }

        let bytes = match self.frame(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Session {} rejected send: {}", self.id, e);
                return PendingSend::failed(e);
            }
        };

        let (pending, completer) = PendingSend::new();
        self.activity.touch_send_schedule();

        if let Err(mpsc::error::SendError(req)) = self.write_tx.send(WriteRequest { bytes, completer }) {
            req.completer.fail(TransportError::SessionClosed);
        }

        pending
    }

    fn close(&self) -> bool {
        self.close_with_reason(None, Shutdown::Drain)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn attach(&self, key: MetaKey, value: MetaValue) -> Option<MetaValue> {
        self.meta.attach(key, value)
    }

    fn remove(&self, key: MetaKey) -> Option<MetaValue> {
        self.meta.remove(key)
    }

    fn meta(&self, key: MetaKey) -> Option<MetaValue> {
        self.meta.get_raw(key)
    }

    fn last_receive_time(&self) -> Duration {
        self.activity.last_receive()
    }

    fn last_send_schedule_time(&self) -> Duration {
        self.activity.last_send_schedule()
    }

    fn last_send_time(&self) -> Duration {
        self.activity.last_send()
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn write_loop(
    session: Arc<StreamSession>,
    mut writer: WriteHalf<IoStream>,
    mut write_rx: mpsc::UnboundedReceiver<WriteRequest>,
    mut shutdown_rx: watch::Receiver<Shutdown>,
) {
    let mut healthy = loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break true,

            req = write_rx.recv() => {
                let Some(req) = req else { break true };
                if !write_request(&session, &mut writer, req).await {
                    break false;
                }
            }
        }
    };

    // No new requests get in past this point; `send` fails them inline.
    write_rx.close();

    let mode = *shutdown_rx.borrow();
    if healthy && mode == Shutdown::Drain {
        let mut flushed = 0usize;
        while let Ok(req) = write_rx.try_recv() {
            if !write_request(&session, &mut writer, req).await {
                healthy = false;
                break;
            }
            flushed += 1;
        }
        if flushed > 0 {
            debug!("Session {} flushed {} queued sends on close", session.id, flushed);
        }
    }

    let mut dropped = 0usize;
    while let Ok(req) = write_rx.try_recv() {
        req.completer.fail(TransportError::SessionClosed);
        dropped += 1;
    }
    if dropped > 0 {
        debug!("Session {} failed {} queued sends on close", session.id, dropped);
    }

    if healthy {
        if let Err(e) = writer.shutdown().await {
            trace!("Session {} shutdown: {}", session.id, e);
        }
    }
}

/// Write one request and resolve it. Returns `false` once the stream is broken.
async fn write_request(
    session: &StreamSession,
    writer: &mut WriteHalf<IoStream>,
    req: WriteRequest,
) -> bool {
    let res = match writer.write_all(&req.bytes).await {
        Ok(()) => writer.flush().await,
        Err(e) => Err(e),
    };

    match res {
        Ok(()) => {
            session.activity.touch_send();
            session.counters.bytes_out.fetch_add(req.bytes.len() as u64, Ordering::Relaxed);
            session.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
            trace!("Session {} wrote {} bytes", session.id, req.bytes.len());
            req.completer.succeed();
            true
        }
        Err(e) => {
            warn!("Session {} write failed: {}", session.id, e);
            let reason = format!("write failed: {}", e);
            req.completer.fail(TransportError::Io(e));
            session.close_with_reason(Some(&reason), Shutdown::Abort);
            false
        }
    }
}

async fn read_loop(
    session: Arc<StreamSession>,
    mut reader: ReadHalf<IoStream>,
    event_tx: mpsc::Sender<SessionEvent>,
    mut shutdown_rx: watch::Receiver<Shutdown>,
) {
    let mut decoder = FrameDecoder::with_max_frame_size(session.config.max_frame_size);
    let mut buffer = BytesMut::with_capacity(session.config.read_buffer_size);

    let reason: Option<String> = 'outer: loop {
        loop {
            match decoder.decode(&mut buffer) {
                Ok(Some(frame)) => {
                    session.activity.touch_receive();
                    session.counters.frames_received.fetch_add(1, Ordering::Relaxed);
                    trace!(
                        "Session {} received frame type {} ({} bytes)",
                        session.id,
                        frame.type_code,
                        frame.body.len()
                    );
                    let event = SessionEvent::MessageReceived {
                        session_id: session.id,
                        frame,
                    };
                    if event_tx.send(event).await.is_err() {
                        debug!("Session {} event receiver dropped", session.id);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Frame decode error on session {}: {}", session.id, e);
                    break 'outer Some(format!("decode failed: {}", e));
                }
            }
        }

        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break None,

            res = reader.read_buf(&mut buffer) => match res {
                Ok(0) => break Some("connection closed by peer".to_string()),
                Ok(n) => {
                    session.counters.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Session {} read failed: {}", session.id, e);
                    break Some(format!("read failed: {}", e));
                }
            }
        }
    };

    session.close_with_reason(reason.as_deref(), Shutdown::Abort);

    info!("Session {} ended. Stats: {:?}", session.id, session.stats());
    event_tx
        .send(SessionEvent::Closed {
            session_id: session.id,
            reason,
        })
        .await
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use crate::message::BytesMessage;
    use crate::pending::SendResult;
    use crate::transport::listen_tcp;
    use std::sync::Mutex;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::time::timeout;

    fn duplex_pair(
        config: SessionConfig,
    ) -> (
        Arc<StreamSession>,
        mpsc::Receiver<SessionEvent>,
        Arc<StreamSession>,
        mpsc::Receiver<SessionEvent>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (tx_a, rx_a) = mpsc::channel(16);
        let (tx_b, rx_b) = mpsc::channel(16);
        let left = StreamSession::start(IoStream::Duplex(a), config.clone(), tx_a).unwrap();
        let right = StreamSession::start(IoStream::Duplex(b), config, tx_b).unwrap();
        (left, rx_a, right, rx_b)
    }

    #[tokio::test]
    async fn test_message_delivered_in_order() {
        let (left, _rx_left, _right, mut rx_right) = duplex_pair(SessionConfig::default());

        let first = left.send(Outbound::Message(Box::new(BytesMessage::new(
            1,
            Bytes::from_static(b"one"),
        ))));
        let second = left.send(Outbound::Buffer(encode_frame(2, b"two").unwrap()));

        assert!(timeout(Duration::from_secs(1), first.wait()).await.unwrap().is_ok());
        assert!(timeout(Duration::from_secs(1), second.wait()).await.unwrap().is_ok());

        for (code, body) in [(1u16, &b"one"[..]), (2, &b"two"[..])] {
            match timeout(Duration::from_secs(1), rx_right.recv()).await.unwrap() {
                Some(SessionEvent::MessageReceived { frame, .. }) => {
                    assert_eq!(frame.type_code, code);
                    assert_eq!(&frame.body[..], body);
                }
                other => panic!("Expected message, got {:?}", other),
            }
        }

        assert_eq!(left.stats().frames_sent, 2);
    }

    #[tokio::test]
    async fn test_send_on_closed_session_resolves_immediately() {
        let (left, _rx_left, _right, _rx_right) = duplex_pair(SessionConfig::default());

        assert!(left.close());
        assert!(!left.close());

        let pending = left.send(Outbound::Buffer(encode_frame(1, b"late").unwrap()));
        assert!(pending.is_done());
        let err = pending.try_result().unwrap().unwrap_err();
        assert!(matches!(*err, TransportError::SessionClosed));
        assert!(err.is_io_fault());
    }

    #[tokio::test]
    async fn test_oversized_send_resolves_immediately() {
        let config = SessionConfig {
            max_frame_size: 32,
            ..SessionConfig::default()
        };
        let (left, _rx_left, _right, _rx_right) = duplex_pair(config);

        let pending = left.send(Outbound::Message(Box::new(BytesMessage::new(
            1,
            Bytes::from(vec![0u8; 64]),
        ))));
        assert!(pending.is_done());
        let err = pending.try_result().unwrap().unwrap_err();
        assert!(matches!(*err, TransportError::FrameTooLarge { .. }));
        assert!(!err.is_io_fault());
        assert!(!left.is_closed());
    }

    #[tokio::test]
    async fn test_peer_drop_closes_session() {
        let (a, b) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::channel(16);
        let session = StreamSession::start(IoStream::Duplex(a), SessionConfig::default(), tx).unwrap();
        drop(b);

        match timeout(Duration::from_secs(1), rx.recv()).await.unwrap() {
            Some(SessionEvent::Closed { reason, .. }) => assert!(reason.is_some()),
            other => panic!("Expected close, got {:?}", other),
        }
        assert!(session.is_closed());

        let pending = session.send(Outbound::Buffer(encode_frame(1, b"x").unwrap()));
        let err = timeout(Duration::from_secs(1), pending.wait()).await.unwrap().unwrap_err();
        assert!(err.is_io_fault());
    }

    #[tokio::test]
    async fn test_close_flushes_accepted_sends() {
        let (left, _rx_left, _right, mut rx_right) = duplex_pair(SessionConfig::default());

        let acks: Arc<Mutex<Vec<SendResult>>> = Arc::new(Mutex::new(Vec::new()));
        let sends: Vec<PendingSend> = (0..3u16)
            .map(|code| {
                left.send(Outbound::Message(Box::new(BytesMessage::new(
                    code,
                    Bytes::from_static(b"queued"),
                ))))
            })
            .collect();
        for pending in &sends {
            let sink = acks.clone();
            assert!(pending
                .on_complete(Box::new(move |res| sink.lock().unwrap().push(res)))
                .is_ok());
        }

        assert!(left.close());
        let late = left.send(Outbound::Buffer(encode_frame(9, b"late").unwrap()));
        assert!(matches!(*late.try_result().unwrap().unwrap_err(), TransportError::SessionClosed));

        for pending in &sends {
            assert!(timeout(Duration::from_secs(1), pending.wait()).await.unwrap().is_ok());
        }
        assert_eq!(acks.lock().unwrap().len(), 3);
        assert!(acks.lock().unwrap().iter().all(|res| res.is_ok()));

        for code in 0..3u16 {
            match timeout(Duration::from_secs(1), rx_right.recv()).await.unwrap() {
                Some(SessionEvent::MessageReceived { frame, .. }) => {
                    assert_eq!(frame.type_code, code);
                    assert_eq!(&frame.body[..], b"queued");
                }
                other => panic!("Expected message, got {:?}", other),
            }
        }

        // The writer shuts the stream down once flushed.
        match timeout(Duration::from_secs(1), rx_right.recv()).await.unwrap() {
            Some(SessionEvent::Closed { .. }) => {}
            other => panic!("Expected close, got {:?}", other),
        }
        assert!(left.last_error().is_none());
        assert_eq!(left.stats().frames_sent, 3);
    }

    #[tokio::test]
    async fn test_write_failure_fails_head_and_queue() {
        let (a, b) = tokio::io::duplex(16);
        let (tx, _rx) = mpsc::channel(16);
        let session = StreamSession::start(IoStream::Duplex(a), SessionConfig::default(), tx).unwrap();

        let sends: Vec<PendingSend> = (0..3u16)
            .map(|code| session.send(Outbound::Buffer(encode_frame(code, &[0u8; 64]).unwrap())))
            .collect();

        // Writer fills the pipe and blocks on the first frame.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sends[0].is_done());
        drop(b);

        let head = timeout(Duration::from_secs(1), sends[0].wait())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(*head, TransportError::Io(_)));
        assert!(head.is_io_fault());

        for pending in &sends[1..] {
            let err = timeout(Duration::from_secs(1), pending.wait())
                .await
                .unwrap()
                .unwrap_err();
            assert!(matches!(*err, TransportError::SessionClosed));
        }

        assert!(session.is_closed());
        assert!(session.last_error().is_some());
        assert!(session.meta(MetaKey::LastError).is_some());
        assert_eq!(session.stats().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_activity_stamps_advance() {
        let (left, _rx_left, right, mut rx_right) = duplex_pair(SessionConfig::default());
        let before = right.last_receive_time();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let pending = left.send(Outbound::Buffer(encode_frame(7, b"ping").unwrap()));
        timeout(Duration::from_secs(1), pending.wait()).await.unwrap().unwrap();
        timeout(Duration::from_secs(1), rx_right.recv()).await.unwrap();

        assert!(right.last_receive_time() > before);
        assert!(left.last_send_time() >= left.last_send_schedule_time());
        assert!(right.idle_time() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_tcp_session_roundtrip() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = listen_tcp(addr).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();

        let (accepted_tx, mut accepted_rx) = mpsc::channel(16);
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                let _session = StreamSession::start(
                    IoStream::Plain(socket),
                    SessionConfig::default(),
                    accepted_tx,
                );
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        });

        let (tx, _rx) = mpsc::channel(16);
        let session = StreamSession::connect(bound_addr, SessionConfig::default(), Duration::from_secs(1), tx)
            .await
            .unwrap();
        assert_eq!(session.remote_addr(), Some(bound_addr));

        let pending = session.send(Outbound::Buffer(encode_frame(42, b"hi").unwrap()));
        timeout(Duration::from_secs(1), pending.wait()).await.unwrap().unwrap();

        match timeout(Duration::from_secs(1), accepted_rx.recv()).await.unwrap() {
            Some(SessionEvent::MessageReceived { frame, .. }) => assert_eq!(frame.type_code, 42),
            other => panic!("Expected message, got {:?}", other),
        }
    }
}
