//! Transport sessions, pending sends, activity timestamps and framing for comm clients.
//!
//! This crate provides the session layer a communication client runs on: an
//! established connection that accepts send requests and hands back a
//! one-shot [`PendingSend`], tracks activity timestamps, and carries a small
//! metadata store.
//!
//! ## Features
//!
//! - **Pending sends**: resolved inline or on the session's I/O task, with
//!   per-operation acknowledgment callbacks
//! - **Activity tracking**: monotonic receive / send-scheduled / sent stamps
//!   and idle-time computation
//! - **Stream sessions**: FIFO writer and framed reader over TCP or an
//!   in-process duplex stream
//!
//! ## Example
//!
//! ```rust,no_run
//! use comm_transport::{BytesMessage, Outbound, SessionConfig, SessionEvent, StreamSession, TransportSession};
//! use bytes::Bytes;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), comm_transport::TransportError> {
//! let (tx, mut rx) = mpsc::channel(100);
//! let addr = "127.0.0.1:9000".parse().unwrap();
//! let session = StreamSession::connect(addr, SessionConfig::default(), Duration::from_secs(5), tx).await?;
//!
//! let pending = session.send(Outbound::Message(Box::new(BytesMessage::new(1, Bytes::from_static(b"hi")))));
//! pending.wait().await.map_err(|_| comm_transport::TransportError::Canceled)?;
//!
//! while let Some(event) = rx.recv().await {
//!     if let SessionEvent::MessageReceived { frame, .. } = event {
//!         println!("Received frame type {}", frame.type_code);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod activity;
pub mod error;
pub mod frame;
pub mod message;
pub mod meta;
pub mod pending;
pub mod session;
pub mod stream_session;
pub mod transport;

// Re-export main types
pub use activity::{clock, idle_time_at, ActivityTimestamps, ActivityTracker};
pub use error::TransportError;
pub use frame::{
    encode_frame, encode_message, Frame, FrameDecoder, DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE_LIMIT,
};
pub use message::{BytesMessage, Message, Outbound};
pub use meta::{MetaKey, MetaValue, SessionMeta};
pub use pending::{AckCallback, PendingSend, SendCompleter, SendResult};
pub use session::{SessionConfig, SessionEvent, TransportSession};
pub use stream_session::{SessionStats, StreamSession};
pub use transport::{connect_tcp, listen_tcp, IoStream};
