//! Transport error types.

use std::error::Error as StdError;
use thiserror::Error;

/// Errors produced while issuing or resolving a send on a transport session
#[derive(Error, Debug)]
pub enum TransportError {
    /// Low-level I/O failure on the underlying stream
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Session was closed before the send could be written
    #[error("session closed")]
    SessionClosed,

    /// Encoded frame exceeds the session's frame size limit
    #[error("frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge {
        /// Encoded size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Message could not be encoded
    #[error("encode failed: {0}")]
    Encode(String),

    /// Malformed inbound frame
    #[error("malformed frame")]
    Malformed,

    /// Pending send was dropped before it resolved
    #[error("send canceled")]
    Canceled,
}

impl TransportError {
    /// Whether the root cause is a low-level connectivity fault.
    ///
    /// Such failures are safe to handle by discarding the connection and
    /// reconnecting. A closed session counts: the bytes never left.
    pub fn is_io_fault(&self) -> bool {
        match self {
            TransportError::Io(_) | TransportError::SessionClosed => true,
            other => has_io_source(other),
        }
    }
}

/// Walk the `source()` chain looking for an `std::io::Error`
pub fn has_io_source(err: &(dyn StdError + 'static)) -> bool {
    let mut cur = err.source();
    while let Some(e) = cur {
        if e.is::<std::io::Error>() {
            return true;
        }
        cur = e.source();
    }
    false
}
