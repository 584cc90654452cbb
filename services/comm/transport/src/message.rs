//! Outbound payloads accepted by a transport session.

use crate::error::TransportError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Structured message that knows how to encode its own body
pub trait Message: fmt::Debug + Send + Sync {
    /// Message type code written into the frame header
    fn type_code(&self) -> u16;

    /// Append the encoded body to `dst`
    fn encode(&self, dst: &mut BytesMut) -> Result<(), TransportError>;

    /// Expected body size, used to presize buffers
    fn encoded_len_hint(&self) -> usize {
        0
    }
}

/// Message carrying an opaque, already serialized body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesMessage {
    type_code: u16,
    body: Bytes,
}

impl BytesMessage {
    /// Create a message
    pub fn new(type_code: u16, body: Bytes) -> Self {
        Self { type_code, body }
    }

    /// Message body
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl Message for BytesMessage {
    fn type_code(&self) -> u16 {
        self.type_code
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), TransportError> {
        dst.put_slice(&self.body);
        Ok(())
    }

    fn encoded_len_hint(&self) -> usize {
        self.body.len()
    }
}

/// Payload handed to `TransportSession::send`
#[derive(Debug)]
pub enum Outbound {
    /// Pre-built, already framed buffer written verbatim
    Buffer(Bytes),
    /// Structured message framed by the session
    Message(Box<dyn Message>),
}

impl From<Bytes> for Outbound {
    fn from(buf: Bytes) -> Self {
        Outbound::Buffer(buf)
    }
}

impl From<Box<dyn Message>> for Outbound {
    fn from(msg: Box<dyn Message>) -> Self {
        Outbound::Message(msg)
    }
}
