//! Length-prefixed message framing.
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 frame_len        | length of bytes that follow|
//! +----------------------+----------------------------+
//! | u16 type_code        | message type               |
//! +----------------------+----------------------------+
//! | body                 | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```

use crate::error::TransportError;
use crate::message::Message;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Default frame size limit (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Largest frame the `u32` length prefix can describe
pub const MAX_FRAME_SIZE_LIMIT: usize = u32::MAX as usize;

/// Size of the frame length prefix plus type code
pub const FRAME_HEADER_SIZE: usize = 4 + 2;

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type code
    pub type_code: u16,
    /// Frame body
    pub body: Bytes,
}

/// Encode a message into a complete frame, enforcing `max_frame_size`
pub fn encode_message(msg: &dyn Message, max_frame_size: usize) -> Result<Bytes, TransportError> {
    let max_frame_size = max_frame_size.min(MAX_FRAME_SIZE_LIMIT);
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + msg.encoded_len_hint());
    buf.put_u32(0); // patched below
    buf.put_u16(msg.type_code());
    msg.encode(&mut buf)?;

    if buf.len() > max_frame_size {
        return Err(TransportError::FrameTooLarge {
            size: buf.len(),
            limit: max_frame_size,
        });
    }

    let frame_len = prefix_len(buf.len())?;
    buf[..4].copy_from_slice(&frame_len.to_be_bytes());
    Ok(buf.freeze())
}

/// Frame a raw body under a type code
pub fn encode_frame(type_code: u16, body: &[u8]) -> Result<Bytes, TransportError> {
    let frame_len = prefix_len(4 + 2 + body.len())?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.put_u32(frame_len);
    buf.put_u16(type_code);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Length prefix for a frame of `total` bytes, prefix included
fn prefix_len(total: usize) -> Result<u32, TransportError> {
    u32::try_from(total.saturating_sub(4)).map_err(|_| TransportError::FrameTooLarge {
        size: total,
        limit: MAX_FRAME_SIZE_LIMIT,
    })
}

/// Frame decoder for parsing incoming frames
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default size limit
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE_LIMIT),
        }
    }

    /// Decode one frame from a buffer
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if frame_len.saturating_add(4) > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame_len.saturating_add(4),
                limit: self.max_frame_size,
            });
        }
        if frame_len < 2 {
            return Err(TransportError::Malformed);
        }

        if buf.len() < 4 + frame_len {
            return Ok(None);
        }

        buf.advance(4);
        let mut frame_buf = buf.split_to(frame_len).freeze();
        let type_code = frame_buf.get_u16();

        Ok(Some(Frame {
            type_code,
            body: frame_buf,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
