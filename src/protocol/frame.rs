//! Frame struct with typed accessors.
//!
//! A [`Frame`] is one fully reassembled screenshot: a row count plus an RGB
//! payload whose length is an exact multiple of `height * 3`. Uses
//! `bytes::Bytes` so the payload can be handed to sinks without copying.
//!
//! # Example
//!
//! ```
//! use shotwire::protocol::Frame;
//! use bytes::Bytes;
//!
//! let frame = Frame::try_new(2, Bytes::from(vec![0u8; 2 * 4 * 3])).unwrap();
//!
//! assert_eq!(frame.height(), 2);
//! assert_eq!(frame.width(), 4);
//! ```

use bytes::Bytes;

use super::wire_format::{Header, BYTES_PER_PIXEL};
use crate::error::{Result, ShotwireError};

/// A complete screenshot frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    height: u32,
    width: u32,
    payload: Bytes,
}

impl Frame {
    /// Create a frame, checking the same invariants the reader enforces.
    ///
    /// # Errors
    ///
    /// - [`ShotwireError::EmptyFrame`] if `height` or the payload is zero.
    /// - [`ShotwireError::Protocol`] if the payload length is not a multiple
    ///   of `height * 3`.
    pub fn try_new(height: u32, payload: Bytes) -> Result<Self> {
        let header = Header::new(height, payload.len());
        if header.is_empty() {
            return Err(ShotwireError::EmptyFrame {
                height,
                payload_length: payload.len(),
            });
        }
        let width = header.width().ok_or_else(|| {
            ShotwireError::protocol(
                format!(
                    "payload length {} is not a multiple of height {} * {}",
                    payload.len(),
                    height,
                    BYTES_PER_PIXEL
                ),
                &header.encode(),
            )
        })?;
        Ok(Self {
            height,
            width,
            payload,
        })
    }

    /// Pixel rows.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel columns, derived from the payload length.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Consume the frame and return its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The header this frame would be sent with.
    pub fn header(&self) -> Header {
        Header::new(self.height, self.payload.len())
    }
}

/// Build a complete wire frame (header + payload) as a single byte vector.
///
/// This is what a producer writes in answer to a request token.
///
/// # Example
///
/// ```
/// use shotwire::protocol::encode_frame;
///
/// let bytes = encode_frame(1, &[7u8; 6]);
/// assert!(bytes.starts_with(b"1|6|"));
/// assert_eq!(bytes.len(), 4 + 6);
/// ```
pub fn encode_frame(height: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(24 + payload.len());
    Header::new(height, payload.len()).encode_into(&mut buf);
    buf.extend_from_slice(payload);
    buf
}
