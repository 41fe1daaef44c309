//! Wire format encoding and decoding.
//!
//! Every frame is requested by the consumer and answered by the producer:
//! ```text
//! consumer ──► "more"
//! producer ──► <height>|<payload_length>|<payload bytes ...>
//! ```
//!
//! `height` and `payload_length` are unsigned decimal ASCII integers. The
//! payload is exactly `payload_length` bytes of 24-bit RGB pixel data; there
//! is no end-of-frame marker and no checksum.

use crate::error::{Result, ShotwireError};

/// Token sent to ask the producer for the next frame.
pub const REQUEST_TOKEN: &[u8] = b"more";

/// Field separator inside the header.
pub const SEPARATOR: u8 = b'|';

/// Size of the header window read before the payload (header plus the
/// first payload bytes).
pub const INITIAL_CHUNK_SIZE: usize = 50;

/// Maximum bytes requested per payload read.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Bytes per pixel (RGB, no alpha).
pub const BYTES_PER_PIXEL: usize = 3;

/// Default maximum accepted payload (256 MiB, well above a 8K RGB frame).
pub const DEFAULT_MAX_PAYLOAD_LENGTH: usize = 256 * 1024 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Pixel rows.
    pub height: u32,
    /// Declared payload length in bytes.
    pub payload_length: usize,
}

impl Header {
    /// Create a new header.
    pub fn new(height: u32, payload_length: usize) -> Self {
        Self {
            height,
            payload_length,
        }
    }

    /// Encode the header as it appears on the wire, trailing separator
    /// included.
    ///
    /// # Example
    ///
    /// ```
    /// use shotwire::protocol::Header;
    ///
    /// assert_eq!(Header::new(10, 300).encode(), b"10|300|");
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24);
        self.encode_into(&mut buf);
        buf
    }

    /// Append the encoded header to an existing buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.height.to_string().as_bytes());
        buf.push(SEPARATOR);
        buf.extend_from_slice(self.payload_length.to_string().as_bytes());
        buf.push(SEPARATOR);
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns the header and the number of bytes it occupies; everything
    /// after that offset is payload.
    ///
    /// # Errors
    ///
    /// - [`ShotwireError::MalformedOrClosed`] if `buf` holds fewer than two
    ///   separators.
    /// - [`ShotwireError::Protocol`] if either field is not an unsigned
    ///   decimal integer.
    ///
    /// # Example
    ///
    /// ```
    /// use shotwire::protocol::Header;
    ///
    /// let (header, consumed) = Header::decode(b"10|300|abc").unwrap();
    /// assert_eq!(header, Header::new(10, 300));
    /// assert_eq!(consumed, 7);
    /// ```
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut parts = buf.splitn(3, |&b| b == SEPARATOR);
        let (Some(height_field), Some(length_field), Some(_payload)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ShotwireError::MalformedOrClosed {
                received: buf.len(),
            });
        };

        let consumed = height_field.len() + length_field.len() + 2;
        let raw_header = &buf[..consumed];

        let height = parse_decimal::<u32>(height_field)
            .ok_or_else(|| ShotwireError::protocol("invalid height field", raw_header))?;
        let payload_length = parse_decimal::<usize>(length_field)
            .ok_or_else(|| ShotwireError::protocol("invalid payload length field", raw_header))?;

        Ok((Self::new(height, payload_length), consumed))
    }

    /// Check the declared payload length against a maximum.
    pub fn validate(&self, max_payload_length: usize) -> Result<()> {
        if self.payload_length > max_payload_length {
            return Err(ShotwireError::protocol(
                format!(
                    "payload length {} exceeds maximum {}",
                    self.payload_length, max_payload_length
                ),
                &self.encode(),
            ));
        }
        Ok(())
    }

    /// Whether the producer signalled "nothing to show".
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.payload_length == 0
    }

    /// Pixel columns implied by the header, if the length divides evenly.
    pub fn width(&self) -> Option<u32> {
        let row_bytes = (self.height as usize).checked_mul(BYTES_PER_PIXEL)?;
        if row_bytes == 0 || self.payload_length % row_bytes != 0 {
            return None;
        }
        u32::try_from(self.payload_length / row_bytes).ok()
    }
}

/// Encode a header (standalone function).
#[inline]
pub fn encode_header(header: &Header) -> Vec<u8> {
    header.encode()
}

/// Decode a header (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Result<(Header, usize)> {
    Header::decode(buf)
}

/// Whether `buf` already contains both header separators.
#[inline]
pub fn header_complete(buf: &[u8]) -> bool {
    buf.iter().filter(|&&b| b == SEPARATOR).take(2).count() == 2
}

/// Parse an unsigned decimal field: ASCII digits only, no sign, no
/// whitespace, no overflow.
fn parse_decimal<T: std::str::FromStr>(field: &[u8]) -> Option<T> {
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_header_with_payload_start() {
        let (header, consumed) = Header::decode(b"10|300|\x01\x02\x03").unwrap();
        assert_eq!(header.height, 10);
        assert_eq!(header.payload_length, 300);
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_decode_header_without_payload() {
        let (header, consumed) = Header::decode(b"5|0|").unwrap();
        assert_eq!(header, Header::new(5, 0));
        assert_eq!(consumed, 4);
        assert!(header.is_empty());
    }

    #[test]
    fn test_payload_may_contain_separators() {
        let (header, consumed) = Header::decode(b"1|3||||").unwrap();
        assert_eq!(header, Header::new(1, 3));
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_missing_separator_is_malformed() {
        let cases: [&[u8]; 4] = [b"", b"10", b"10|300", b"abc"];
        for buf in cases {
            let err = Header::decode(buf).unwrap_err();
            assert!(
                matches!(err, ShotwireError::MalformedOrClosed { received } if received == buf.len()),
                "unexpected error for {buf:?}: {err:?}"
            );
        }
    }

    #[test]
    fn test_non_numeric_height_is_protocol_error() {
        let err = Header::decode(b"ten|300|").unwrap_err();
        match err {
            ShotwireError::Protocol { reason, header } => {
                assert!(reason.contains("height"));
                assert_eq!(header, "ten|300|");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_length_is_protocol_error() {
        let err = Header::decode(b"10|3x0|").unwrap_err();
        assert!(err.to_string().contains("payload length"));
    }

    #[test]
    fn test_signed_and_padded_fields_rejected() {
        let cases: [&[u8]; 5] = [b"+10|300|", b"-1|300|", b"10| 300|", b"|300|", b"10||"];
        for buf in cases {
            let err = Header::decode(buf).unwrap_err();
            assert!(
                matches!(err, ShotwireError::Protocol { .. }),
                "unexpected error for {buf:?}: {err:?}"
            );
        }
    }

    #[test]
    fn test_height_overflow_rejected() {
        let err = Header::decode(b"99999999999|300|").unwrap_err();
        assert!(matches!(err, ShotwireError::Protocol { .. }));
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        assert_eq!(Header::new(1080, 6_220_800).encode(), b"1080|6220800|");
        assert_eq!(encode_header(&Header::new(0, 0)), b"0|0|");
    }

    #[test]
    fn test_validate_rejects_oversized_payload() {
        let header = Header::new(10, 1_000);
        assert!(header.validate(1_000).is_ok());
        let err = header.validate(999).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_width() {
        assert_eq!(Header::new(10, 300).width(), Some(10));
        assert_eq!(Header::new(10, 301).width(), None);
        assert_eq!(Header::new(0, 300).width(), None);
    }

    #[test]
    fn test_header_complete() {
        assert!(!header_complete(b""));
        assert!(!header_complete(b"10|30"));
        assert!(header_complete(b"10|300|"));
        assert!(header_complete(b"10|300|\xff\xff"));
    }

    #[test]
    fn test_standalone_decode() {
        let encoded = encode_header(&Header::new(7, 21));
        let (decoded, consumed) = decode_header(&encoded).unwrap();
        assert_eq!(decoded, Header::new(7, 21));
        assert_eq!(consumed, encoded.len());
    }
}
