//! Frame reader for the request/response screenshot stream.
//!
//! Uses `bytes::BytesMut` as the per-frame accumulator. Each call to
//! [`FrameReader::next_frame`] walks through three phases:
//! - send the request token
//! - read the header window (up to 50 bytes) until both separators arrive
//! - accumulate payload bytes until the declared length is reached
//!
//! No partial frame ever leaves the reader: the caller gets a complete
//! [`Frame`] or an error.
//!
//! # Example
//!
//! ```ignore
//! use shotwire::protocol::FrameReader;
//! use tokio::net::TcpStream;
//!
//! let stream = TcpStream::connect("127.0.0.1:4444").await?;
//! let mut reader = FrameReader::new(stream);
//!
//! let frame = reader.next_frame().await?;
//! println!("{}x{}", frame.width(), frame.height());
//! ```

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire_format::{
    header_complete, Header, DEFAULT_MAX_PAYLOAD_LENGTH, INITIAL_CHUNK_SIZE, READ_BUFFER_SIZE,
    REQUEST_TOKEN,
};
use super::Frame;
use crate::error::{Result, ShotwireError};

/// Reads frames from a producer connection.
///
/// The reader owns the connection. It is not cancel safe: if a
/// `next_frame` future is dropped mid-read, the connection is out of step
/// with the producer and must be closed.
pub struct FrameReader<S> {
    stream: S,
    /// Bytes received for the frame in flight.
    buffer: BytesMut,
    /// Scratch space for a single socket read.
    read_buf: Box<[u8; READ_BUFFER_SIZE]>,
    max_payload_length: usize,
    frames_read: u64,
    bytes_read: u64,
}

impl<S> FrameReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a reader with the default payload limit.
    pub fn new(stream: S) -> Self {
        Self::with_max_payload(stream, DEFAULT_MAX_PAYLOAD_LENGTH)
    }

    /// Create a reader with a custom payload limit.
    pub fn with_max_payload(stream: S, max_payload_length: usize) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            read_buf: Box::new([0u8; READ_BUFFER_SIZE]),
            max_payload_length,
            frames_read: 0,
            bytes_read: 0,
        }
    }

    /// Request and read the next frame.
    ///
    /// # Errors
    ///
    /// - [`ShotwireError::MalformedOrClosed`] if no complete header arrived
    ///   (the peer closed or sent garbage).
    /// - [`ShotwireError::Protocol`] on invalid header fields, trailing
    ///   bytes, an oversized or unevenly sized payload.
    /// - [`ShotwireError::TruncatedFrame`] if the peer closed mid-payload.
    /// - [`ShotwireError::EmptyFrame`] if height or length is zero; the
    ///   declared payload has been consumed and the connection stays usable.
    /// - [`ShotwireError::Io`] on socket errors.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        self.buffer.clear();

        self.request().await?;
        let header = self.read_header().await?;

        if let Err(e) = header.validate(self.max_payload_length) {
            tracing::warn!("Rejecting frame header: {}", e);
            return Err(e);
        }

        if header.is_empty() {
            let drained = self.discard_payload(header.payload_length).await?;
            self.bytes_read += drained as u64;
            return Err(ShotwireError::EmptyFrame {
                height: header.height,
                payload_length: header.payload_length,
            });
        }

        let payload = self.read_payload(header.payload_length).await?;
        self.bytes_read += payload.len() as u64;

        let frame = Frame::try_new(header.height, payload).map_err(|e| {
            tracing::warn!("Rejecting frame: {}", e);
            e
        })?;

        self.frames_read += 1;
        tracing::debug!(
            "Frame {} received: {}x{} ({} bytes)",
            self.frames_read,
            frame.width(),
            frame.height(),
            frame.payload_len()
        );
        Ok(frame)
    }

    /// Send the request token for the next frame.
    async fn request(&mut self) -> Result<()> {
        self.stream.write_all(REQUEST_TOKEN).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the header window and leave any payload bytes that rode along
    /// in `self.buffer`.
    async fn read_header(&mut self) -> Result<Header> {
        while !header_complete(&self.buffer) && self.buffer.len() < INITIAL_CHUNK_SIZE {
            let want = INITIAL_CHUNK_SIZE - self.buffer.len();
            let n = self.stream.read(&mut self.read_buf[..want]).await?;
            if n == 0 {
                break;
            }
            self.buffer.extend_from_slice(&self.read_buf[..n]);
        }

        let (header, consumed) = Header::decode(&self.buffer).map_err(|e| {
            if let ShotwireError::Protocol { .. } = e {
                tracing::warn!("Invalid frame header: {}", e);
            }
            e
        })?;

        let raw_header = self.buffer.split_to(consumed);
        if self.buffer.len() > header.payload_length {
            let err = ShotwireError::protocol(
                format!(
                    "{} bytes received after the header for a {} byte payload",
                    self.buffer.len(),
                    header.payload_length
                ),
                &raw_header,
            );
            tracing::warn!("Invalid frame header: {}", err);
            return Err(err);
        }

        Ok(header)
    }

    /// Accumulate payload bytes until `payload_length` is reached.
    ///
    /// Reads never ask for more than the remaining byte count, so nothing
    /// past the end of this frame is consumed. The buffer grows with the
    /// bytes actually received, not with the declared length.
    async fn read_payload(&mut self, payload_length: usize) -> Result<bytes::Bytes> {
        while self.buffer.len() < payload_length {
            let want = (payload_length - self.buffer.len()).min(READ_BUFFER_SIZE);
            let n = self.stream.read(&mut self.read_buf[..want]).await?;
            if n == 0 {
                return Err(ShotwireError::TruncatedFrame {
                    expected: payload_length,
                    received: self.buffer.len(),
                });
            }
            self.buffer.extend_from_slice(&self.read_buf[..n]);
        }

        Ok(self.buffer.split().freeze())
    }

    /// Consume the payload of an empty frame without keeping it.
    async fn discard_payload(&mut self, payload_length: usize) -> Result<usize> {
        let mut drained = self.buffer.len();
        self.buffer.clear();

        while drained < payload_length {
            let want = (payload_length - drained).min(READ_BUFFER_SIZE);
            let n = self.stream.read(&mut self.read_buf[..want]).await?;
            if n == 0 {
                return Err(ShotwireError::TruncatedFrame {
                    expected: payload_length,
                    received: drained,
                });
            }
            drained += n;
        }

        Ok(drained)
    }

    /// Number of frames successfully read.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Total payload bytes read, empty frames included.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consume the reader and return the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Shut down the write half of the connection.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
