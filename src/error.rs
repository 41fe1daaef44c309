//! Error types for shotwire.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all shotwire operations.
#[derive(Debug, Error)]
pub enum ShotwireError {
    /// I/O error on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not open the TCP connection to the producer.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The header window did not contain two separators, or the peer
    /// closed before sending one. Treated as end-of-stream.
    #[error("Malformed header or connection closed ({received} bytes received)")]
    MalformedOrClosed { received: usize },

    /// Header fields are invalid or the declared sizes are inconsistent.
    #[error("Protocol error: {reason} (header: {header:?})")]
    Protocol { reason: String, header: String },

    /// The peer closed the connection before the declared payload arrived.
    #[error("Truncated frame: expected {expected} payload bytes, received {received}")]
    TruncatedFrame { expected: usize, received: usize },

    /// The producer declared a zero height or zero length frame.
    #[error("Empty frame (height {height}, payload length {payload_length})")]
    EmptyFrame { height: u32, payload_length: usize },

    /// No complete frame arrived within the configured read timeout.
    #[error("Timed out after {0:?} waiting for a frame")]
    ReadTimeout(Duration),

    /// The frame sink rejected a frame.
    #[error("Sink error: {0}")]
    Sink(String),

    /// The sink's queue is full; the frame was dropped.
    #[error("Backpressure: frame queue full ({capacity} frames)")]
    Backpressure { capacity: usize },

    /// Invalid session configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session task panicked or was aborted.
    #[error("Session task failed: {0}")]
    Task(String),
}

impl ShotwireError {
    /// Build a protocol error that records the raw header bytes.
    pub fn protocol(reason: impl Into<String>, raw_header: &[u8]) -> Self {
        ShotwireError::Protocol {
            reason: reason.into(),
            header: String::from_utf8_lossy(raw_header).into_owned(),
        }
    }

    /// Whether this error ends the current connection.
    ///
    /// [`ShotwireError::EmptyFrame`] leaves the connection usable: the reader
    /// drains any declared payload, so the next request stays aligned.
    /// [`ShotwireError::Backpressure`] only drops the frame it was raised for.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            ShotwireError::EmptyFrame { .. } | ShotwireError::Backpressure { .. }
        )
    }
}

/// Result type alias using ShotwireError.
pub type Result<T> = std::result::Result<T, ShotwireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_frame_is_not_fatal() {
        let err = ShotwireError::EmptyFrame {
            height: 5,
            payload_length: 0,
        };
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn test_backpressure_is_not_fatal() {
        assert!(!ShotwireError::Backpressure { capacity: 4 }.is_connection_fatal());
        assert!(ShotwireError::Sink("disk full".into()).is_connection_fatal());
    }

    #[test]
    fn test_frame_errors_are_fatal() {
        assert!(ShotwireError::MalformedOrClosed { received: 0 }.is_connection_fatal());
        assert!(ShotwireError::TruncatedFrame {
            expected: 10,
            received: 4
        }
        .is_connection_fatal());
        assert!(ShotwireError::protocol("bad height", b"x|1|").is_connection_fatal());
    }

    #[test]
    fn test_protocol_error_keeps_raw_header() {
        let err = ShotwireError::protocol("invalid height field", b"1a|300|\xff");
        match &err {
            ShotwireError::Protocol { header, .. } => assert!(header.starts_with("1a|300|")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("invalid height field"));
    }
}
