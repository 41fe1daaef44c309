//! Session lifecycle state and end-of-run report.

use std::fmt;

use serde::Serialize;

use crate::error::ShotwireError;

/// Connection lifecycle of a session.
///
/// ```text
/// Disconnected ─connect─► Connecting ─ok─► Streaming ─error─► Disconnected
///                              │                 │
///                              └──────stop───────┴──► Stopping ─► Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Stopping,
}

impl ConnectionState {
    /// Lowercase name, as used in logs and serialized output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters accumulated over a session run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Frames handed to the sink.
    pub frames_delivered: u64,
    /// Empty frames skipped.
    pub empty_frames: u64,
    /// Frames dropped because the sink's queue was full.
    pub frames_dropped: u64,
    /// Payload bytes received, empty frames included.
    pub bytes_received: u64,
    /// TCP connections opened (initial connect plus reconnects).
    pub connections: u32,
}

/// Why a session run ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The stop signal was observed.
    Stopped,
    /// A connection or sink failure ended the run.
    Failed(ShotwireError),
}

impl SessionEnd {
    /// Whether the run ended because a stop was requested.
    pub fn is_stopped(&self) -> bool {
        matches!(self, SessionEnd::Stopped)
    }

    /// The failure that ended the run, if any.
    pub fn error(&self) -> Option<&ShotwireError> {
        match self {
            SessionEnd::Stopped => None,
            SessionEnd::Failed(e) => Some(e),
        }
    }
}

/// Outcome of a session run.
#[derive(Debug)]
pub struct SessionReport {
    pub stats: SessionStats,
    pub end: SessionEnd,
}

impl SessionReport {
    /// Convert into a `Result`, surfacing the failure if the run did not stop
    /// on request.
    pub fn into_result(self) -> crate::Result<SessionStats> {
        match self.end {
            SessionEnd::Stopped => Ok(self.stats),
            SessionEnd::Failed(e) => Err(e),
        }
    }
}
