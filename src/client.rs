//! Session builder and runtime handle.
//!
//! The [`SessionBuilder`] provides a fluent API over [`SessionConfig`]. The
//! [`SessionHandle`] returned by `start()` manages the lifecycle:
//! 1. Connect to the producer (errors surface from `start()`)
//! 2. Spawn the session loop
//! 3. Stop it, watch its state, or wait for its report
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use shotwire::{ReconnectPolicy, SessionBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (session, mut frames) = SessionBuilder::new()
//!         .host("192.168.1.20")
//!         .port(4444)
//!         .idle_delay(Duration::from_millis(250))
//!         .reconnect(ReconnectPolicy::reconnect())
//!         .start_with_channel()
//!         .await?;
//!
//!     while let Some(frame) = frames.recv().await {
//!         println!("{}x{}", frame.width(), frame.height());
//!     }
//!
//!     let report = session.shutdown().await?;
//!     println!("{} frames", report.stats.frames_delivered);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{ReconnectPolicy, SessionConfig};
use crate::error::{Result, ShotwireError};
use crate::protocol::Frame;
use crate::session::{ConnectionState, SessionEnd, SessionLoop, SessionReport, StopSignal};
use crate::sink::{channel_sink, FrameSink, DEFAULT_CHANNEL_CAPACITY};

/// Builder for configuring and starting a session.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    config: SessionConfig,
    channel_capacity: usize,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Create a builder with default settings (`127.0.0.1:4444`).
    pub fn new() -> Self {
        Self::from_config(SessionConfig::default())
    }

    /// Start from an existing configuration.
    pub fn from_config(config: SessionConfig) -> Self {
        Self {
            config,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Producer host name or address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Producer port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Pause after each frame before requesting the next.
    ///
    /// Default: 1 second
    pub fn idle_delay(mut self, delay: Duration) -> Self {
        self.config.idle_delay = delay;
        self
    }

    /// Bound each connect attempt.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Bound each frame read. A timeout counts as a connection failure.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    /// Largest payload accepted from the producer.
    pub fn max_payload_length(mut self, limit: usize) -> Self {
        self.config.max_payload_length = limit;
        self
    }

    /// What to do when an established connection fails.
    ///
    /// Default: [`ReconnectPolicy::FailFast`]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Set the frame queue depth used by [`start_with_channel`](Self::start_with_channel).
    ///
    /// When the receiver falls this far behind, further frames are dropped
    /// and counted in [`SessionStats::frames_dropped`](crate::SessionStats).
    /// Default: 8
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Configuration the session will be started with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Validate the configuration and build an unstarted session.
    pub fn build<K: FrameSink>(self, sink: K) -> Result<SessionLoop<K>> {
        self.config.validate()?;
        Ok(SessionLoop::new(self.config, sink))
    }

    /// Connect and spawn the session on the current runtime.
    ///
    /// Returns once the connection is established.
    pub async fn start<K: FrameSink + 'static>(self, sink: K) -> Result<SessionHandle> {
        let mut session = self.build(sink)?;
        let stop = session.stop_signal();
        let state = session.subscribe_state();

        let stream = session.connect().await?;

        let task = tokio::spawn(async move {
            let report = session.run(stream).await;
            match &report.end {
                SessionEnd::Stopped => tracing::info!("Session stopped"),
                SessionEnd::Failed(e) => tracing::error!("Session failed: {}", e),
            }
            report
        });

        Ok(SessionHandle { stop, state, task })
    }

    /// Start with a bounded [`ChannelSink`](crate::sink::ChannelSink) and
    /// return the receiving end alongside the handle.
    pub async fn start_with_channel(self) -> Result<(SessionHandle, mpsc::Receiver<Frame>)> {
        let (sink, frames) = channel_sink(self.channel_capacity);
        let handle = self.start(sink).await?;
        Ok((handle, frames))
    }
}

/// A running session.
///
/// Dropping the handle does not stop the session; call [`stop`](Self::stop)
/// or [`shutdown`](Self::shutdown).
#[derive(Debug)]
pub struct SessionHandle {
    stop: StopSignal,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Request a stop. Idempotent; returns immediately.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Clone of the stop signal, for use from other tasks.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Whether the session task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end on its own or after a stop.
    pub async fn wait_for_shutdown(self) -> Result<SessionReport> {
        self.task
            .await
            .map_err(|e| ShotwireError::Task(e.to_string()))
    }

    /// Stop and wait for the report.
    pub async fn shutdown(self) -> Result<SessionReport> {
        self.stop();
        self.wait_for_shutdown().await
    }
}
