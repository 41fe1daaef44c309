//! The consumer session loop.
//!
//! A [`SessionLoop`] owns one producer connection at a time and runs the
//! request/response cycle on it:
//!
//! 1. check the stop signal
//! 2. send `more` and read one frame (cancellable by stop)
//! 3. hand the frame to the sink, or skip it if it was empty
//! 4. wait the idle delay (cancellable by stop)
//!
//! When the connection fails the [`ReconnectPolicy`] decides whether the run
//! ends or a new connection is opened after a backoff delay. Sink errors
//! always end the run.

mod state;
mod stop;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;

pub use state::{ConnectionState, SessionEnd, SessionReport, SessionStats};
pub use stop::StopSignal;

use crate::backoff::Backoff;
use crate::config::{ReconnectPolicy, SessionConfig};
use crate::error::{Result, ShotwireError};
use crate::protocol::{Frame, FrameReader};
use crate::sink::FrameSink;
use crate::transport::{self, format_addr};

/// Drives a producer connection and feeds a sink.
pub struct SessionLoop<K> {
    config: SessionConfig,
    sink: K,
    stop: StopSignal,
    state: watch::Sender<ConnectionState>,
    stats: SessionStats,
}

impl<K: FrameSink> SessionLoop<K> {
    /// Create an idle session in the `Disconnected` state with its own stop
    /// signal.
    pub fn new(config: SessionConfig, sink: K) -> Self {
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            sink,
            stop: StopSignal::new(),
            state,
            stats: SessionStats::default(),
        }
    }

    /// Share an existing stop signal instead of the session's own.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Settings this session runs with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle for stopping this session from another task.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Publish `state`. Watchers are only woken when it actually changes.
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!("Session state {} -> {}", current, state);
            *current = state;
            true
        });
    }

    /// Open the producer connection.
    ///
    /// On failure the state returns to `Disconnected` and the error is
    /// returned; nothing is retried here.
    pub async fn connect(&mut self) -> Result<TcpStream> {
        self.set_state(ConnectionState::Connecting);

        let result = transport::connect(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout,
        )
        .await;

        match result {
            Ok(stream) => {
                self.stats.connections += 1;
                Ok(stream)
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Validate the config, connect, and run until stopped or failed.
    ///
    /// Connection errors from the initial connect are returned as `Err`;
    /// everything after that is reported in the [`SessionReport`].
    pub async fn start(mut self) -> Result<SessionReport> {
        self.config.validate()?;
        let stream = self.connect().await?;
        Ok(self.run(stream).await)
    }

    /// Run on an already established connection.
    pub async fn run(mut self, stream: TcpStream) -> SessionReport {
        let (mut backoff, max_attempts) = match &self.config.reconnect {
            ReconnectPolicy::FailFast => (None, None),
            ReconnectPolicy::Reconnect {
                initial_backoff,
                max_backoff,
                max_attempts,
            } => (Some(Backoff::new(*initial_backoff, *max_backoff)), *max_attempts),
        };

        let mut stream = stream;
        let end = loop {
            let err = match self.drive(stream).await {
                Ok(()) => break SessionEnd::Stopped,
                Err(e) => e,
            };

            if self.stop.is_stopped() {
                break SessionEnd::Stopped;
            }
            if matches!(err, ShotwireError::Sink(_)) {
                tracing::error!("Sink failed, ending session: {}", err);
                break SessionEnd::Failed(err);
            }
            let Some(backoff) = backoff.as_mut() else {
                tracing::warn!("Connection lost: {}", err);
                break SessionEnd::Failed(err);
            };

            tracing::warn!("Connection lost, reconnecting: {}", err);
            match self.reconnect(backoff, max_attempts).await {
                Ok(Some(next)) => stream = next,
                Ok(None) => {
                    self.set_state(ConnectionState::Stopping);
                    break SessionEnd::Stopped;
                }
                Err(e) => break SessionEnd::Failed(e),
            }
        };

        self.set_state(ConnectionState::Disconnected);
        tracing::info!(
            "Session finished: {} frames, {} empty, {} dropped, {} bytes over {} connection(s)",
            self.stats.frames_delivered,
            self.stats.empty_frames,
            self.stats.frames_dropped,
            self.stats.bytes_received,
            self.stats.connections
        );

        SessionReport {
            stats: self.stats,
            end,
        }
    }

    /// Wait out the backoff and reconnect. `Ok(None)` means a stop arrived
    /// first.
    async fn reconnect(
        &mut self,
        backoff: &mut Backoff,
        max_attempts: Option<u32>,
    ) -> Result<Option<TcpStream>> {
        let stop = self.stop.clone();
        let addr = format_addr(&self.config.host, self.config.port);

        loop {
            let delay = backoff.next_delay();
            tracing::info!("Reconnecting to {} in {:?}", addr, delay);

            tokio::select! {
                biased;
                _ = stop.stopped() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }

            self.set_state(ConnectionState::Connecting);
            let attempt = tokio::select! {
                biased;
                _ = stop.stopped() => return Ok(None),
                result = transport::connect(
                    &self.config.host,
                    self.config.port,
                    self.config.connect_timeout,
                ) => result,
            };

            match attempt {
                Ok(stream) => {
                    backoff.mark_success();
                    self.stats.connections += 1;
                    return Ok(Some(stream));
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    let failures = backoff.mark_failure();
                    tracing::warn!("Reconnect attempt {} failed: {}", failures, e);
                    if max_attempts.is_some_and(|limit| failures >= limit) {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Run the request cycle on one stream until stop (`Ok`) or a fatal
    /// frame, I/O or sink error (`Err`). The stream is shut down either way.
    pub async fn drive<S>(&mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = FrameReader::with_max_payload(stream, self.config.max_payload_length);
        self.set_state(ConnectionState::Streaming);

        let result = self.stream_frames(&mut reader).await;
        self.stats.bytes_received += reader.bytes_read();

        // A stop that raced a frame error still ends in Stopping.
        if result.is_ok() || self.stop.is_stopped() {
            self.set_state(ConnectionState::Stopping);
        }
        if let Err(e) = reader.shutdown().await {
            tracing::debug!("Shutdown after session: {}", e);
        }
        self.set_state(ConnectionState::Disconnected);

        result
    }

    async fn stream_frames<S>(&mut self, reader: &mut FrameReader<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let stop = self.stop.clone();
        let idle_delay = self.config.idle_delay;
        let read_timeout = self.config.read_timeout;

        loop {
            if stop.is_stopped() {
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = stop.stopped() => {
                    tracing::debug!("Stop requested while waiting for a frame");
                    return Ok(());
                }
                result = read_frame(reader, read_timeout) => result,
            };

            match next {
                Ok(frame) => match self.sink.deliver(frame) {
                    Ok(()) => self.stats.frames_delivered += 1,
                    Err(ShotwireError::Backpressure { capacity }) => {
                        tracing::warn!("Sink queue full ({} frames), dropping frame", capacity);
                        self.stats.frames_dropped += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Frame sink rejected frame: {}", e);
                        return Err(e);
                    }
                },
                Err(ShotwireError::EmptyFrame {
                    height,
                    payload_length,
                }) => {
                    tracing::debug!(
                        "Skipping empty frame (height {}, {} bytes)",
                        height,
                        payload_length
                    );
                    self.stats.empty_frames += 1;
                }
                Err(e) => return Err(e),
            }

            tokio::select! {
                biased;
                _ = stop.stopped() => return Ok(()),
                _ = tokio::time::sleep(idle_delay) => {}
            }
        }
    }
}

async fn read_frame<S>(reader: &mut FrameReader<S>, timeout: Option<Duration>) -> Result<Frame>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, reader.next_frame())
            .await
            .map_err(|_| ShotwireError::ReadTimeout(limit))?,
        None => reader.next_frame().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_frame, REQUEST_TOKEN};
    use crate::sink::channel_sink;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::oneshot;

    fn test_config() -> SessionConfig {
        SessionConfig {
            idle_delay: Duration::from_millis(1),
            ..SessionConfig::default()
        }
    }

    async fn listen() -> (tokio::net::TcpListener, u16) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// Answer one request per scripted response, then report the next
    /// request and hold the connection open.
    async fn serve(mut server: DuplexStream, responses: Vec<Vec<u8>>, asked_again: oneshot::Sender<()>) {
        let mut request = [0u8; 4];
        for response in responses {
            server.read_exact(&mut request).await.unwrap();
            assert_eq!(&request, REQUEST_TOKEN);
            server.write_all(&response).await.unwrap();
        }
        if server.read_exact(&mut request).await.is_ok() {
            let _ = asked_again.send(());
        }
        let mut rest = Vec::new();
        let _ = server.read_to_end(&mut rest).await;
    }

    #[tokio::test]
    async fn test_drive_delivers_frames_and_skips_empty() {
        let (client, server) = duplex(1024);
        let (asked_tx, asked_rx) = oneshot::channel();
        let responses = vec![
            encode_frame(1, &[1; 3]),
            b"0|0|".to_vec(),
            encode_frame(2, &[2; 6]),
        ];
        tokio::spawn(serve(server, responses, asked_tx));

        let (sink, mut frames) = channel_sink(8);
        let mut session = SessionLoop::new(test_config(), sink);
        let stop = session.stop_signal();
        let task = tokio::spawn(async move {
            let result = session.drive(client).await;
            (session, result)
        });

        asked_rx.await.unwrap();
        stop.stop();
        let (session, result) = task.await.unwrap();
        result.unwrap();

        let first = frames.recv().await.unwrap();
        let second = frames.recv().await.unwrap();
        assert_eq!((first.height(), first.width()), (1, 1));
        assert_eq!((second.height(), second.width()), (2, 1));
        assert!(frames.try_recv().is_err());

        assert_eq!(session.stats().frames_delivered, 2);
        assert_eq!(session.stats().empty_frames, 1);
        assert_eq!(session.stats().bytes_received, 9);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_drive_stopped_before_first_request() {
        let (client, mut server) = duplex(64);
        let (sink, _frames) = channel_sink(8);
        let mut session = SessionLoop::new(test_config(), sink);
        session.stop_signal().stop();

        session.drive(client).await.unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_drive_fails_on_malformed_header() {
        let (client, mut server) = duplex(64);
        tokio::spawn(async move {
            let mut request = [0u8; 4];
            server.read_exact(&mut request).await.unwrap();
            server.write_all(b"garbage").await.unwrap();
        });

        let (sink, _frames) = channel_sink(8);
        let mut session = SessionLoop::new(test_config(), sink);
        let err = session.drive(client).await.unwrap_err();

        assert!(matches!(err, ShotwireError::MalformedOrClosed { received: 7 }));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_drive_fails_when_sink_fails() {
        let (client, server) = duplex(1024);
        let (asked_tx, _asked_rx) = oneshot::channel();
        tokio::spawn(serve(server, vec![encode_frame(1, &[0; 3])], asked_tx));

        let sink = |_frame: Frame| -> Result<()> { Err(ShotwireError::Sink("disk full".into())) };
        let mut session = SessionLoop::new(test_config(), sink);
        let err = session.drive(client).await.unwrap_err();

        assert!(matches!(err, ShotwireError::Sink(_)));
        assert_eq!(session.stats().frames_delivered, 0);
    }

    #[tokio::test]
    async fn test_drive_read_timeout() {
        let (client, mut server) = duplex(64);
        tokio::spawn(async move {
            let mut rest = Vec::new();
            let _ = server.read_to_end(&mut rest).await;
        });

        let (sink, _frames) = channel_sink(8);
        let mut config = test_config();
        config.read_timeout = Some(Duration::from_millis(50));
        let mut session = SessionLoop::new(config, sink);

        let err = session.drive(client).await.unwrap_err();
        assert!(matches!(err, ShotwireError::ReadTimeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_stop_interrupts_pending_read() {
        let (client, mut server) = duplex(64);
        tokio::spawn(async move {
            let mut rest = Vec::new();
            let _ = server.read_to_end(&mut rest).await;
        });

        let (sink, _frames) = channel_sink(8);
        let mut session = SessionLoop::new(test_config(), sink);
        let stop = session.stop_signal();
        let mut state = session.subscribe_state();
        let task = tokio::spawn(async move { session.drive(client).await });

        state
            .wait_for(|s| *s == ConnectionState::Streaming)
            .await
            .unwrap();
        stop.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stop did not interrupt the read")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_drive_drops_frames_when_sink_is_full() {
        let (client, server) = duplex(1024);
        let (asked_tx, asked_rx) = oneshot::channel();
        let responses = vec![
            encode_frame(1, &[1; 3]),
            encode_frame(2, &[2; 6]),
            encode_frame(3, &[3; 9]),
        ];
        tokio::spawn(serve(server, responses, asked_tx));

        let (sink, mut frames) = channel_sink(1);
        let mut session = SessionLoop::new(test_config(), sink);
        let stop = session.stop_signal();
        let task = tokio::spawn(async move {
            let result = session.drive(client).await;
            (session, result)
        });

        asked_rx.await.unwrap();
        stop.stop();
        let (session, result) = task.await.unwrap();
        result.unwrap();

        assert_eq!(frames.recv().await.unwrap().height(), 1);
        assert!(frames.try_recv().is_err());
        assert_eq!(session.stats().frames_delivered, 1);
        assert_eq!(session.stats().frames_dropped, 2);
    }

    #[test]
    fn test_unchanged_state_does_not_notify() {
        let (sink, _frames) = channel_sink(1);
        let session = SessionLoop::new(test_config(), sink);
        let mut state = session.subscribe_state();

        session.set_state(ConnectionState::Disconnected);
        assert!(!state.has_changed().unwrap());

        session.set_state(ConnectionState::Connecting);
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connecting);

        session.set_state(ConnectionState::Connecting);
        assert!(!state.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_stop_racing_frame_error_disconnects_once() {
        let (client, server) = duplex(1024);
        let (asked_tx, _asked_rx) = oneshot::channel();
        tokio::spawn(serve(server, vec![encode_frame(1, &[0; 3])], asked_tx));

        let stop = StopSignal::new();
        let remote = stop.clone();
        let sink = move |_frame: Frame| -> Result<()> {
            remote.stop();
            Err(ShotwireError::Sink("closed".into()))
        };
        let mut session = SessionLoop::new(test_config(), sink).with_stop_signal(stop);
        let mut state = session.subscribe_state();
        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while state.changed().await.is_ok() {
                seen.push(*state.borrow_and_update());
            }
            seen
        });

        let err = session.drive(client).await.unwrap_err();
        assert!(matches!(err, ShotwireError::Sink(_)));
        assert_eq!(session.state(), ConnectionState::Disconnected);

        drop(session);
        let seen = watcher.await.unwrap();
        assert_eq!(seen.last(), Some(&ConnectionState::Disconnected));
        assert_eq!(
            seen.iter()
                .filter(|s| **s == ConnectionState::Disconnected)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_start_runs_until_shared_stop() {
        let (listener, port) = listen().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4];
            stream.read_exact(&mut request).await.unwrap();
            assert_eq!(&request, REQUEST_TOKEN);
            stream.write_all(&encode_frame(2, &[5; 12])).await.unwrap();
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
        });

        let stop = StopSignal::new();
        let (sink, mut frames) = channel_sink(4);
        let config = SessionConfig {
            port,
            ..test_config()
        };
        let session = SessionLoop::new(config, sink).with_stop_signal(stop.clone());
        let mut state = session.subscribe_state();
        let task = tokio::spawn(session.start());

        let frame = frames.recv().await.unwrap();
        assert_eq!((frame.width(), frame.height()), (2, 2));
        state
            .wait_for(|s| *s == ConnectionState::Streaming)
            .await
            .unwrap();
        stop.stop();

        let report = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("shared stop signal was not observed")
            .unwrap()
            .unwrap();
        assert!(report.end.is_stopped());
        assert_eq!(report.stats.frames_delivered, 1);
        assert_eq!(report.stats.connections, 1);
    }

    #[tokio::test]
    async fn test_start_connect_refused() {
        let (listener, port) = listen().await;
        drop(listener);
        let config = SessionConfig {
            port,
            ..test_config()
        };

        let (sink, _frames) = channel_sink(1);
        let session = SessionLoop::new(config.clone(), sink);
        let state = session.subscribe_state();
        let err = session.start().await.unwrap_err();
        assert!(matches!(err, ShotwireError::Connect { .. }));
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);

        let (sink, _frames) = channel_sink(1);
        let mut session = SessionLoop::new(config, sink);
        assert!(session.connect().await.is_err());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.stats().connections, 0);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = SessionConfig {
            host: String::new(),
            ..test_config()
        };
        let (sink, _frames) = channel_sink(1);
        let session = SessionLoop::new(config, sink);
        let state = session.subscribe_state();

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, ShotwireError::Config(_)));
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }
}
