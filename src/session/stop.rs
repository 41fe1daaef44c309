//! Stop signal shared between a session and whoever controls it.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable, idempotent stop request.
///
/// The session checks [`StopSignal::is_stopped`] before every frame request
/// and races [`StopSignal::stopped`] against reads, idle delays and
/// reconnect waits.
///
/// # Example
///
/// ```
/// use shotwire::StopSignal;
///
/// let signal = StopSignal::new();
/// let remote = signal.clone();
///
/// remote.stop();
/// remote.stop();
/// assert!(signal.is_stopped());
/// ```
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    /// Create a signal that has not been stopped.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop. Calling it again has no further effect.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once a stop has been requested (immediately if it already was).
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_starts_unstopped() {
        assert!(!StopSignal::new().is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_stop() {
        let signal = StopSignal::new();
        let remote = signal.clone();

        let waiter = tokio::spawn(async move { signal.stopped().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        remote.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stopped() did not resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopped_resolves_immediately_when_already_stopped() {
        let signal = StopSignal::new();
        signal.stop();

        tokio::time::timeout(Duration::from_millis(100), signal.stopped())
            .await
            .expect("stopped() should not block");
    }
}
