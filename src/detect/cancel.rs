//! Job cancellation
//!
//! A watch-channel token plumbed through every suspension point. The
//! global job deadline and user interrupts both trip it; in-flight
//! browser waits unwind at their next await.

use std::time::Duration;
use tokio::sync::watch;

/// Trips the paired tokens.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation signal, cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token that never trips (one-off helpers, tests).
    pub fn never() -> CancelToken {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive forever so the channel never closes.
        std::mem::forget(tx);
        CancelToken { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when the token trips. Also resolves if the handle is
    /// dropped, which counts as cancellation.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep that wakes early on cancellation. Returns false when the
    /// sleep was interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_starts_untripped_and_trips_once() {
        let (handle, token) = CancelToken::new();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await; // resolves immediately
    }

    #[tokio::test]
    async fn sleep_is_interrupted_by_cancel() {
        let (handle, token) = CancelToken::new();
        let sleeper = tokio::spawn(async move { token.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        let completed = sleeper.await.unwrap();
        assert!(!completed);
    }

    #[tokio::test]
    async fn never_token_does_not_trip() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        assert!(token.sleep(Duration::from_millis(1)).await);
    }
}
