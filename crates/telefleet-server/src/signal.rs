//! Coalescing Signals
//!
//! Bounded, payload-free notifications used for membership changes and
//! refresh requests. Senders never block: when the channel is full the
//! signal is dropped, because an undelivered signal is already pending and
//! receivers always recompute from a fresh snapshot.
//!
//! Shutdown is a `watch<bool>` shared by every task; [`wait_for_shutdown`]
//! and [`pause`] are the only ways tasks wait on it.

use crate::observability::metrics;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::trace;

/// Create a named signal channel holding at most `capacity` pending signals.
pub fn channel(name: &'static str, capacity: usize) -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SignalSender { name, tx }, SignalReceiver { name, rx })
}

/// Fire-and-forget side of a signal channel.
#[derive(Debug, Clone)]
pub struct SignalSender {
    name: &'static str,
    tx: mpsc::Sender<()>,
}

impl SignalSender {
    /// Send a signal without blocking.
    ///
    /// Returns `false` when the signal was dropped because the channel is
    /// full or the receiver has gone away.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                trace!(signal = self.name, "Signal already pending, dropped");
                metrics::record_signal_dropped(self.name);
                false
            }
            Err(TrySendError::Closed(())) => {
                trace!(signal = self.name, "Signal receiver closed");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of a signal channel.
#[derive(Debug)]
pub struct SignalReceiver {
    name: &'static str,
    rx: mpsc::Receiver<()>,
}

impl SignalReceiver {
    /// Wait for the next signal. Returns `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Discard signals that are already queued, returning how many were dropped.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            trace!(signal = self.name, drained = drained, "Coalesced pending signals");
        }
        drained
    }
}

/// Resolve once shutdown is requested or its sender is gone.
///
/// The borrowed value is dropped here, so callers stay `Send` across
/// `select!` arms that await.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleep for `duration`. Returns `false` if shutdown arrived first.
pub async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = wait_for_shutdown(shutdown) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_drops_when_full() {
        let (tx, mut rx) = channel("test", 1);
        assert!(tx.notify());
        assert!(!tx.notify());
        assert!(!tx.notify());

        assert_eq!(rx.recv().await, Some(()));
        assert_eq!(rx.drain(), 0);
        assert!(tx.notify());
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let (tx, mut rx) = channel("test", 0);
        assert!(tx.notify());
        assert_eq!(rx.recv().await, Some(()));
    }

    #[tokio::test]
    async fn test_drain_coalesces_burst() {
        let (tx, mut rx) = channel("test", 8);
        for _ in 0..5 {
            tx.notify();
        }
        assert_eq!(rx.recv().await, Some(()));
        assert_eq!(rx.drain(), 4);
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let (tx, rx) = channel("test", 1);
        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.notify());
    }

    #[tokio::test]
    async fn test_recv_ends_when_senders_dropped() {
        let (tx, mut rx) = channel("test", 1);
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_runs_full_duration() {
        let (_tx, mut rx) = watch::channel(false);
        let started = tokio::time::Instant::now();
        assert!(pause(&mut rx, Duration::from_secs(10)).await);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_interrupted_by_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let _ = tx.send(true);
        });
        let started = tokio::time::Instant::now();
        assert!(!pause(&mut rx, Duration::from_secs(10)).await);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_counts_as_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        wait_for_shutdown(&mut rx).await;
    }
}
