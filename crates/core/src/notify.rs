//! Advisory balance-change broadcast.

use tokio::sync::broadcast;

/// Fire-and-forget signal that the token balance may have changed.
///
/// The signal carries no payload; receivers re-fetch the balance from
/// the server instead of trusting anything computed locally. Two
/// near-simultaneous signals cause redundant re-fetches, which is
/// harmless and idempotent.
#[derive(Debug, Clone)]
pub struct BalanceNotifier {
    tx: broadcast::Sender<()>,
}

impl BalanceNotifier {
    /// Create a notifier with room for a few unconsumed signals.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Announce that the balance may have changed. Having no
    /// subscribers is fine.
    pub fn notify(&self) {
        let _ = self.tx.send(());
    }

    /// Subscribe to future balance-change hints.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

impl Default for BalanceNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_the_signal() {
        let notifier = BalanceNotifier::new();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.notify();

        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
    }

    #[test]
    fn notifying_without_subscribers_does_not_panic() {
        let notifier = BalanceNotifier::new();
        notifier.notify();
    }

    #[tokio::test]
    async fn redundant_signals_are_delivered_individually() {
        let notifier = BalanceNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.notify();
        notifier.notify();

        assert!(rx.recv().await.is_ok());
        assert!(rx.recv().await.is_ok());
        assert!(rx.try_recv().is_err());
    }
}
