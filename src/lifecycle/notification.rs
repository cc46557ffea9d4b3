//! One-shot, level-triggered notifications.
//!
//! A notification is split into a [`Notifier`] and a [`Waiter`]. Neither half
//! is `Clone`, so each instance has exactly one writer and one reader. Once
//! notified it stays notified.

use tokio::sync::watch;

use crate::error::AgentError;

/// Create a notification with a name used in logs and errors.
pub fn notification(name: &'static str) -> (Notifier, Waiter) {
    let (tx, rx) = watch::channel(false);
    (Notifier { name, tx }, Waiter { name, rx })
}

/// Writing half.
#[derive(Debug)]
pub struct Notifier {
    name: &'static str,
    tx: watch::Sender<bool>,
}

impl Notifier {
    /// Signal the waiter. Idempotent.
    pub fn notify(&self) {
        let previous = self.tx.send_replace(true);
        if !previous {
            tracing::debug!(notification = self.name, "Notified");
        }
    }

    pub fn is_notified(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Reading half.
#[derive(Debug)]
pub struct Waiter {
    name: &'static str,
    rx: watch::Receiver<bool>,
}

impl Waiter {
    /// Wait until notified; returns immediately if already notified.
    ///
    /// Fails if the notifier was dropped without ever firing.
    pub async fn wait(&mut self) -> Result<(), AgentError> {
        self.rx
            .wait_for(|notified| *notified)
            .await
            .map(|_| ())
            .map_err(|_| AgentError::NotificationAbandoned(self.name))
    }

    pub fn is_notified(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stays_signaled_once_notified() {
        let (notifier, mut waiter) = notification("exit requested");
        assert!(!waiter.is_notified());

        notifier.notify();
        notifier.notify();
        assert!(waiter.is_notified());

        waiter.wait().await.unwrap();
        waiter.wait().await.unwrap();
    }

    #[tokio::test]
    async fn wakes_a_pending_waiter() {
        let (notifier, mut waiter) = notification("all clients disconnected");
        let task = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        notifier.notify();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn instances_are_independent() {
        let (exit, mut exit_waiter) = notification("exit requested");
        let (_done, mut done_waiter) = notification("all clients disconnected");

        exit.notify();
        exit_waiter.wait().await.unwrap();
        assert!(!done_waiter.is_notified());
        assert!(tokio::time::timeout(Duration::from_millis(20), done_waiter.wait())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn abandoned_notifier_is_an_error() {
        let (notifier, mut waiter) = notification("exit requested");
        drop(notifier);
        assert!(matches!(
            waiter.wait().await,
            Err(AgentError::NotificationAbandoned("exit requested"))
        ));
    }

    #[tokio::test]
    async fn notified_then_dropped_still_counts() {
        let (notifier, mut waiter) = notification("exit requested");
        notifier.notify();
        drop(notifier);
        waiter.wait().await.unwrap();
    }
}
