//! # Subscription Notifier
//!
//! The in-process bridge between the write path and the watch engine.
//! Watchers subscribe under their `(namespace, type)` scope; after every
//! committed write the write path notifies that scope.
//!
//! Wakeups carry no payload. Each subscription owns a capacity-1 channel
//! and notification is a non-blocking send that drops when the slot is
//! full, so any burst of writes collapses into a single pending wakeup.
//! A woken watcher re-reads the event table by event-id range, paying at
//! most one extra query per coalesced burst.
//!
//! The subscription map lock is only ever held for O(subscriber-count)
//! work: cloning the sender list on notify, splicing on (un)subscribe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::resource::Kind;

// =============================================================================
// Manager
// =============================================================================

/// Subscription registry keyed by watch scope.
#[derive(Default)]
pub(crate) struct Manager {
    subscriptions: Mutex<HashMap<Kind, Vec<mpsc::Sender<()>>>>,
}

/// Registers a new subscription under the given scope.
///
/// A free function rather than a method: the subscription keeps an owned
/// handle to the manager for its drop-time unsubscribe.
pub(crate) fn subscribe(manager: &Arc<Manager>, kind: Kind) -> Subscription {
    let (tx, rx) = mpsc::channel(1);

    lock_unpoisoned(&manager.subscriptions)
        .entry(kind.clone())
        .or_default()
        .push(tx.clone());

    Subscription {
        kind,
        tx,
        rx,
        manager: Arc::clone(manager),
    }
}

impl Manager {
    /// Wakes every subscriber of the given scope.
    ///
    /// The sender list is snapshotted under the lock and the sends happen
    /// outside it; a full wakeup slot means the watcher already has a
    /// wakeup pending and the send is dropped.
    pub(crate) fn notify(&self, kind: &Kind) {
        let senders = match lock_unpoisoned(&self.subscriptions).get(kind) {
            Some(senders) => senders.clone(),
            None => return,
        };

        for sender in senders {
            let _ = sender.try_send(());
        }
    }

    /// True when no subscriptions are registered. Test hook.
    pub(crate) fn empty(&self) -> bool {
        lock_unpoisoned(&self.subscriptions).is_empty()
    }

    fn unsubscribe(&self, kind: &Kind, tx: &mpsc::Sender<()>) {
        let mut subscriptions = lock_unpoisoned(&self.subscriptions);

        if let Some(senders) = subscriptions.get_mut(kind) {
            senders.retain(|candidate| !candidate.same_channel(tx));

            if senders.is_empty() {
                subscriptions.remove(kind);
            }
        }
    }
}

/// A poisoned lock still yields usable contents; the map holds plain data.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// An active subscription; unsubscribes on drop.
pub(crate) struct Subscription {
    kind: Kind,
    tx: mpsc::Sender<()>,
    rx: mpsc::Receiver<()>,
    manager: Arc<Manager>,
}

impl Subscription {
    /// Waits for the next wakeup.
    pub(crate) async fn notified(&mut self) {
        // the subscription holds its own sender, so the channel cannot
        // close while we are alive
        let _ = self.rx.recv().await;
    }

    /// Self-wakeup: puts a wakeup into the slot unless one is already
    /// pending. Used to kick-start bookmark-resumed watches before any
    /// write happens.
    pub(crate) fn trigger_notify(&self) {
        let _ = self.tx.try_send(());
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.manager.unsubscribe(&self.kind, &self.tx);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn kind() -> Kind {
        Kind::new("ns1", "path")
    }

    #[tokio::test]
    async fn test_notify_wakes_subscriber() {
        let manager = Arc::new(Manager::default());
        let mut sub = subscribe(&manager, kind());

        manager.notify(&kind());

        tokio::time::timeout(Duration::from_secs(1), sub.notified())
            .await
            .expect("wakeup should arrive");
    }

    #[tokio::test]
    async fn test_notifications_coalesce() {
        let manager = Arc::new(Manager::default());
        let mut sub = subscribe(&manager, kind());

        for _ in 0..10 {
            manager.notify(&kind());
        }

        // exactly one wakeup is pending
        tokio::time::timeout(Duration::from_secs(1), sub.notified())
            .await
            .expect("first wakeup should arrive");

        let second = tokio::time::timeout(Duration::from_millis(50), sub.notified()).await;
        assert!(second.is_err(), "burst should coalesce into one wakeup");
    }

    #[tokio::test]
    async fn test_notify_is_scoped_by_kind() {
        let manager = Arc::new(Manager::default());
        let mut sub = subscribe(&manager, kind());

        manager.notify(&Kind::new("ns1", "other"));
        manager.notify(&Kind::new("ns2", "path"));

        let woken = tokio::time::timeout(Duration::from_millis(50), sub.notified()).await;
        assert!(woken.is_err(), "unrelated scopes must not wake us");
    }

    #[tokio::test]
    async fn test_all_subscribers_of_a_kind_wake() {
        let manager = Arc::new(Manager::default());
        let mut first = subscribe(&manager, kind());
        let mut second = subscribe(&manager, kind());

        manager.notify(&kind());

        tokio::time::timeout(Duration::from_secs(1), first.notified())
            .await
            .expect("first subscriber wakes");
        tokio::time::timeout(Duration::from_secs(1), second.notified())
            .await
            .expect("second subscriber wakes");
    }

    #[tokio::test]
    async fn test_trigger_notify() {
        let manager = Arc::new(Manager::default());
        let mut sub = subscribe(&manager, kind());

        sub.trigger_notify();

        tokio::time::timeout(Duration::from_secs(1), sub.notified())
            .await
            .expect("self-triggered wakeup should arrive");
    }

    #[tokio::test]
    async fn test_unsubscribe_on_drop() {
        let manager = Arc::new(Manager::default());
        assert!(manager.empty());

        let first = subscribe(&manager, kind());
        let second = subscribe(&manager, kind());
        assert!(!manager.empty());

        drop(first);
        assert!(!manager.empty());

        drop(second);
        assert!(manager.empty(), "empty entries are removed from the map");
    }
}
