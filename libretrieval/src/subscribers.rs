//! Event subscriptions. Every deal transition is published to subscribers as an `(event, state)` pair.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Returned by `subscribe`; hand it back to `unsubscribe` to stop receiving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

pub type Subscriber<E, S> = Arc<dyn Fn(&E, &S) + Send + Sync>;

pub struct Subscribers<E, S> {
    next_token: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionToken, Subscriber<E, S>)>>,
}

impl<E, S> Default for Subscribers<E, S> {
    fn default() -> Self {
        Self { next_token: AtomicU64::new(1), subscribers: RwLock::new(Vec::new()) }
    }
}

impl<E, S> Subscribers<E, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&E, &S) + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((token, Arc::new(callback)));
        token
    }

    /// Returns false if the token was unknown (or already unsubscribed).
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(t, _)| *t != token);
        subscribers.len() != before
    }

    /// Calls every subscriber. The list is copied first and no lock is held during the callbacks, so a subscriber may
    /// subscribe, unsubscribe or call back into the orchestrator.
    pub fn publish(&self, event: &E, state: &S) {
        let current = self.subscribers.read().iter().map(|(_, s)| Arc::clone(s)).collect::<Vec<_>>();
        for subscriber in current {
            subscriber(event, state);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
