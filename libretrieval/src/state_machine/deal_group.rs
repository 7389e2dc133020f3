//! A group of deals of one kind (client or provider), each driven by its own task.
//!
//! Events for a deal are queued to that deal's task, which applies them one at a time: transition, persist, publish to
//! subscribers, acknowledge the sender, then run the entry handler for the new status. An event produced by an entry
//! handler is applied before any event that was queued from outside in the meantime. Distinct deals run concurrently.

use crate::logging::LogTarget;
use crate::state_machine::error::LifeCycleError;
use crate::storage::{DealRecord, DealStore};
use crate::subscribers::{Subscribers, SubscriptionToken};
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use log::*;
use std::collections::{HashMap, VecDeque};
use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A deal state machine: a pure transition function plus the side-effecting handler that runs on entering a status.
pub trait DealFsm: Send + Sync + 'static {
    type State: DealRecord;
    type Event: Clone + Debug + Display + Send + Sync + 'static;

    /// Applies `event` to `state`. On error, `state` must be left untouched.
    fn apply(&self, state: &mut Self::State, event: &Self::Event) -> Result<(), LifeCycleError>;

    /// Runs the entry handler for the deal's current status, if there is one, and returns the event it produced.
    fn on_enter(&self, state: &Self::State) -> impl Future<Output = Option<Self::Event>> + Send;
}

type Ack = oneshot::Sender<Result<(), LifeCycleError>>;

struct Envelope<E> {
    event: E,
    ack: Option<Ack>,
}

struct DealHandle<F: DealFsm> {
    /// `None` once the deal's task has stopped.
    sender: Option<mpsc::UnboundedSender<Envelope<F::Event>>>,
    snapshot: F::State,
}

type DealMap<F> = HashMap<<<F as DealFsm>::State as DealRecord>::Key, DealHandle<F>>;

pub struct DealGroup<F: DealFsm> {
    fsm: Arc<F>,
    deals: Arc<RwLock<DealMap<F>>>,
    store: Arc<dyn DealStore<F::State>>,
    subscribers: Arc<Subscribers<F::Event, F::State>>,
    log: LogTarget,
}

impl<F: DealFsm> Clone for DealGroup<F> {
    fn clone(&self) -> Self {
        Self {
            fsm: Arc::clone(&self.fsm),
            deals: Arc::clone(&self.deals),
            store: Arc::clone(&self.store),
            subscribers: Arc::clone(&self.subscribers),
            log: self.log.clone(),
        }
    }
}

impl<F: DealFsm> DealGroup<F> {
    pub fn new(fsm: F, store: Arc<dyn DealStore<F::State>>, log: LogTarget) -> Self {
        Self {
            fsm: Arc::new(fsm),
            deals: Arc::new(RwLock::new(HashMap::new())),
            store,
            subscribers: Arc::new(Subscribers::new()),
            log,
        }
    }

    pub fn fsm(&self) -> &F {
        &self.fsm
    }

    /// Starts tracking a new deal. When `run_entry` is set, the entry handler for the deal's initial status runs
    /// straight away; otherwise the deal waits for its first event.
    pub async fn begin(&self, state: F::State, run_entry: bool) -> Result<(), LifeCycleError> {
        let key = state.key();
        let mut deals = self.deals.write().await;
        if deals.contains_key(&key) {
            return Err(LifeCycleError::DuplicateDeal(key.to_string()));
        }
        self.store.write_deal(&state).map_err(|e| LifeCycleError::Storage(e.to_string()))?;
        if state.status().is_terminal() {
            deals.insert(key, DealHandle { sender: None, snapshot: state });
            return Ok(());
        }
        let (tx, rx) = mpsc::unbounded();
        deals.insert(key, DealHandle { sender: Some(tx), snapshot: state.clone() });
        drop(deals);
        debug!(target: self.log.as_str(), "Tracking deal {key} ({})", state.status());
        let group = self.clone();
        tokio::spawn(async move { group.run_deal(state, rx, run_entry).await });
        Ok(())
    }

    /// Picks up deals that were persisted before a restart. Unfinished deals resume by re-running the entry handler
    /// for their status; finished ones are only kept for inspection.
    pub async fn restore(&self, states: Vec<F::State>) -> Result<(), LifeCycleError> {
        for state in states {
            let key = state.key();
            let status = state.status();
            if status.is_terminal() {
                self.deals.write().await.insert(key, DealHandle { sender: None, snapshot: state });
                continue;
            }
            info!(target: self.log.as_str(), "Resuming deal {key} in status {status}");
            self.begin(state, true).await?;
        }
        Ok(())
    }

    /// Queues `event` for the deal and waits until it has been applied, or rejected.
    pub async fn send_event(
        &self,
        key: <F::State as DealRecord>::Key,
        event: F::Event,
    ) -> Result<(), LifeCycleError> {
        let sender = {
            let deals = self.deals.read().await;
            let handle = deals.get(&key).ok_or_else(|| LifeCycleError::DealNotFound(key.to_string()))?;
            match &handle.sender {
                Some(sender) => sender.clone(),
                None => return Err(LifeCycleError::Terminal(handle.snapshot.status())),
            }
        };
        trace!(target: self.log.as_str(), "Queueing {event} for deal {key}");
        let (tx, rx) = oneshot::channel();
        if sender.unbounded_send(Envelope { event, ack: Some(tx) }).is_err() {
            return Err(self.closed_error(key).await);
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self.closed_error(key).await),
        }
    }

    /// Stops tracking a deal and removes its record from the store. Its task ends once the queue drains. Only meant
    /// for a deal that nothing else is driving, such as one whose opening event was refused.
    pub async fn discard(&self, key: &<F::State as DealRecord>::Key) -> Result<Option<F::State>, LifeCycleError> {
        let Some(handle) = self.deals.write().await.remove(key) else {
            return Ok(None);
        };
        debug!(target: self.log.as_str(), "Discarding deal {key} ({})", handle.snapshot.status());
        self.store.delete_deal(&handle.snapshot.store_name()).map_err(|e| LifeCycleError::Storage(e.to_string()))?;
        Ok(Some(handle.snapshot))
    }

    pub async fn get(&self, key: &<F::State as DealRecord>::Key) -> Option<F::State> {
        self.deals.read().await.get(key).map(|h| h.snapshot.clone())
    }

    pub async fn list(&self) -> Vec<F::State> {
        self.deals.read().await.values().map(|h| h.snapshot.clone()).collect()
    }

    /// Returns the first deal matching `pred`.
    pub async fn find<P>(&self, pred: P) -> Option<F::State>
    where
        P: Fn(&F::State) -> bool,
    {
        self.deals.read().await.values().find(|h| pred(&h.snapshot)).map(|h| h.snapshot.clone())
    }

    pub fn subscribe<C>(&self, callback: C) -> SubscriptionToken
    where
        C: Fn(&F::Event, &F::State) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.subscribers.unsubscribe(token)
    }

    async fn closed_error(&self, key: <F::State as DealRecord>::Key) -> LifeCycleError {
        match self.get(&key).await {
            Some(state) if state.status().is_terminal() => LifeCycleError::Terminal(state.status()),
            Some(_) => LifeCycleError::InternalError(format!("the task for deal {key} stopped unexpectedly")),
            None => LifeCycleError::DealNotFound(key.to_string()),
        }
    }

    async fn run_deal(
        self,
        mut state: F::State,
        mut queue: mpsc::UnboundedReceiver<Envelope<F::Event>>,
        run_entry: bool,
    ) {
        let key = state.key();
        let mut local = VecDeque::new();
        if run_entry {
            if let Some(event) = self.fsm.on_enter(&state).await {
                local.push_back(Envelope { event, ack: None });
            }
        }
        while !state.status().is_terminal() {
            let envelope = match local.pop_front() {
                Some(envelope) => envelope,
                None => match queue.next().await {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            let Envelope { event, ack } = envelope;
            let result = self.process(&mut state, &event).await;
            let applied = result.is_ok();
            if let Some(ack) = ack {
                let _ = ack.send(result);
            }
            if applied {
                if let Some(next) = self.fsm.on_enter(&state).await {
                    local.push_back(Envelope { event: next, ack: None });
                }
            }
        }
        // Stop accepting events, then turn away anything that was already queued.
        // The key may have been discarded and begun again, in which case the handle belongs to the new task.
        if let Some(handle) = self.deals.write().await.get_mut(&key) {
            if handle.sender.as_ref().is_some_and(|sender| sender.is_connected_to(&queue)) {
                handle.sender = None;
            }
        }
        queue.close();
        while let Some(Envelope { event, ack }) = queue.next().await {
            debug!(target: self.log.as_str(), "Deal {key} is {}; dropping {event}", state.status());
            if let Some(ack) = ack {
                let _ = ack.send(Err(LifeCycleError::Terminal(state.status())));
            }
        }
        debug!(target: self.log.as_str(), "Deal {key} finished with status {}", state.status());
    }

    async fn process(&self, state: &mut F::State, event: &F::Event) -> Result<(), LifeCycleError> {
        let key = state.key();
        let mut next = state.clone();
        if let Err(e) = self.fsm.apply(&mut next, event) {
            warn!(target: self.log.as_str(), "Deal {key}: {e}");
            return Err(e);
        }
        debug!(target: self.log.as_str(), "Deal {key}: {event} moved {} -> {}", state.status(), next.status());
        // The transition only counts once it is on disk, so that a restore never resumes from an older state.
        if let Err(e) = self.store.write_deal(&next) {
            error!(target: self.log.as_str(), "Could not persist deal {key}, dropping {event}: {e}");
            return Err(LifeCycleError::Storage(e.to_string()));
        }
        if let Some(handle) = self.deals.write().await.get_mut(&key) {
            handle.snapshot = next.clone();
        }
        *state = next;
        self.subscribers.publish(event, state);
        Ok(())
    }
}
