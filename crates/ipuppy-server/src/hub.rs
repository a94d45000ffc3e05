//! Fan-out of server events to connected viewers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::ServerEvent;

/// Identifies a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

/// The observer can no longer receive events.
#[derive(Debug, thiserror::Error)]
#[error("observer disconnected")]
pub struct DeliveryError;

/// Receives broadcast events. Delivery must not block.
pub trait Observer: Send + Sync {
    fn deliver(&self, event: &ServerEvent) -> Result<(), DeliveryError>;
}

/// Observer backed by an unbounded channel, drained by a connection task.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { tx }
    }
}

impl Observer for ChannelObserver {
    fn deliver(&self, event: &ServerEvent) -> Result<(), DeliveryError> {
        self.tx.send(event.clone()).map_err(|_| DeliveryError)
    }
}

/// Set of observers keyed by id.
///
/// Events are delivered under the registry lock, so every observer sees
/// broadcasts in call order. An observer whose delivery fails is dropped;
/// the others still receive the event.
#[derive(Default)]
pub struct BroadcastHub {
    next_id: AtomicU64,
    observers: Mutex<BTreeMap<ObserverId, Arc<dyn Observer>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn observers(&self) -> MutexGuard<'_, BTreeMap<ObserverId, Arc<dyn Observer>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a fresh observer id.
    pub fn next_id(&self) -> ObserverId {
        ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add an observer. Returns `false` if the id is already registered.
    pub fn register(&self, id: ObserverId, observer: Arc<dyn Observer>) -> bool {
        let mut observers = self.observers();
        if observers.contains_key(&id) {
            return false;
        }
        observers.insert(id, observer);
        tracing::debug!("Registered observer {:?} ({} total)", id, observers.len());
        true
    }

    /// Register a channel observer and return its receiving end.
    pub fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id();
        self.register(id, Arc::new(ChannelObserver::new(tx)));
        (id, rx)
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let removed = self.observers().remove(&id).is_some();
        if removed {
            tracing::debug!("Unregistered observer {:?}", id);
        }
        removed
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every observer. Returns the number of deliveries.
    pub fn broadcast(&self, event_name: &str, payload: Value) -> usize {
        let event = ServerEvent::new(event_name, payload);
        let mut observers = self.observers();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, observer) in observers.iter() {
            match observer.deliver(&event) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!("Dropping observer {:?}: {}", id, e);
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            observers.remove(&id);
        }

        delivered
    }

    /// Deliver an event to one observer. A failed delivery drops it.
    pub fn broadcast_to(&self, id: ObserverId, event: ServerEvent) -> bool {
        let mut observers = self.observers();
        let Some(observer) = observers.get(&id) else {
            return false;
        };
        match observer.deliver(&event) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropping observer {:?}: {}", id, e);
                observers.remove(&id);
                false
            }
        }
    }

    /// Serialize `payload` and broadcast it.
    pub fn publish<T: Serialize>(&self, event_name: &str, payload: &T) -> usize {
        match serde_json::to_value(payload) {
            Ok(value) => self.broadcast(event_name, value),
            Err(e) => {
                tracing::error!("Failed to serialize {} payload: {}", event_name, e);
                0
            }
        }
    }
}
