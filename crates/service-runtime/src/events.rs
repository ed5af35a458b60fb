//! State-change events and the fan-out event bus
//!
//! Every state machine update is published as one [`ServiceStateEvent`].
//! Subscribers each own a bounded queue; when a queue is full the oldest
//! queued event is discarded so that publishers never wait on a slow reader.

use crate::error::Error;
use crate::state::{HealthStatus, ServiceState, ServiceType};
use async_channel::{Receiver, Sender, TrySendError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Default per-subscriber queue length
pub const DEFAULT_EVENT_BUFFER: usize = 128;

/// One state machine update, as observed by subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStateEvent {
    /// Service label
    pub label: String,
    /// Service kind
    pub service_type: ServiceType,
    /// State before the update
    pub old_state: ServiceState,
    /// State after the update
    pub new_state: ServiceState,
    /// Health after the update
    pub health: HealthStatus,
    /// Error recorded by the update, if any
    pub error: Option<Error>,
    /// When the update was applied
    pub timestamp: DateTime<Utc>,
    /// Per-service update counter
    ///
    /// Callbacks run after the record lock is released, so concurrent updates
    /// may be published out of order. A lower sequence than one already seen
    /// for the same label is stale.
    pub sequence: u64,
}

impl ServiceStateEvent {
    /// Whether the lifecycle state changed (as opposed to a health-only update)
    pub fn is_transition(&self) -> bool {
        self.old_state != self.new_state
    }
}

/// Subscriber-side event selection
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    labels: Option<HashSet<String>>,
    service_types: Option<HashSet<ServiceType>>,
    transitions_only: bool,
}

impl EventFilter {
    /// Accept every event
    pub fn all() -> Self {
        Self::default()
    }

    /// Only events for these labels
    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    /// Only events for these service kinds
    pub fn service_types(mut self, types: impl IntoIterator<Item = ServiceType>) -> Self {
        self.service_types = Some(types.into_iter().collect());
        self
    }

    /// Drop health-only updates
    pub fn transitions_only(mut self) -> Self {
        self.transitions_only = true;
        self
    }

    /// Check whether an event passes this filter
    pub fn matches(&self, event: &ServiceStateEvent) -> bool {
        if self.transitions_only && !event.is_transition() {
            return false;
        }
        if let Some(labels) = &self.labels {
            if !labels.contains(&event.label) {
                return false;
            }
        }
        if let Some(types) = &self.service_types {
            if !types.contains(&event.service_type) {
                return false;
            }
        }
        true
    }
}

struct Subscriber {
    id: u64,
    filter: EventFilter,
    sender: Sender<ServiceStateEvent>,
    dropped: Arc<AtomicU64>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

/// Publish/subscribe fan-out for state events
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the default per-subscriber buffer
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_BUFFER)
    }

    /// Create a bus with a custom per-subscriber buffer (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner::default())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let (sender, receiver) = async_channel::bounded(self.capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            filter,
            sender,
            dropped: dropped.clone(),
        });
        debug!("Event subscriber {} registered", id);

        Subscription {
            id,
            receiver,
            dropped,
        }
    }

    /// Remove a subscriber explicitly
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| s.id != id);
        before != inner.subscribers.len()
    }

    /// Deliver an event to every matching subscriber without blocking
    ///
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, event: ServiceStateEvent) -> usize {
        let mut inner = self.lock();
        let mut delivered = 0;

        inner.subscribers.retain(|subscriber| {
            if subscriber.sender.is_closed() {
                debug!("Pruning closed event subscriber {}", subscriber.id);
                return false;
            }
            if !subscriber.filter.matches(&event) {
                return true;
            }
            match subscriber.sender.force_send(event.clone()) {
                Ok(None) => {
                    delivered += 1;
                    true
                }
                Ok(Some(_oldest)) => {
                    subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("Subscriber {} full, dropped oldest event", subscriber.id);
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });

        delivered
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| !s.sender.is_closed())
            .count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a bus subscription
///
/// Dropping the subscription closes its queue; the bus prunes it on the next
/// publish.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: Receiver<ServiceStateEvent>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Subscriber id, usable with [`EventBus::unsubscribe`]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event; `None` once the subscription is removed
    pub async fn recv(&self) -> Option<ServiceStateEvent> {
        self.receiver.recv().await.ok()
    }

    /// Take the next queued event without waiting
    pub fn try_recv(&self) -> Option<ServiceStateEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain all queued events
    pub fn drain(&self) -> Vec<ServiceStateEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Number of events discarded because this subscriber fell behind
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Convert into the raw channel receiver (also a `Stream`)
    pub fn into_receiver(self) -> Receiver<ServiceStateEvent> {
        self.receiver
    }
}

/// Non-blocking send used where a lossy hand-off is acceptable
pub(crate) fn offer<T>(sender: &Sender<T>, value: T) -> bool {
    match sender.try_send(value) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Closed(_)) => false,
    }
}
