//! Event Bus implementation.
//!
//! Provides the core [`EventBus`] struct: one fan-out channel carrying every
//! published event, typed views over it, and opt-in subscription tracking.
//!
//! ## Rules
//! - **Never fails**: `publish`, `of_type`, `on`, `all_events` and `dispose`
//!   have no error path.
//! - **Inert after dispose**: publishing is a silent no-op and every view is
//!   an already terminated stream, so late teardown races are harmless.
//! - **Non-blocking publish**: `publish` enqueues and returns; handlers run
//!   on their own listener tasks.
//! - **Lossless**: every stream gets every event published after it was
//!   created, however slow its consumer is.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::category::Category;
use super::channel::{BroadcastChannel, Inlet};
use super::events::{downcast_event, DomainEvent, SharedEvent};
use super::stream::EventStream;
use super::subscription::{Subscription, SubscriptionId};
use crate::types::{thread_safe_map, ThreadSafeMap};

/// Configuration for the event bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Backlog at which a slow stream is reported with a warning.
    ///
    /// Nothing is dropped past this point; the queue keeps growing.
    pub backlog_warning: usize,
    /// Name used in log output.
    pub name: String,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            backlog_warning: 1024,
            name: "default".to_string(),
        }
    }
}

impl EventBusConfig {
    /// Default configuration with a custom name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Central event bus for typed, in-process event distribution
pub struct EventBus {
    /// Fan-out to every live stream; closed on dispose.
    channel: BroadcastChannel,
    /// Monotonic disposed flag.
    disposed: AtomicBool,
    /// Subscriptions registered through `track_subscription`.
    tracked: ThreadSafeMap<SubscriptionId, Subscription>,
    /// Configuration
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        tracing::debug!("Event bus '{}' created", config.name);
        Self {
            channel: BroadcastChannel::new(config.name.clone(), config.backlog_warning),
            disposed: AtomicBool::new(false),
            tracked: thread_safe_map(),
            config,
        }
    }

    /// Publish an event to all current listeners.
    ///
    /// Silently ignored once the bus is disposed.
    pub fn publish<E: DomainEvent>(&self, event: E) {
        self.publish_arc(Arc::new(event));
    }

    /// Publish an already shared event.
    pub fn publish_arc(&self, event: SharedEvent) {
        if self.is_disposed() {
            tracing::trace!(
                "Event bus '{}' disposed, dropping {}",
                self.config.name,
                event.event_type()
            );
            return;
        }

        let event_type = event.event_type().to_string();
        match self.channel.send(event) {
            0 => tracing::trace!("Published {} with no active receivers", event_type),
            receivers => tracing::trace!("Published {} to {} receivers", event_type, receivers),
        }
    }

    /// Every published event, regardless of its type.
    pub fn all_events(&self) -> EventStream<SharedEvent> {
        match self.receiver() {
            Some(inlet) => EventStream::from_inlet(inlet, Some),
            None => EventStream::empty(),
        }
    }

    /// Published events whose concrete type is `T`.
    pub fn of_type<T: DomainEvent>(&self) -> EventStream<Arc<T>> {
        match self.receiver() {
            Some(inlet) => EventStream::from_inlet(inlet, |event| downcast_event::<T>(&event)),
            None => EventStream::empty(),
        }
    }

    /// Published events of type `T` whose category equals `category` by value.
    pub fn on<T: DomainEvent>(&self, category: &dyn Category) -> EventStream<Arc<T>> {
        let wanted = category.value().to_string();
        match self.receiver() {
            Some(inlet) => EventStream::from_inlet(inlet, move |event| {
                if event.category().value() != wanted {
                    return None;
                }
                downcast_event::<T>(&event)
            }),
            None => EventStream::empty(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Number of tracked subscriptions.
    ///
    /// Only counts handles registered with [`track_subscription`](Self::track_subscription).
    pub fn subscription_count(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Number of live stream receivers attached to the channel.
    pub fn receiver_count(&self) -> usize {
        self.channel.receiver_count()
    }

    /// Track a subscription so it counts towards `subscription_count` and is
    /// cancelled by `dispose`.
    ///
    /// The handle is untracked automatically once it stops being active.
    /// No-op on a disposed bus.
    pub fn track_subscription(&self, subscription: &Subscription) {
        if self.is_disposed() {
            return;
        }
        self.tracked
            .lock()
            .insert(subscription.id(), subscription.clone());

        // A dispose that raced the insert has already drained the map.
        if self.is_disposed() {
            self.tracked.lock().remove(&subscription.id());
            return;
        }

        let owner = Arc::as_ptr(&self.tracked) as *const () as usize;
        let tracked = Arc::downgrade(&self.tracked);
        subscription.on_finish_once(owner, move |id| {
            if let Some(tracked) = tracked.upgrade() {
                tracked.lock().remove(&id);
            }
        });
    }

    /// Stop tracking a subscription. Returns true if it was tracked.
    pub fn untrack_subscription(&self, subscription: &Subscription) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.tracked.lock().remove(&subscription.id()).is_some()
    }

    /// Dispose the bus.
    ///
    /// The first call marks the bus disposed, cancels every tracked
    /// subscription (waiting for each), and closes the channel so every
    /// outstanding stream ends. Later calls do nothing.
    pub async fn dispose(&self) {
        let Some(tracked) = self.begin_dispose() else {
            return;
        };
        for subscription in tracked {
            subscription.cancel().await;
        }
        self.close_channel();
    }

    /// Dispose the bus from synchronous code.
    ///
    /// Same as [`dispose`](Self::dispose) except that tracked subscriptions
    /// are aborted without waiting for their tasks to exit.
    pub fn dispose_now(&self) {
        let Some(tracked) = self.begin_dispose() else {
            return;
        };
        for subscription in tracked {
            subscription.abort();
        }
        self.close_channel();
    }

    /// Get the current configuration
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    fn receiver(&self) -> Option<Inlet> {
        if self.is_disposed() {
            return None;
        }
        self.channel.subscribe()
    }

    /// Flip the disposed flag; returns the tracked handles on the first call.
    fn begin_dispose(&self) -> Option<Vec<Subscription>> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let tracked: Vec<Subscription> = self.tracked.lock().drain().map(|(_, s)| s).collect();
        tracing::debug!(
            "Disposing event bus '{}' ({} tracked subscriptions)",
            self.config.name,
            tracked.len()
        );
        Some(tracked)
    }

    fn close_channel(&self) {
        self.channel.close();
        tracing::debug!("Event bus '{}' disposed", self.config.name);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("disposed", &self.is_disposed())
            .field("subscriptions", &self.subscription_count())
            .field("config", &self.config)
            .finish()
    }
}
