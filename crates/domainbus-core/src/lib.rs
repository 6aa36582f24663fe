//! # domainbus core
//!
//! Typed in-process publish/subscribe for domain events.
//! Provides the event record and category model, the lossless fan-out
//! event bus, composable stream operators, subscription handles, and the
//! lifecycle binding contract used by scope owners.

pub mod error;
pub mod event_bus;
pub mod lifecycle;
pub mod types;

pub use error::{HandlerError, StreamError};

// Re-export event bus for convenience
pub use event_bus::{
    downcast_event, generate_event_id, AdvancedEventBus, Category, CategoryRef, DomainEvent,
    EventBus, EventBusConfig, EventEnvelope, EventHandler, EventStream, SharedEvent,
    Subscription, SubscriptionBuilder, SubscriptionId,
};

pub use lifecycle::{bind_to_scope, deps_changed, DependentSubscription, LifecycleScope};

// Re-export type aliases for convenience
pub use types::{
    thread_safe_map, thread_safe_rw_map, BoxedSendError, Cleanup, SharedCallback, ThreadSafeMap,
    ThreadSafeRwMap,
};
