//! # domainbus
//!
//! A typed in-process publish/subscribe bus for immutable domain events.
//!
//! ## Architecture
//!
//! domainbus is organized as a workspace with two crates:
//!
//! 1. **domainbus-core** - Event records, categories, the lossless fan-out
//!    bus, stream operators, subscription handles, lifecycle binding
//! 2. **domainbus-scope** - Keyed bus registry (default and scoped buses),
//!    global accessors and `DisposeScope`
//!
//! ## Features
//!
//! - **Type dispatch**: subscribe by concrete event type, optionally by category
//! - **Operators**: predicate filter, leading-edge throttle, time-window buffer,
//!   consecutive-duplicate suppression
//! - **Isolation**: a failing handler only affects its own subscription
//! - **Safe teardown**: a disposed bus ignores publishes and hands out empty streams

pub use domainbus_core::{error, event_bus, lifecycle, types};
pub use domainbus_scope::scope;

pub use domainbus_core::{
    bind_to_scope, deps_changed, downcast_event, generate_event_id, AdvancedEventBus, Category,
    CategoryRef, Cleanup, DependentSubscription, DomainEvent, EventBus, EventBusConfig,
    EventEnvelope, EventHandler, EventStream, HandlerError, LifecycleScope, SharedEvent,
    StreamError, Subscription, SubscriptionBuilder, SubscriptionId,
};

pub use domainbus_scope::{
    emit, event_bus, init_registry, on_event, registry, BusRegistry, DisposeScope,
};
