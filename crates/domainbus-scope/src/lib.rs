//! # domainbus scope
//!
//! The owner side of the bus: a keyed registry holding the default bus and
//! named scoped buses, the process-wide registry accessors, and
//! [`DisposeScope`], a lifecycle scope that runs cleanups when it ends.
//!
//! ```rust,ignore
//! use domainbus_scope::{emit, registry, DisposeScope};
//! use domainbus_core::bind_to_scope;
//!
//! let screen = DisposeScope::new("orders-screen");
//! let bus = registry().bind_scope("orders", &screen);
//!
//! let subscription = bus.of_type::<OrderCreated>().subscribe(render_order);
//! bind_to_scope(&screen, &subscription);
//!
//! emit!(AppStarted::new());
//!
//! // Cancels the subscription, then disposes the "orders" bus.
//! screen.end();
//! ```

pub mod registry;
pub mod scope;

pub use registry::{event_bus, init_registry, registry, BusRegistry};
pub use scope::DisposeScope;
