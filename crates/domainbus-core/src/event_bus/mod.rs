//! # Event Bus Module
//!
//! Typed in-process publish/subscribe for domain events.
//!
//! ## Overview
//!
//! - Publishers hand events to [`EventBus::publish`] without knowing who listens
//! - Subscribers take a typed view (`of_type`, `on`, `all_events`), optionally
//!   shape it with operators, and attach an async handler
//! - Handler failures are reported per subscription and never reach other
//!   subscribers or the publisher
//!
//! ## Usage
//!
//! ```rust,ignore
//! use domainbus_core::event_bus::{AdvancedEventBus, EventBus};
//!
//! let bus = EventBus::new();
//!
//! let subscription = bus
//!     .of_type::<OrderCreated>()
//!     .listen(|order: Arc<OrderCreated>| async move {
//!         println!("order {} created", order.order_id);
//!         Ok(())
//!     })
//!     .on_handler_error(|err| eprintln!("{err}"))
//!     .spawn();
//!
//! bus.publish(OrderCreated::new("o-1", 42.0));
//!
//! // Batches of order events every 100ms
//! let batches = bus.buffer::<OrderCreated>(Duration::from_millis(100));
//!
//! subscription.cancel().await;
//! bus.dispose().await;
//! ```

mod bus;
mod category;
mod channel;
mod events;
mod operators;
mod stream;
mod subscription;

pub use bus::*;
pub use category::*;
pub use events::*;
pub use operators::*;
pub use stream::*;
pub use subscription::*;
