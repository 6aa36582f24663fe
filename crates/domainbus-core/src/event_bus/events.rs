//! Event record definitions for the event bus.
//!
//! Concrete events are plain Rust structs owned by the application. Each one
//! embeds an [`EventEnvelope`] carrying the identifying fields and implements
//! [`DomainEvent`]. Dispatch on the bus is by concrete Rust type, never by
//! the `event_type` string.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::category::{Category, CategoryRef};

/// JSON keys reserved by the envelope. Payload fields never overwrite them.
pub const RESERVED_KEYS: [&str; 5] = ["eventType", "category", "occurredAt", "eventId", "metadata"];

/// An event as it travels through the broadcast channel.
pub type SharedEvent = Arc<dyn DomainEvent>;

/// Generate a fresh event id.
///
/// Ids are random UUID v4 strings, so events built in the same instant
/// still get distinct ids.
pub fn generate_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Identifying and common fields shared by every event.
///
/// Equality compares `(event_type, event_id, occurred_at)`. Category and
/// metadata do not take part, so two separately built envelopes with the
/// same identity are interchangeable for de-duplication.
#[derive(Clone)]
pub struct EventEnvelope {
    event_type: String,
    category: CategoryRef,
    occurred_at: DateTime<Utc>,
    event_id: String,
    metadata: Map<String, Value>,
}

impl EventEnvelope {
    /// Create an envelope stamped with the current time and a generated id.
    pub fn new(event_type: impl Into<String>, category: impl Category) -> Self {
        Self::with_category_ref(event_type, Arc::new(category))
    }

    /// Create an envelope from an already shared category.
    pub fn with_category_ref(event_type: impl Into<String>, category: CategoryRef) -> Self {
        Self {
            event_type: event_type.into(),
            category,
            occurred_at: Utc::now(),
            event_id: generate_event_id(),
            metadata: Map::new(),
        }
    }

    /// Use a caller-supplied id instead of the generated one.
    pub fn with_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// Use a caller-supplied timestamp instead of the construction time.
    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn category(&self) -> &CategoryRef {
        &self.category
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }
}

impl PartialEq for EventEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.event_type == other.event_type
            && self.event_id == other.event_id
            && self.occurred_at == other.occurred_at
    }
}

impl Eq for EventEnvelope {}

impl fmt::Debug for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEnvelope")
            .field("event_type", &self.event_type)
            .field("category", &self.category.value())
            .field("occurred_at", &self.occurred_at)
            .field("event_id", &self.event_id)
            .finish()
    }
}

/// Runtime type access used for type-indexed dispatch.
///
/// Blanket implemented for every `'static` type; never implement it by hand.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// An immutable domain event record.
///
/// # Example
/// ```rust
/// use domainbus_core::event_bus::{Category, DomainEvent, EventEnvelope};
/// use serde_json::{json, Map, Value};
///
/// #[derive(Debug)]
/// struct Auth;
///
/// impl Category for Auth {
///     fn value(&self) -> &str { "auth" }
///     fn display_name(&self) -> &str { "Authentication" }
/// }
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct UserRegistered {
///     envelope: EventEnvelope,
///     user_id: String,
/// }
///
/// impl DomainEvent for UserRegistered {
///     fn envelope(&self) -> &EventEnvelope {
///         &self.envelope
///     }
///
///     fn payload(&self) -> Map<String, Value> {
///         let mut map = Map::new();
///         map.insert("userId".into(), json!(self.user_id));
///         map
///     }
/// }
///
/// let event = UserRegistered {
///     envelope: EventEnvelope::new("user.registered", Auth).with_id("evt-1"),
///     user_id: "u1".into(),
/// };
/// let json = event.to_json();
/// assert_eq!(json["eventType"], "user.registered");
/// assert_eq!(json["category"], "auth");
/// assert_eq!(json["userId"], "u1");
/// ```
pub trait DomainEvent: AsAny + fmt::Debug {
    /// The identifying fields of this event.
    fn envelope(&self) -> &EventEnvelope;

    /// Variant-specific fields, flattened into [`to_json`](DomainEvent::to_json).
    fn payload(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Open key-value metadata. Defaults to the envelope's map.
    fn metadata(&self) -> Map<String, Value> {
        self.envelope().metadata().clone()
    }

    fn event_type(&self) -> &str {
        self.envelope().event_type()
    }

    fn category(&self) -> &CategoryRef {
        self.envelope().category()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.envelope().timestamp()
    }

    fn event_id(&self) -> &str {
        self.envelope().event_id()
    }

    /// Serialize to the stable JSON shape:
    /// `{ eventType, category, occurredAt, eventId, metadata, ...payload }`.
    fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("eventType".into(), Value::String(self.event_type().to_string()));
        map.insert(
            "category".into(),
            Value::String(self.category().value().to_string()),
        );
        map.insert(
            "occurredAt".into(),
            Value::String(format_timestamp(self.occurred_at())),
        );
        map.insert("eventId".into(), Value::String(self.event_id().to_string()));
        map.insert("metadata".into(), Value::Object(self.metadata()));
        for (key, value) in self.payload() {
            if RESERVED_KEYS.contains(&key.as_str()) {
                tracing::warn!(
                    "payload field '{}' of {} collides with an envelope key, skipped",
                    key,
                    self.event_type()
                );
                continue;
            }
            map.insert(key, value);
        }
        Value::Object(map)
    }
}

/// Format a timestamp the way [`DomainEvent::to_json`] does:
/// UTC, millisecond precision, `Z` suffix.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Downcast a shared event to its concrete type.
///
/// Returns `None` when the event is not an instance of `T`.
pub fn downcast_event<T: DomainEvent>(event: &SharedEvent) -> Option<Arc<T>> {
    if !(**event).as_any().is::<T>() {
        return None;
    }
    <dyn DomainEvent as AsAny>::into_any_arc(Arc::clone(event))
        .downcast::<T>()
        .ok()
}
