//! Category tags for classifying events.
//!
//! Categories are open-ended: the core defines only the [`Category`]
//! capability and value-based equality for it. Applications supply their
//! own namespaced values (for example `"medical.patient"`), usually as a
//! small enum implementing the trait.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A consumer-defined classification attached to every event.
///
/// Two categories are equal iff their [`value`](Category::value) strings are
/// equal, regardless of their concrete Rust type or display name.
///
/// # Example
/// ```rust
/// use domainbus_core::event_bus::Category;
///
/// #[derive(Debug)]
/// enum Medical {
///     Patient,
///     Appointment,
/// }
///
/// impl Category for Medical {
///     fn value(&self) -> &str {
///         match self {
///             Medical::Patient => "medical.patient",
///             Medical::Appointment => "medical.appointment",
///         }
///     }
///
///     fn display_name(&self) -> &str {
///         match self {
///             Medical::Patient => "Patient",
///             Medical::Appointment => "Appointment",
///         }
///     }
/// }
///
/// assert!(Medical::Patient.belongs_to("medical"));
/// assert!(!Medical::Patient.belongs_to("med"));
/// ```
pub trait Category: fmt::Debug + Send + Sync + 'static {
    /// Unique namespaced value, e.g. `"auth.session"`.
    fn value(&self) -> &str;

    /// Human readable label.
    fn display_name(&self) -> &str;

    /// Dotted-prefix namespace check: `value` starts with `prefix + "."`.
    fn belongs_to(&self, prefix: &str) -> bool {
        self.value()
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

/// Shared, type-erased category as stored inside event envelopes.
pub type CategoryRef = Arc<dyn Category>;

/// Compare two categories by value.
pub fn same_category(a: &dyn Category, b: &dyn Category) -> bool {
    a.value() == b.value()
}

impl PartialEq for dyn Category {
    fn eq(&self, other: &Self) -> bool {
        same_category(self, other)
    }
}

impl Eq for dyn Category {}

impl Hash for dyn Category {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value().hash(state);
    }
}

impl fmt::Display for dyn Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}
