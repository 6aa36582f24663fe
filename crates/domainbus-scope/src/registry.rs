//! Keyed bus registry.
//!
//! One default bus plus any number of named scoped buses. Every key maps to
//! its own [`EventBus`] and therefore its own fan-out channel; events
//! published on one never reach another.

use domainbus_core::types::{thread_safe_rw_map, ThreadSafeRwMap};
use domainbus_core::{EventBus, EventBusConfig, LifecycleScope};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Owner of the default bus and the named scoped buses.
pub struct BusRegistry {
    default: Arc<EventBus>,
    scoped: ThreadSafeRwMap<String, Arc<EventBus>>,
    /// Template for scoped buses; only the name differs.
    template: EventBusConfig,
}

impl BusRegistry {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a registry whose buses use `config`.
    ///
    /// The default bus keeps `config.name`; scoped buses are named after
    /// their key.
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            default: Arc::new(EventBus::with_config(config.clone())),
            scoped: thread_safe_rw_map(),
            template: config,
        }
    }

    /// The default bus.
    pub fn default_bus(&self) -> &Arc<EventBus> {
        &self.default
    }

    /// The scoped bus for `name`, created on first use.
    ///
    /// A bus that has been disposed is replaced by a fresh one.
    pub fn scoped(&self, name: &str) -> Arc<EventBus> {
        if let Some(bus) = self.get_scoped(name) {
            return bus;
        }

        let mut scoped = self.scoped.write();
        if let Some(bus) = scoped.get(name) {
            if !bus.is_disposed() {
                return Arc::clone(bus);
            }
        }
        let bus = Arc::new(EventBus::with_config(EventBusConfig {
            name: name.to_string(),
            ..self.template.clone()
        }));
        scoped.insert(name.to_string(), Arc::clone(&bus));
        tracing::debug!("Scoped event bus '{}' created", name);
        bus
    }

    /// The live scoped bus for `name`, without creating one.
    pub fn get_scoped(&self, name: &str) -> Option<Arc<EventBus>> {
        self.scoped
            .read()
            .get(name)
            .filter(|bus| !bus.is_disposed())
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_scoped(name).is_some()
    }

    /// Names of the live scoped buses, sorted.
    pub fn scope_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .scoped
            .read()
            .iter()
            .filter(|(_, bus)| !bus.is_disposed())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Remove and dispose the scoped bus for `name`.
    ///
    /// Returns false when no such bus was registered.
    pub async fn dispose_scope(&self, name: &str) -> bool {
        let removed = self.scoped.write().remove(name);
        match removed {
            Some(bus) => {
                bus.dispose().await;
                true
            }
            None => false,
        }
    }

    /// Dispose every scoped bus, then the default bus.
    pub async fn dispose_all(&self) {
        let buses: Vec<Arc<EventBus>> = self.scoped.write().drain().map(|(_, bus)| bus).collect();
        for bus in buses {
            bus.dispose().await;
        }
        self.default.dispose().await;
    }

    /// The scoped bus for `name`, disposed and removed when `scope` ends.
    pub fn bind_scope(&self, name: &str, scope: &dyn LifecycleScope) -> Arc<EventBus> {
        let bus = self.scoped(name);
        let scoped = Arc::downgrade(&self.scoped);
        let owned = Arc::clone(&bus);
        let key = name.to_string();

        scope.on_end(Box::new(move || {
            if let Some(scoped) = scoped.upgrade() {
                let mut scoped = scoped.write();
                if scoped.get(&key).is_some_and(|bus| Arc::ptr_eq(bus, &owned)) {
                    scoped.remove(&key);
                }
            }
            owned.dispose_now();
        }));
        bus
    }
}

impl Default for BusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BusRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusRegistry")
            .field("default", &self.default)
            .field("scopes", &self.scope_names())
            .finish()
    }
}

// ============================================================================
// Global Registry Instance
// ============================================================================

static REGISTRY: OnceLock<BusRegistry> = OnceLock::new();

/// Get or initialize the process-wide registry.
pub fn registry() -> &'static BusRegistry {
    REGISTRY.get_or_init(BusRegistry::new)
}

/// Initialize the process-wide registry with custom configuration
///
/// Must be called before any calls to `registry()` or `event_bus()`. Returns
/// the rejected configuration if the registry has already been initialized.
pub fn init_registry(config: EventBusConfig) -> Result<(), EventBusConfig> {
    REGISTRY
        .set(BusRegistry::with_config(config))
        .map_err(|registry| registry.template)
}

/// The default bus of the process-wide registry.
pub fn event_bus() -> &'static EventBus {
    registry().default_bus()
}

/// Convenience macro to publish an event on the global default bus
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::registry::event_bus().publish($event)
    };
}

/// Convenience macro to subscribe to one event type on the global default bus
#[macro_export]
macro_rules! on_event {
    ($ty:ty, $handler:expr) => {
        $crate::registry::event_bus()
            .of_type::<$ty>()
            .subscribe($handler)
    };
}
