//! Type aliases for commonly used complex types.
//!
//! Gives readable names to the lock and callback shapes shared by the bus,
//! the subscription handles and the scope crate.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use domainbus_core::types::*;
//!
//! // Instead of: Arc<Mutex<HashMap<SubscriptionId, Subscription>>>
//! let tracked: ThreadSafeMap<SubscriptionId, Subscription> = thread_safe_map();
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// THREAD-SAFE SHARED MAPS (Arc<Mutex<HashMap>> / Arc<RwLock<HashMap>>)
// =============================================================================

/// A thread-safe hash map for cross-task key-value storage.
///
/// Uses `parking_lot::Mutex`; guards are never held across an `.await`.
pub type ThreadSafeMap<K, V> = Arc<Mutex<HashMap<K, V>>>;

/// A thread-safe reader-writer hash map for read-heavy lookups.
pub type ThreadSafeRwMap<K, V> = Arc<RwLock<HashMap<K, V>>>;

// =============================================================================
// CALLBACK TYPES
// =============================================================================

/// A shared callback that receives a single parameter.
///
/// Cloned into spawned listener tasks, hence `Arc` rather than `Box`.
pub type SharedCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A one-shot cleanup action run when a lifecycle scope ends.
pub type Cleanup = Box<dyn FnOnce() + Send>;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// A boxed error that can cross task boundaries.
pub type BoxedSendError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Create a new empty `ThreadSafeMap<K, V>`.
#[inline]
pub fn thread_safe_map<K, V>() -> ThreadSafeMap<K, V> {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Create a new empty `ThreadSafeRwMap<K, V>`.
#[inline]
pub fn thread_safe_rw_map<K, V>() -> ThreadSafeRwMap<K, V> {
    Arc::new(RwLock::new(HashMap::new()))
}
