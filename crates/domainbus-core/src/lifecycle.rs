//! Binding subscriptions to an owner's lifetime.
//!
//! The bus does not know about UI components or DI containers. Whatever owns
//! a subscription supplies a [`LifecycleScope`], the capability "run this
//! cleanup when I end", and the helpers here use it to cancel subscriptions
//! exactly once.
//!
//! [`DependentSubscription`] covers the other half of the contract: a
//! subscription that is torn down and recreated whenever an explicit list of
//! dependency values changes.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::event_bus::Subscription;
use crate::types::Cleanup;

/// Registration facility for cleanups that run when a scope ends.
pub trait LifecycleScope: Send + Sync {
    /// Register `cleanup` to run once when the scope ends.
    fn on_end(&self, cleanup: Cleanup);
}

impl<F> LifecycleScope for F
where
    F: Fn(Cleanup) + Send + Sync,
{
    fn on_end(&self, cleanup: Cleanup) {
        (self)(cleanup)
    }
}

/// Cancel `subscription` when `scope` ends.
pub fn bind_to_scope(scope: &dyn LifecycleScope, subscription: &Subscription) {
    let subscription = subscription.clone();
    scope.on_end(Box::new(move || subscription.abort()));
}

/// Shallow comparison of two dependency lists.
///
/// Lists of different length always differ.
pub fn deps_changed<D: PartialEq>(old: &[D], new: &[D]) -> bool {
    old != new
}

type SubscriptionFactory<D> = Box<dyn FnMut(&[D]) -> Subscription + Send>;

struct DependentState<D> {
    deps: Vec<D>,
    factory: SubscriptionFactory<D>,
    current: Option<Subscription>,
    closed: bool,
}

/// A subscription recreated whenever its dependency list changes.
///
/// # Example
/// ```rust,ignore
/// let orders = DependentSubscription::new(vec![customer_id], move |deps| {
///     let customer = deps[0].clone();
///     bus.of_type_where::<OrderCreated, _>(move |o| o.customer == customer)
///         .subscribe(render_order)
/// });
///
/// // Cancels the old subscription and creates a new one.
/// orders.update(vec![other_customer]);
/// ```
pub struct DependentSubscription<D> {
    state: Mutex<DependentState<D>>,
}

impl<D> DependentSubscription<D>
where
    D: PartialEq + Clone + Send + 'static,
{
    /// Create the first subscription from `deps` immediately.
    pub fn new<F>(deps: Vec<D>, factory: F) -> Self
    where
        F: FnMut(&[D]) -> Subscription + Send + 'static,
    {
        let mut factory: SubscriptionFactory<D> = Box::new(factory);
        let current = factory(&deps);
        Self {
            state: Mutex::new(DependentState {
                deps,
                factory,
                current: Some(current),
                closed: false,
            }),
        }
    }

    /// Apply a new dependency list.
    ///
    /// When it differs from the current one, the active subscription is
    /// cancelled and a new one is created. Returns true if that happened.
    /// Does nothing once [`cancel`](Self::cancel) has been called.
    pub fn update(&self, deps: Vec<D>) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed || !deps_changed(&state.deps, &deps) {
            return false;
        }

        if let Some(old) = state.current.take() {
            old.abort();
        }
        state.deps = deps;
        state.current = Some((state.factory)(&state.deps));
        tracing::debug!("Dependencies changed, subscription recreated");
        true
    }

    /// Cancel the active subscription and stop reacting to updates.
    pub fn cancel(&self) {
        let current = {
            let mut state = self.state.lock();
            state.closed = true;
            state.current.take()
        };
        if let Some(subscription) = current {
            subscription.abort();
        }
    }

    /// The active subscription, if not cancelled.
    pub fn current(&self) -> Option<Subscription> {
        self.state.lock().current.clone()
    }

    pub fn deps(&self) -> Vec<D> {
        self.state.lock().deps.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Cancel whichever subscription is active when `scope` ends.
    pub fn bind_to_scope(self: &Arc<Self>, scope: &dyn LifecycleScope) {
        let this = Arc::clone(self);
        scope.on_end(Box::new(move || this.cancel()));
    }
}

impl<D: fmt::Debug> fmt::Debug for DependentSubscription<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DependentSubscription")
            .field("deps", &state.deps)
            .field("current", &state.current)
            .field("closed", &state.closed)
            .finish()
    }
}
