//! A concrete lifecycle scope.
//!
//! [`DisposeScope`] collects cleanups and runs them when it ends, either
//! explicitly through [`DisposeScope::end`] or when it is dropped. It is the
//! stand-in for a component unmount or a container teardown.

use domainbus_core::error::panic_message;
use domainbus_core::{Cleanup, LifecycleScope};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

/// Runs registered cleanups once, in reverse registration order.
pub struct DisposeScope {
    name: String,
    cleanups: Mutex<Vec<Cleanup>>,
    ended: AtomicBool,
}

impl DisposeScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cleanups: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Number of cleanups waiting for the scope to end.
    pub fn pending(&self) -> usize {
        self.cleanups.lock().len()
    }

    /// End the scope.
    ///
    /// Cleanups run newest first. A panicking cleanup is logged and the
    /// remaining ones still run. Later calls do nothing.
    pub fn end(&self) {
        let cleanups = {
            let mut cleanups = self.cleanups.lock();
            if self.ended.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *cleanups)
        };

        tracing::debug!("Scope '{}' ending, {} cleanups", self.name, cleanups.len());
        for cleanup in cleanups.into_iter().rev() {
            run_cleanup(&self.name, cleanup);
        }
    }
}

fn run_cleanup(scope: &str, cleanup: Cleanup) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(cleanup)) {
        tracing::warn!(
            "Cleanup in scope '{}' panicked: {}",
            scope,
            panic_message(payload.as_ref())
        );
    }
}

impl LifecycleScope for DisposeScope {
    /// Register `cleanup`; runs it right away if the scope already ended.
    fn on_end(&self, cleanup: Cleanup) {
        {
            let mut cleanups = self.cleanups.lock();
            if !self.ended.load(Ordering::SeqCst) {
                cleanups.push(cleanup);
                return;
            }
        }
        run_cleanup(&self.name, cleanup);
    }
}

impl Drop for DisposeScope {
    fn drop(&mut self) {
        self.end();
    }
}

impl fmt::Debug for DisposeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposeScope")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .field("ended", &self.is_ended())
            .finish()
    }
}
