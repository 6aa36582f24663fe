//! The broadcast channel behind every bus.
//!
//! A fan-out over unbounded per-stream queues. `send` appends the event to
//! every attached queue under one lock, so all streams observe the same
//! publish order and no stream ever loses an event because another one is
//! slow or because unrelated traffic was published in between.
//!
//! Each event is stamped with its publish time. Time-based operators
//! (`throttle`, `buffer`) work on that stamp, not on the time a consumer
//! happens to read the event.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::events::SharedEvent;

/// An event together with the moment it was published.
#[derive(Debug, Clone)]
pub(crate) struct Published {
    pub(crate) at: Instant,
    pub(crate) event: SharedEvent,
}

struct Outlet {
    tx: mpsc::UnboundedSender<Published>,
    backlog: Arc<AtomicUsize>,
}

/// Receiving end handed to one stream.
pub(crate) struct Inlet {
    rx: mpsc::UnboundedReceiver<Published>,
    backlog: Arc<AtomicUsize>,
}

impl Inlet {
    /// Next published event; `None` once the channel is closed and drained.
    pub(crate) async fn recv(&mut self) -> Option<Published> {
        let published = self.rx.recv().await?;
        self.backlog.fetch_sub(1, Ordering::Relaxed);
        Some(published)
    }
}

pub(crate) struct BroadcastChannel {
    /// `None` once closed.
    outlets: Mutex<Option<Vec<Outlet>>>,
    /// Backlog size at which a slow stream is reported.
    backlog_warning: usize,
    name: String,
}

impl BroadcastChannel {
    pub(crate) fn new(name: impl Into<String>, backlog_warning: usize) -> Self {
        Self {
            outlets: Mutex::new(Some(Vec::new())),
            backlog_warning: backlog_warning.max(1),
            name: name.into(),
        }
    }

    /// Attach a new queue. Returns `None` when the channel is closed.
    pub(crate) fn subscribe(&self) -> Option<Inlet> {
        let mut outlets = self.outlets.lock();
        let outlets = outlets.as_mut()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        outlets.push(Outlet {
            tx,
            backlog: Arc::clone(&backlog),
        });
        Some(Inlet { rx, backlog })
    }

    /// Stamp `event` and append it to every live queue.
    ///
    /// Returns the number of queues that received it.
    pub(crate) fn send(&self, event: SharedEvent) -> usize {
        let mut outlets = self.outlets.lock();
        let Some(outlets) = outlets.as_mut() else {
            return 0;
        };

        let published = Published {
            at: Instant::now(),
            event,
        };
        outlets.retain(|outlet| !outlet.tx.is_closed());
        for outlet in outlets.iter() {
            let backlog = outlet.backlog.fetch_add(1, Ordering::Relaxed) + 1;
            if backlog == self.backlog_warning {
                tracing::warn!(
                    "Stream on bus '{}' is {} events behind",
                    self.name,
                    backlog
                );
            }
            if outlet.tx.send(published.clone()).is_err() {
                outlet.backlog.fetch_sub(1, Ordering::Relaxed);
            }
        }
        outlets.len()
    }

    /// Close the channel. Queued events stay readable; then every stream ends.
    pub(crate) fn close(&self) {
        self.outlets.lock().take();
    }

    pub(crate) fn receiver_count(&self) -> usize {
        self.outlets
            .lock()
            .as_ref()
            .map_or(0, |outlets| outlets.iter().filter(|o| !o.tx.is_closed()).count())
    }
}
