//! Subscription handles and the listener loop behind them.
//!
//! ## Architecture
//! ```text
//! EventStream<T> ──► listener task ──► handler.handle(event)
//!                        │                 ├─ Err   → on_handler_error, warn!
//!                        │                 └─ panic → on_handler_error, warn!
//!                        ├─ Err(StreamError) → on_stream_error
//!                        └─ end of stream → finish hooks, on_done
//! ```
//!
//! ## Rules
//! - **Isolation**: each subscription runs on its own task with its own
//!   receiver; a failing handler never affects sibling subscriptions and
//!   never ends its own stream.
//! - **Per-subscription FIFO**: events reach the handler one at a time, in
//!   publish order.
//! - **Cancellation drops in-flight events**: after [`Subscription::abort`]
//!   no further handler call starts. A handler that is already running is
//!   interrupted at its next await point.
//! - **Idempotent**: `abort` and `cancel` may be called any number of times,
//!   from any clone, before or after the source bus is disposed.

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

use super::stream::EventStream;
use crate::error::{panic_message, HandlerError, StreamError};
use crate::types::{Cleanup, SharedCallback};

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Callback invoked when a handler fails.
pub type HandlerErrorCallback = Arc<dyn Fn(&HandlerError) + Send + Sync>;

type FinishHook = Box<dyn FnOnce(SubscriptionId) + Send>;

/// Finish hook plus the key of the owner that registered it.
type KeyedHook = (usize, FinishHook);

/// Asynchronous event callback.
///
/// Implemented for any `Fn(T) -> impl Future<Output = anyhow::Result<()>>`,
/// so most subscribers are plain closures.
#[async_trait]
pub trait EventHandler<T>: Send + Sync {
    async fn handle(&self, event: T) -> anyhow::Result<()>;
}

#[async_trait]
impl<T, F, Fut> EventHandler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: T) -> anyhow::Result<()> {
        (self)(event).await
    }
}

struct SubscriptionInner {
    id: SubscriptionId,
    name: Option<String>,
    cancelled: AtomicBool,
    finished: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    abort: Mutex<Option<AbortHandle>>,
    hooks: Mutex<Vec<KeyedHook>>,
}

impl SubscriptionInner {
    fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }

    /// Mark the subscription as no longer active and run finish hooks once.
    fn finish(&self) {
        let hooks = {
            let mut hooks = self.hooks.lock();
            if self.finished.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *hooks)
        };
        for (_, hook) in hooks {
            hook(self.id);
        }
    }
}

/// Cancellable handle to one active listener.
///
/// Cheap to clone; all clones control the same listener. Dropping the
/// handles detaches from the listener without cancelling it.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// True until the listener completes naturally or is cancelled.
    pub fn is_active(&self) -> bool {
        !self.inner.finished.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel without waiting for the listener task to exit.
    ///
    /// Safe to call from synchronous teardown code and from inside the
    /// subscription's own handler.
    pub fn abort(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.abort.lock().as_ref() {
            handle.abort();
        }
        self.inner.finish();
        tracing::debug!("Subscription {} cancelled", self.inner.label());
    }

    /// Cancel and wait until the listener task has exited.
    pub async fn cancel(&self) {
        self.abort();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            // Awaiting our own task from inside the handler would never return.
            if tokio::task::try_id() != Some(task.id()) {
                let _ = task.await;
            }
        }
    }

    /// Run `hook` once the subscription stops being active.
    ///
    /// At most one hook per `owner` is kept; registering again under the
    /// same key is a no-op. Runs immediately when the subscription has
    /// already finished.
    pub(crate) fn on_finish_once(
        &self,
        owner: usize,
        hook: impl FnOnce(SubscriptionId) + Send + 'static,
    ) {
        let mut hooks = self.inner.hooks.lock();
        if self.inner.finished.load(Ordering::SeqCst) {
            drop(hooks);
            hook(self.inner.id);
            return;
        }
        if hooks.iter().any(|(key, _)| *key == owner) {
            return;
        }
        hooks.push((owner, Box::new(hook)));
    }

    #[cfg(test)]
    pub(crate) fn hook_count(&self) -> usize {
        self.inner.hooks.lock().len()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("active", &self.is_active())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Configures and starts a listener over an [`EventStream`].
///
/// # Example
/// ```rust,ignore
/// let subscription = bus
///     .of_type::<OrderCreated>()
///     .listen(|order: Arc<OrderCreated>| async move {
///         println!("order {}", order.order_id);
///         Ok(())
///     })
///     .name("order-printer")
///     .on_handler_error(|err| eprintln!("{err}"))
///     .spawn();
/// ```
pub struct SubscriptionBuilder<T> {
    stream: EventStream<T>,
    handler: Arc<dyn EventHandler<T>>,
    name: Option<String>,
    on_handler_error: Option<HandlerErrorCallback>,
    on_stream_error: Option<SharedCallback<StreamError>>,
    on_done: Option<Cleanup>,
}

impl<T: Send + 'static> SubscriptionBuilder<T> {
    /// Name used in logs and handler errors.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Called whenever the handler returns an error or panics.
    pub fn on_handler_error(mut self, f: impl Fn(&HandlerError) + Send + Sync + 'static) -> Self {
        self.on_handler_error = Some(Arc::new(f));
        self
    }

    /// Called for errors produced by the stream itself (failed stages).
    pub fn on_stream_error(mut self, f: impl Fn(StreamError) + Send + Sync + 'static) -> Self {
        self.on_stream_error = Some(Arc::new(f));
        self
    }

    /// Called once when the stream completes naturally (not on cancel).
    pub fn on_done(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    /// Spawn the listener task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self) -> Subscription {
        let inner = Arc::new(SubscriptionInner {
            id: SubscriptionId::new(),
            name: self.name,
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            task: Mutex::new(None),
            abort: Mutex::new(None),
            hooks: Mutex::new(Vec::new()),
        });

        let listener = Listener {
            inner: Arc::clone(&inner),
            handler: self.handler,
            on_handler_error: self.on_handler_error,
            on_stream_error: self.on_stream_error,
        };
        let task = tokio::spawn(listener.run(self.stream, self.on_done));

        *inner.abort.lock() = Some(task.abort_handle());
        *inner.task.lock() = Some(task);
        tracing::debug!("Subscription {} added", inner.label());

        Subscription { inner }
    }
}

impl<T: Send + 'static> EventStream<T> {
    /// Start configuring a listener for this stream.
    pub fn listen<H>(self, handler: H) -> SubscriptionBuilder<T>
    where
        H: EventHandler<T> + 'static,
    {
        SubscriptionBuilder {
            stream: self,
            handler: Arc::new(handler),
            name: None,
            on_handler_error: None,
            on_stream_error: None,
            on_done: None,
        }
    }

    /// Shorthand for `listen(handler).spawn()`.
    pub fn subscribe<H>(self, handler: H) -> Subscription
    where
        H: EventHandler<T> + 'static,
    {
        self.listen(handler).spawn()
    }
}

struct Listener<T> {
    inner: Arc<SubscriptionInner>,
    handler: Arc<dyn EventHandler<T>>,
    on_handler_error: Option<HandlerErrorCallback>,
    on_stream_error: Option<SharedCallback<StreamError>>,
}

impl<T: Send + 'static> Listener<T> {
    async fn run(self, mut stream: EventStream<T>, on_done: Option<Cleanup>) {
        while let Some(item) = stream.next().await {
            if self.inner.cancelled.load(Ordering::SeqCst) {
                return;
            }
            match item {
                Ok(event) => self.deliver(event).await,
                Err(err) => {
                    tracing::debug!("Subscription {} stream error: {}", self.inner.label(), err);
                    if let Some(callback) = &self.on_stream_error {
                        callback(err);
                    }
                }
            }
        }

        if self.inner.cancelled.load(Ordering::SeqCst) {
            return;
        }
        self.inner.finish();
        tracing::debug!("Subscription {} completed", self.inner.label());
        if let Some(on_done) = on_done {
            on_done();
        }
    }

    async fn deliver(&self, event: T) {
        let outcome = AssertUnwindSafe(self.handler.handle(event))
            .catch_unwind()
            .await;

        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(source)) => HandlerError::Failed {
                subscription: self.inner.label(),
                source: source.into(),
            },
            Err(payload) => HandlerError::Panicked {
                subscription: self.inner.label(),
                message: panic_message(payload.as_ref()),
            },
        };

        tracing::warn!("{}", error);
        if let Some(callback) = &self.on_handler_error {
            callback(&error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn numbers(items: Vec<Result<u32, StreamError>>) -> EventStream<u32> {
        EventStream::new(stream::iter(items))
    }

    #[test]
    fn test_subscription_id_display() {
        let id = SubscriptionId::new();
        let shown = id.to_string();
        assert!(shown.starts_with("Sub("));
        assert_eq!(shown.len(), "Sub(".len() + 8 + 1);
    }

    #[tokio::test]
    async fn test_handler_receives_all_items_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let subscription = numbers(vec![Ok(1), Ok(2), Ok(3)])
            .listen(move |n: u32| {
                let tx = tx.clone();
                async move {
                    tx.send(n)?;
                    anyhow::Ok(())
                }
            })
            .on_done(move || {
                let _ = done_tx.send(());
            })
            .spawn();

        done_rx.await.unwrap();
        let mut seen = Vec::new();
        while let Ok(n) = rx.try_recv() {
            seen.push(n);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(!subscription.is_active());
        assert!(!subscription.is_cancelled());
    }

    #[tokio::test]
    async fn test_handler_errors_and_panics_are_isolated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler_errors = Arc::new(Mutex::new(Vec::new()));
        let stream_errors = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let calls_clone = calls.clone();
        let errors_clone = handler_errors.clone();
        let stream_errors_clone = stream_errors.clone();
        numbers(vec![Ok(1), Ok(2), Ok(3), Ok(4)])
            .listen(move |n: u32| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        2 => anyhow::bail!("rejected {}", n),
                        3 => panic!("exploded on {}", n),
                        _ => Ok(()),
                    }
                }
            })
            .name("fragile")
            .on_handler_error(move |err| errors_clone.lock().push(err.to_string()))
            .on_stream_error(move |_| {
                stream_errors_clone.fetch_add(1, Ordering::SeqCst);
            })
            .on_done(move || {
                let _ = done_tx.send(());
            })
            .spawn();

        done_rx.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(stream_errors.load(Ordering::SeqCst), 0);
        assert_eq!(
            *handler_errors.lock(),
            vec![
                "Handler 'fragile' failed: rejected 2".to_string(),
                "Handler 'fragile' panicked: exploded on 3".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_errors_reach_stream_error_callback() {
        let stream_errors = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let errors_clone = stream_errors.clone();
        numbers(vec![
            Ok(1),
            Err(StreamError::StagePanicked {
                stage: "filter",
                message: "bad predicate".to_string(),
            }),
            Ok(2),
        ])
        .listen(|_n: u32| async { anyhow::Ok(()) })
        .on_stream_error(move |err| errors_clone.lock().push(err))
        .on_done(move || {
            let _ = done_tx.send(());
        })
        .spawn();

        done_rx.await.unwrap();
        assert_eq!(stream_errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_stops_delivery() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let source = EventStream::new(
            tokio_stream_from(rx).map(Ok::<u32, StreamError>),
        );
        let subscription = source.subscribe(move |_n: u32| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { anyhow::Ok(()) }
        });

        tx.send(1).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        subscription.cancel().await;
        subscription.cancel().await;
        subscription.clone().abort();
        assert!(subscription.is_cancelled());
        assert!(!subscription.is_active());

        let _ = tx.send(2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finish_hook_runs_once_and_immediately_when_finished() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let source = EventStream::new(tokio_stream_from(rx).map(Ok::<u32, StreamError>));
        let subscription = source.subscribe(|_n: u32| async { anyhow::Ok(()) });

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        subscription.on_finish_once(1, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        drop(tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        subscription.abort();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let late = hits.clone();
        subscription.on_finish_once(1, move |_| {
            late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keyed_finish_hook_registers_once_per_owner() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let source = EventStream::new(tokio_stream_from(rx).map(Ok::<u32, StreamError>));
        let subscription = source.subscribe(|_n: u32| async { anyhow::Ok(()) });

        let hits = Arc::new(AtomicUsize::new(0));
        for owner in [1, 1, 2, 1] {
            let hits = hits.clone();
            subscription.on_finish_once(owner, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(subscription.hook_count(), 2);

        drop(tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(subscription.hook_count(), 0);
    }

    #[tokio::test]
    async fn test_handler_may_cancel_its_own_subscription() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let source = EventStream::new(tokio_stream_from(rx).map(Ok::<u32, StreamError>));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let slot_clone = slot.clone();
        let calls_clone = calls.clone();
        let subscription = source.subscribe(move |_n: u32| {
            let slot = slot_clone.clone();
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                let current = slot.lock().clone();
                if let Some(current) = current {
                    current.cancel().await;
                }
                anyhow::Ok(())
            }
        });
        *slot.lock() = Some(subscription.clone());

        tx.send(1).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = tx.send(2);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(subscription.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Adapt an mpsc receiver into a stream without pulling in tokio-stream.
    fn tokio_stream_from(rx: mpsc::UnboundedReceiver<u32>) -> impl futures::Stream<Item = u32> {
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|n| (n, rx)) })
    }
}
