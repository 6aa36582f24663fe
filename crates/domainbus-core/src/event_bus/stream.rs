//! Derived event streams.
//!
//! Every view of the bus (`of_type`, `on`, `all_events`, and the operators
//! built on them) is an [`EventStream`]: a boxed [`futures::Stream`] whose
//! items are `Result<T, StreamError>`.
//!
//! ## Rules
//! - **Own queue**: each stream owns one queue on the bus channel, attached
//!   when the stream is created. Events published after that are observed.
//! - **Per-stream FIFO**: items arrive in publish order.
//! - **No loss**: a slow stream builds up a backlog instead of skipping
//!   events; past the configured threshold a warning is logged.
//! - **Publish time**: every item keeps the time its event was published,
//!   which is what `throttle` and `buffer` measure windows against.
//! - **Termination**: the stream ends once the bus is disposed and all
//!   queued events have been drained.

use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::time::Instant;

use super::channel::Inlet;
use super::events::SharedEvent;
use crate::error::StreamError;

/// Item yielded by an [`EventStream`].
pub type StreamItem<T> = Result<T, StreamError>;

/// A value and the time its source event was published.
pub(crate) struct Stamped<T> {
    pub(crate) at: Instant,
    pub(crate) value: T,
}

pub(crate) type StampedItem<T> = Result<Stamped<T>, StreamError>;

/// A stream of events (or batches of events) derived from the bus.
pub struct EventStream<T> {
    inner: BoxStream<'static, StampedItem<T>>,
}

impl<T: Send + 'static> EventStream<T> {
    /// Wrap an arbitrary stream.
    ///
    /// Items not coming from a bus have no publish time; they are stamped
    /// when they are read.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = StreamItem<T>> + Send + 'static,
    {
        Self::from_stamped(stream.map(|item| {
            item.map(|value| Stamped {
                at: Instant::now(),
                value,
            })
        }))
    }

    /// An already terminated stream, handed out by a disposed bus.
    pub fn empty() -> Self {
        Self::from_stamped(stream::empty())
    }

    pub(crate) fn from_stamped<S>(stream: S) -> Self
    where
        S: Stream<Item = StampedItem<T>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Build a stream over one queue of the bus channel.
    ///
    /// `select` maps each raw event to an item, or `None` to skip it.
    pub(crate) fn from_inlet<F>(inlet: Inlet, select: F) -> Self
    where
        F: FnMut(SharedEvent) -> Option<T> + Send + 'static,
    {
        let events = stream::unfold((inlet, select), |(mut inlet, mut select)| async move {
            while let Some(published) = inlet.recv().await {
                if let Some(value) = select(published.event) {
                    let item = Stamped {
                        at: published.at,
                        value,
                    };
                    return Some((Ok(item), (inlet, select)));
                }
            }
            None
        });
        Self::from_stamped(events)
    }

    pub(crate) fn into_stamped(self) -> BoxStream<'static, StampedItem<T>> {
        self.inner
    }

    /// Drop stream errors and yield only successful items.
    pub fn ok_items(self) -> impl Stream<Item = T> + Send + 'static {
        self.inner
            .filter_map(|item| async move { item.ok().map(|stamped| stamped.value) })
    }
}

impl<T> Stream for EventStream<T> {
    type Item = StreamItem<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner
            .poll_next_unpin(cx)
            .map(|item| item.map(|item| item.map(|stamped| stamped.value)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("item", &std::any::type_name::<T>())
            .finish()
    }
}
