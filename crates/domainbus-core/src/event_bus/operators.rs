//! Composable stream transforms.
//!
//! The operators are combinators on [`EventStream`]; [`AdvancedEventBus`]
//! applies them to `of_type` views of the bus.
//!
//! | Operator          | Policy                                                   |
//! |-------------------|----------------------------------------------------------|
//! | `filter_events`   | keep items matching a predicate                          |
//! | `throttle`        | leading edge: emit, then drop until the window elapses   |
//! | `buffer`          | fixed time windows, one batch per non-empty window       |
//! | `distinct`        | drop items equal to the previously emitted one           |
//!
//! Stream errors from upstream stages pass through every operator unchanged.
//!
//! Time-based operators measure against the publish time carried by each
//! item, so a slow consumer sees the same windows as a fast one.

use futures::future::ready;
use futures::stream::{self, BoxStream, StreamExt};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

use super::bus::EventBus;
use super::events::DomainEvent;
use super::stream::{EventStream, Stamped, StampedItem};
use crate::error::{panic_message, StreamError};

/// Shortest window `buffer` accepts.
pub const MIN_BUFFER_WINDOW: Duration = Duration::from_millis(1);

impl<T: Send + 'static> EventStream<T> {
    /// Keep only items for which `predicate` returns true.
    ///
    /// A panicking predicate yields a [`StreamError::StagePanicked`] item for
    /// that event; the stream carries on with the next one.
    pub fn filter_events<P>(self, predicate: P) -> EventStream<T>
    where
        P: Fn(&T) -> bool + Send + 'static,
    {
        EventStream::from_stamped(self.into_stamped().filter_map(move |item| {
            let out = match item {
                Ok(stamped) => {
                    match catch_unwind(AssertUnwindSafe(|| predicate(&stamped.value))) {
                        Ok(true) => Some(Ok(stamped)),
                        Ok(false) => None,
                        Err(payload) => Some(Err(StreamError::StagePanicked {
                            stage: "filter",
                            message: panic_message(payload.as_ref()),
                        })),
                    }
                }
                Err(err) => Some(Err(err)),
            };
            ready(out)
        }))
    }

    /// Leading-edge throttle.
    ///
    /// The first item is emitted and opens a window of length `window`;
    /// items published inside the window are dropped. The next item
    /// published after the window has elapsed is emitted and opens a new
    /// window.
    pub fn throttle(self, window: Duration) -> EventStream<T> {
        let mut last_emit: Option<Instant> = None;
        EventStream::from_stamped(self.into_stamped().filter_map(move |item| {
            let out = match item {
                Ok(stamped) => match last_emit {
                    Some(at) if stamped.at.saturating_duration_since(at) < window => None,
                    _ => {
                        last_emit = Some(stamped.at);
                        Some(Ok(stamped))
                    }
                },
                Err(err) => Some(Err(err)),
            };
            ready(out)
        }))
    }

    /// Collect items into consecutive fixed windows of length `window`.
    ///
    /// Windows start when this method is called and are assigned by publish
    /// time. Each non-empty window is emitted once, in publish order; empty
    /// windows emit nothing. When the source ends, a non-empty remainder is
    /// flushed before the batch stream ends.
    ///
    /// `window` is raised to [`MIN_BUFFER_WINDOW`] if shorter.
    pub fn buffer(self, window: Duration) -> EventStream<Vec<T>> {
        let window = window.max(MIN_BUFFER_WINDOW);
        let state = BufferState {
            source: Some(self.into_stamped()),
            window_end: Instant::now() + window,
            window,
            pending: Vec::new(),
        };

        EventStream::from_stamped(stream::unfold(state, |mut state| async move {
            loop {
                let step = {
                    let source = state.source.as_mut()?;
                    tokio::select! {
                        biased;
                        item = source.next() => BufferStep::Item(item),
                        _ = sleep_until(state.window_end) => BufferStep::WindowClosed,
                    }
                };

                match step {
                    BufferStep::Item(Some(Ok(stamped))) => {
                        if stamped.at < state.window_end {
                            state.pending.push(stamped.value);
                            continue;
                        }
                        let batch = state.close_window(stamped.at);
                        state.pending.push(stamped.value);
                        if let Some(batch) = batch {
                            return Some((Ok(batch), state));
                        }
                    }
                    BufferStep::Item(Some(Err(err))) => return Some((Err(err), state)),
                    BufferStep::Item(None) => {
                        state.source = None;
                        let at = state.window_end;
                        return state
                            .take_batch(at)
                            .map(|batch| (Ok(batch), state));
                    }
                    BufferStep::WindowClosed => {
                        if let Some(batch) = state.close_window(Instant::now()) {
                            return Some((Ok(batch), state));
                        }
                    }
                }
            }
        }))
    }
}

impl<T: PartialEq + Clone + Send + 'static> EventStream<T> {
    /// Drop items equal to the previously emitted item.
    ///
    /// Only consecutive duplicates are suppressed; an item equal to an older,
    /// non-adjacent emission is emitted again.
    pub fn distinct(self) -> EventStream<T> {
        let mut last: Option<T> = None;
        EventStream::from_stamped(self.into_stamped().filter_map(move |item| {
            let out = match item {
                Ok(stamped) => {
                    if last.as_ref() == Some(&stamped.value) {
                        None
                    } else {
                        last = Some(stamped.value.clone());
                        Some(Ok(stamped))
                    }
                }
                Err(err) => Some(Err(err)),
            };
            ready(out)
        }))
    }
}

struct BufferState<T> {
    source: Option<BoxStream<'static, StampedItem<T>>>,
    window_end: Instant,
    window: Duration,
    pending: Vec<T>,
}

impl<T> BufferState<T> {
    /// Close the current window and move to the one containing `at`.
    ///
    /// Returns the closed window's batch, stamped with its end.
    fn close_window(&mut self, at: Instant) -> Option<Stamped<Vec<T>>> {
        let closed_at = self.window_end;
        if at >= self.window_end {
            let window = self.window.as_nanos();
            let behind = at.duration_since(self.window_end).as_nanos();
            let skip = (behind / window + 1) * window;
            self.window_end += Duration::from_nanos(u64::try_from(skip).unwrap_or(u64::MAX));
        }
        self.take_batch(closed_at)
    }

    fn take_batch(&mut self, at: Instant) -> Option<Stamped<Vec<T>>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(Stamped {
                at,
                value: std::mem::take(&mut self.pending),
            })
        }
    }
}

enum BufferStep<T> {
    WindowClosed,
    Item(Option<StampedItem<T>>),
}

/// Typed stream operators over an event bus.
///
/// Every method composes [`EventBus::of_type`], so a disposed bus yields
/// empty streams here too.
pub trait AdvancedEventBus {
    /// Events of type `T` for which `predicate` holds.
    fn of_type_where<T, P>(&self, predicate: P) -> EventStream<Arc<T>>
    where
        T: DomainEvent,
        P: Fn(&T) -> bool + Send + 'static;

    /// Leading-edge throttled events of type `T`.
    fn throttle<T: DomainEvent>(&self, window: Duration) -> EventStream<Arc<T>>;

    /// Events of type `T` batched per fixed time window.
    fn buffer<T: DomainEvent>(&self, window: Duration) -> EventStream<Vec<Arc<T>>>;

    /// Events of type `T` with consecutive duplicates removed.
    fn distinct<T: DomainEvent + PartialEq>(&self) -> EventStream<Arc<T>>;
}

impl AdvancedEventBus for EventBus {
    fn of_type_where<T, P>(&self, predicate: P) -> EventStream<Arc<T>>
    where
        T: DomainEvent,
        P: Fn(&T) -> bool + Send + 'static,
    {
        self.of_type::<T>()
            .filter_events(move |event: &Arc<T>| predicate(&**event))
    }

    fn throttle<T: DomainEvent>(&self, window: Duration) -> EventStream<Arc<T>> {
        self.of_type::<T>().throttle(window)
    }

    fn buffer<T: DomainEvent>(&self, window: Duration) -> EventStream<Vec<Arc<T>>> {
        self.of_type::<T>().buffer(window)
    }

    fn distinct<T: DomainEvent + PartialEq>(&self) -> EventStream<Arc<T>> {
        self.of_type::<T>().distinct()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::category::Category;
    use crate::event_bus::events::EventEnvelope;
    use crate::event_bus::stream::StreamItem;
    use futures::stream;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct Sensor;

    impl Category for Sensor {
        fn value(&self) -> &str {
            "plant.sensor"
        }

        fn display_name(&self) -> &str {
            "Sensor"
        }
    }

    #[derive(Debug)]
    struct Reading {
        envelope: EventEnvelope,
        label: String,
    }

    impl DomainEvent for Reading {
        fn envelope(&self) -> &EventEnvelope {
            &self.envelope
        }
    }

    fn reading(label: &str) -> Reading {
        Reading {
            envelope: EventEnvelope::new("plant.reading", Sensor),
            label: label.to_string(),
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn values(items: Vec<u32>) -> EventStream<u32> {
        EventStream::new(stream::iter(items.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn test_filter_events() {
        let evens: Vec<u32> = values(vec![1, 2, 3, 4])
            .filter_events(|n| n % 2 == 0)
            .ok_items()
            .collect()
            .await;
        assert_eq!(evens, vec![2, 4]);
    }

    #[tokio::test]
    async fn test_filter_panic_becomes_stream_error() {
        let items: Vec<StreamItem<u32>> = values(vec![1, 2, 3])
            .filter_events(|n| {
                if *n == 2 {
                    panic!("cannot judge 2");
                }
                true
            })
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Ok(1));
        assert_eq!(
            items[1],
            Err(StreamError::StagePanicked {
                stage: "filter",
                message: "cannot judge 2".to_string(),
            })
        );
        assert_eq!(items[2], Ok(3));
    }

    #[tokio::test]
    async fn test_distinct_suppresses_consecutive_duplicates_only() {
        let out: Vec<u32> = values(vec![1, 1, 1, 2, 2, 1, 3, 3])
            .distinct()
            .ok_items()
            .collect()
            .await;
        assert_eq!(out, vec![1, 2, 1, 3]);
    }

    #[tokio::test]
    async fn test_errors_pass_through_distinct_and_throttle() {
        let err = StreamError::StagePanicked {
            stage: "filter",
            message: "x".to_string(),
        };
        let source = EventStream::new(stream::iter(vec![Ok(1), Err(err.clone()), Ok(1)]));
        let items: Vec<StreamItem<u32>> = source
            .distinct()
            .throttle(Duration::from_secs(60))
            .collect()
            .await;
        assert_eq!(items, vec![Ok(1), Err(err)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_is_leading_edge() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<u32>();
        let source = EventStream::new(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|n| (Ok(n), rx))
        }));
        let throttled = source.throttle(Duration::from_millis(100));
        let collector = tokio::spawn(async move { throttled.ok_items().collect::<Vec<u32>>().await });

        tx.send(0).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(10).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(20).unwrap();
        tokio::time::sleep(Duration::from_millis(130)).await;
        tx.send(150).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(160).unwrap();
        drop(tx);

        assert_eq!(collector.await.unwrap(), vec![0, 150]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_batches_per_window() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<u32>();
        let source = EventStream::new(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|n| (Ok(n), rx))
        }));
        let mut batches = source.buffer(Duration::from_millis(100));

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert_eq!(batches.next().await, Some(Ok(vec![1, 2])));

        tx.send(3).unwrap();
        drop(tx);
        assert_eq!(batches.next().await, Some(Ok(vec![3])));
        assert_eq!(batches.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_buffer_window_is_raised_to_minimum() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<u32>();
        let source = EventStream::new(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|n| (Ok(n), rx))
        }));
        let mut batches = source.buffer(Duration::ZERO);

        tx.send(7).unwrap();
        assert_eq!(batches.next().await, Some(Ok(vec![7])));
        drop(tx);
        assert_eq!(batches.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_windows_follow_publish_time_with_slow_handler() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let subscription = bus
            .throttle::<Reading>(Duration::from_millis(100))
            .subscribe(move |event: Arc<Reading>| {
                sink.lock().push(event.label.clone());
                async {
                    advance(150).await;
                    anyhow::Ok(())
                }
            });

        bus.publish(reading("t0"));
        advance(10).await;
        bus.publish(reading("t10"));
        advance(10).await;
        bus.publish(reading("t20"));
        advance(500).await;

        assert_eq!(*seen.lock(), vec!["t0".to_string()]);
        subscription.cancel().await;
        bus.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_windows_follow_publish_time_with_slow_handler() {
        let bus = EventBus::new();
        let batches = Arc::new(Mutex::new(Vec::new()));

        let sink = batches.clone();
        let subscription = bus
            .buffer::<Reading>(Duration::from_millis(100))
            .subscribe(move |batch: Vec<Arc<Reading>>| {
                let labels: Vec<String> = batch.iter().map(|r| r.label.clone()).collect();
                sink.lock().push(labels);
                async {
                    advance(250).await;
                    anyhow::Ok(())
                }
            });

        advance(10).await;
        bus.publish(reading("a"));
        bus.publish(reading("b"));
        advance(110).await;
        bus.publish(reading("c"));
        advance(10).await;
        bus.publish(reading("d"));
        advance(120).await;
        bus.publish(reading("e"));
        advance(1000).await;

        assert_eq!(
            *batches.lock(),
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string(), "d".to_string()],
                vec!["e".to_string()],
            ]
        );
        subscription.cancel().await;
        bus.dispose().await;
    }
}
