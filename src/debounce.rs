// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Debounced delivery of rapidly changing values.
//!
//! The [`Debouncer`] keeps at most one pending value and one timer. Each
//! [`schedule`](Debouncer::schedule) replaces the pending value and restarts
//! the timer, so a burst of changes is delivered once, carrying the last
//! value, after the configured quiet period.
//!
//! # Example
//!
//! ```
//! use persist_sync::{Debouncer, FlushDelay};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut debouncer = Debouncer::new(FlushDelay::Fixed(Duration::from_millis(10)));
//!
//! assert!(debouncer.schedule(1).is_none());
//! assert!(debouncer.schedule(2).is_none());
//! assert_eq!(debouncer.expired().await, 2);
//!
//! // Without a delay, values come straight back for synchronous delivery
//! let mut immediate = Debouncer::new(FlushDelay::Immediate);
//! assert_eq!(immediate.schedule(3), Some(3));
//! # }
//! ```

use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, Sleep};
use tracing::debug;

use crate::config::{PersistConfig, DEFAULT_FLUSH_DELAY};
use crate::metrics;
use crate::store::StoreReader;

/// Quiet period before a scheduled value is delivered.
#[derive(Debug, Clone)]
pub enum FlushDelay {
    /// Deliver synchronously on every schedule
    Immediate,
    Fixed(Duration),
    /// Re-read from the live configuration at every schedule
    Live(watch::Receiver<PersistConfig>),
}

impl FlushDelay {
    /// Delay in effect right now, `None` for synchronous delivery
    #[must_use]
    pub fn current(&self) -> Option<Duration> {
        match self {
            Self::Immediate => None,
            Self::Fixed(delay) => Some(*delay),
            Self::Live(rx) => rx.borrow().flush_delay(),
        }
    }
}

impl From<Option<Duration>> for FlushDelay {
    fn from(delay: Option<Duration>) -> Self {
        delay.map_or(Self::Immediate, Self::Fixed)
    }
}

struct Pending<T> {
    value: T,
    timer: Pin<Box<Sleep>>,
}

/// Single-slot debouncer.
pub struct Debouncer<T> {
    delay: FlushDelay,
    pending: Option<Pending<T>>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: FlushDelay) -> Self {
        Self { delay, pending: None }
    }

    /// Schedule `value` for delivery.
    ///
    /// Any pending value is superseded. Returns `Some(value)` when the delay
    /// currently in effect is none and the caller must deliver right away.
    pub fn schedule(&mut self, value: T) -> Option<T> {
        let Some(delay) = self.delay.current() else {
            self.cancel();
            return Some(value);
        };

        let deadline = Instant::now() + delay;
        match self.pending.as_mut() {
            Some(pending) => {
                metrics::record_debounce_superseded();
                pending.value = value;
                pending.timer.as_mut().reset(deadline);
            }
            None => {
                self.pending = Some(Pending {
                    value,
                    timer: Box::pin(tokio::time::sleep_until(deadline)),
                });
            }
        }
        None
    }

    /// Drop the pending value without delivering it. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Take the pending value now, skipping the rest of the quiet period.
    pub fn take_pending(&mut self) -> Option<T> {
        self.pending.take().map(|p| p.value)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Wait for the pending value's quiet period to elapse and take it.
    ///
    /// Never resolves while nothing is pending. Cancel-safe: dropping the
    /// future before it resolves leaves the pending value in place.
    pub async fn expired(&mut self) -> T {
        if let Some(pending) = self.pending.as_mut() {
            pending.timer.as_mut().await;
        }
        match self.pending.take() {
            Some(pending) => pending.value,
            None => std::future::pending().await,
        }
    }
}

/// Handle returned by [`flush_delayed`].
pub struct DebounceHandle {
    stop: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl DebounceHandle {
    /// Stop watching and drop any pending delivery.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }
}

/// Deliver the store's value to `target` once it stops changing for `delay`.
///
/// `None` uses [`DEFAULT_FLUSH_DELAY`]. While the store keeps changing faster
/// than the delay, `target` is never called.
pub fn flush_delayed<T, F>(source: StoreReader<T>, delay: Option<Duration>, target: F) -> DebounceHandle
where
    T: Clone + Send + 'static,
    F: Fn(T) + Send + 'static,
{
    let delay = delay.unwrap_or(DEFAULT_FLUSH_DELAY);
    let mut changes = source.subscribe();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut debouncer = Debouncer::new(FlushDelay::Fixed(delay));
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    if debouncer.cancel() {
                        debug!("Delayed flush interrupted by stop");
                    }
                    break;
                }
                change = changes.next() => match change {
                    Some(change) => {
                        debouncer.schedule(change.value);
                    }
                    None => break,
                },
                value = debouncer.expired() => target(value),
            }
        }
    });

    DebounceHandle { stop: Some(stop_tx), task }
}
