// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Observable state container.
//!
//! A [`Store`] holds one value and pushes a [`Change`] to every subscriber on
//! each mutation. Changes carry a sequence number that increases by one per
//! mutation, so the engine can tell exactly which mutations happened inside the
//! hydration window.
//!
//! Ownership is split by capability:
//! - [`Store`] can read, mutate and subscribe (application code)
//! - [`StoreReader`] can only read and subscribe (observers, [`crate::flush_delayed`])
//! - [`WakeUp`] is the single-writer role used once by hydration
//!
//! # Example
//!
//! ```
//! use persist_sync::Store;
//!
//! let store = Store::new(1u32);
//! let reader = store.reader();
//!
//! store.set(2);
//! store.update(|v| v + 1);
//! assert_eq!(reader.get(), 3);
//! assert_eq!(reader.seq(), 2);
//! ```

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;
use tokio::sync::mpsc;

use crate::error::WakeUpError;

/// One mutation of a store, as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change<T> {
    /// Sequence number of this mutation (first mutation is 1)
    pub seq: u64,
    /// Value after the mutation
    pub value: T,
}

struct Slot<T> {
    value: T,
    seq: u64,
    subscribers: Vec<mpsc::UnboundedSender<Change<T>>>,
}

struct Shared<T> {
    // Reentrant so an `update` closure can read the store it is updating
    slot: ReentrantMutex<RefCell<Slot<T>>>,
}

impl<T: Clone> Shared<T> {
    fn get(&self) -> T {
        self.slot.lock().borrow().value.clone()
    }

    fn seq(&self) -> u64 {
        self.slot.lock().borrow().seq
    }

    fn snapshot(&self) -> (u64, T) {
        let guard = self.slot.lock();
        let slot = guard.borrow();
        (slot.seq, slot.value.clone())
    }

    fn subscribe(&self) -> (u64, T, Changes<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self.slot.lock();
        let mut slot = guard.borrow_mut();
        slot.subscribers.push(tx);
        (slot.seq, slot.value.clone(), Changes { rx })
    }

    fn update(&self, f: impl FnOnce(&T) -> T) -> u64 {
        let guard = self.slot.lock();
        let value = f(&guard.borrow().value);
        let mut slot = guard.borrow_mut();
        slot.seq += 1;
        let seq = slot.seq;
        // Sent under the lock: subscribers observe mutations in seq order
        slot.subscribers
            .retain(|tx| tx.send(Change { seq, value: value.clone() }).is_ok());
        slot.value = value;
        seq
    }
}

/// Full handle on an observable value.
pub struct Store<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T: Clone> Store<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: ReentrantMutex::new(RefCell::new(Slot { value, seq: 0, subscribers: Vec::new() })),
            }),
        }
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> T {
        self.shared.get()
    }

    /// Sequence number of the latest mutation (0 before any mutation)
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.shared.seq()
    }

    /// Replace the value and notify subscribers. Returns the new sequence number.
    pub fn set(&self, value: T) -> u64 {
        self.shared.update(move |_| value)
    }

    /// Derive the next value from the current one.
    ///
    /// Other threads wait while `f` runs. `f` may read this store, but
    /// mutating it from inside `f` panics.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> u64 {
        self.shared.update(f)
    }

    /// Read-only capability over the same value
    #[must_use]
    pub fn reader(&self) -> StoreReader<T> {
        StoreReader { shared: self.shared.clone() }
    }

    /// Subscribe to future changes
    #[must_use]
    pub fn subscribe(&self) -> Changes<T> {
        self.shared.subscribe().2
    }

    /// Handle that does not keep the value alive
    pub(crate) fn downgrade(&self) -> WeakStore<T> {
        WeakStore { shared: Arc::downgrade(&self.shared) }
    }
}

/// Non-owning handle on a [`Store`].
///
/// Once every `Store` and `StoreReader` is gone, change streams end and
/// upgrades fail.
pub(crate) struct WeakStore<T> {
    shared: Weak<Shared<T>>,
}

impl<T: Clone> WeakStore<T> {
    pub(crate) fn reader(&self) -> Option<StoreReader<T>> {
        self.shared.upgrade().map(|shared| StoreReader { shared })
    }
}

/// Read/subscribe-only handle on a [`Store`].
pub struct StoreReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for StoreReader<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T: Clone> StoreReader<T> {
    #[must_use]
    pub fn get(&self) -> T {
        self.shared.get()
    }

    #[must_use]
    pub fn seq(&self) -> u64 {
        self.shared.seq()
    }

    /// Sequence number and value read atomically
    #[must_use]
    pub fn snapshot(&self) -> (u64, T) {
        self.shared.snapshot()
    }

    #[must_use]
    pub fn subscribe(&self) -> Changes<T> {
        self.shared.subscribe().2
    }

    /// Subscribe and capture the value the subscription starts from, atomically.
    #[must_use]
    pub fn subscribe_from(&self) -> (u64, T, Changes<T>) {
        self.shared.subscribe()
    }
}

/// Stream of changes for one subscriber.
pub struct Changes<T> {
    rx: mpsc::UnboundedReceiver<Change<T>>,
}

impl<T> Changes<T> {
    /// Next change, or `None` once every store handle is gone.
    pub async fn next(&mut self) -> Option<Change<T>> {
        self.rx.recv().await
    }

    /// Next already-queued change without waiting.
    pub fn try_next(&mut self) -> Option<Change<T>> {
        self.rx.try_recv().ok()
    }
}

/// Target that receives the value read from the driver at startup.
pub trait WakeUp<T>: Send + Sync {
    fn wake_up(&self, value: T) -> Result<(), WakeUpError>;

    /// Apply `value` and report the sequence number of the container mutation
    /// it made. Only that mutation is withheld from the driver; a target that
    /// does not mutate the persisted container reports `None`.
    fn wake_up_seq(&self, value: T) -> Result<Option<u64>, WakeUpError> {
        self.wake_up(value).map(|()| None)
    }
}

impl<T: Clone + Send> WakeUp<T> for Store<T> {
    fn wake_up(&self, value: T) -> Result<(), WakeUpError> {
        self.set(value);
        Ok(())
    }

    fn wake_up_seq(&self, value: T) -> Result<Option<u64>, WakeUpError> {
        Ok(Some(self.set(value)))
    }
}

impl<T: Clone + Send> WakeUp<T> for WeakStore<T> {
    fn wake_up(&self, value: T) -> Result<(), WakeUpError> {
        self.wake_up_seq(value).map(|_| ())
    }

    fn wake_up_seq(&self, value: T) -> Result<Option<u64>, WakeUpError> {
        let shared = self.shared.upgrade().ok_or_else(|| WakeUpError::new("container dropped"))?;
        Ok(Some(shared.update(move |_| value)))
    }
}

/// Closure-backed [`WakeUp`] target, built with [`wake_up_fn`].
pub struct FnWakeUp<F>(F);

impl<T, F> WakeUp<T> for FnWakeUp<F>
where
    F: Fn(T) -> Result<(), WakeUpError> + Send + Sync,
{
    fn wake_up(&self, value: T) -> Result<(), WakeUpError> {
        (self.0)(value)
    }
}

/// Wrap a closure as a wake-up target.
///
/// Container mutations made from inside the closure are treated like any
/// other application write and are persisted.
pub fn wake_up_fn<T, F>(f: F) -> FnWakeUp<F>
where
    F: Fn(T) -> Result<(), WakeUpError> + Send + Sync,
{
    FnWakeUp(f)
}
