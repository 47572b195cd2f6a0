// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-key write ordering.
//!
//! Without it, two in-flight writes to the same key may reach a driver with
//! variable latency in either order. With it, each write waits for the
//! previous write to the same key to settle before calling the driver.
//!
//! Slots are reserved synchronously, at the point a flush is dispatched, so
//! the order of [`WriteQueue::reserve`] calls is the order of driver calls.
//!
//! # Example
//!
//! ```
//! use persist_sync::WriteQueue;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue = WriteQueue::new();
//! let mut first = queue.reserve("prefs");
//! let mut second = queue.reserve("prefs");
//!
//! first.ready().await;
//! drop(first); // settles the first write
//! second.ready().await;
//! # }
//! ```

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;

/// Last reserved slot for a key.
struct Tail {
    generation: u64,
    settled: oneshot::Receiver<()>,
}

struct Lines<K> {
    tails: DashMap<K, Tail>,
    generation: AtomicU64,
}

/// Tail of each key's chain of pending writes.
///
/// A key is tracked only while it has a write outstanding.
pub struct WriteQueue<K: Eq + Hash> {
    lines: Arc<Lines<K>>,
}

impl<K: Eq + Hash> Clone for WriteQueue<K> {
    fn clone(&self) -> Self {
        Self { lines: self.lines.clone() }
    }
}

impl<K: Eq + Hash + Clone> Default for WriteQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> WriteQueue<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Lines { tails: DashMap::new(), generation: AtomicU64::new(0) }),
        }
    }

    /// Take the next place in line for `key`.
    pub fn reserve(&self, key: K) -> WriteSlot<K> {
        let (release, settled) = oneshot::channel();
        let generation = self.lines.generation.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .lines
            .tails
            .insert(key.clone(), Tail { generation, settled })
            .map(|tail| tail.settled);
        WriteSlot {
            lines: self.lines.clone(),
            key,
            generation,
            previous,
            _release: release,
        }
    }

    /// Number of keys with a write outstanding
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.tails.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.tails.is_empty()
    }
}

/// A place in a key's write line. Dropping it lets the next write through.
pub struct WriteSlot<K: Eq + Hash> {
    lines: Arc<Lines<K>>,
    key: K,
    generation: u64,
    previous: Option<oneshot::Receiver<()>>,
    _release: oneshot::Sender<()>,
}

impl<K: Eq + Hash> WriteSlot<K> {
    /// Wait until every earlier write to the same key has settled.
    pub async fn ready(&mut self) {
        if let Some(previous) = self.previous.take() {
            // Never sent on: the sender being dropped is the signal
            let _ = previous.await;
        }
    }
}

impl<K: Eq + Hash> Drop for WriteSlot<K> {
    fn drop(&mut self) {
        // Forget the key unless a later write has queued behind this one
        self.lines
            .tails
            .remove_if(&self.key, |_, tail| tail.generation == self.generation);
    }
}
