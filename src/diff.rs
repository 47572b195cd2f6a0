// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Minimal driver operations between two snapshots of a keyed collection.
//!
//! Unchanged keys produce no driver call. All operations for one flush run
//! concurrently; the flush fails with the first error seen, and partial
//! application to the backing store is possible (no all-or-nothing).
//!
//! # Example
//!
//! ```
//! use persist_sync::diff_maps;
//! use std::collections::BTreeMap;
//!
//! let previous = BTreeMap::from([("a", 1), ("b", 2)]);
//! let next = BTreeMap::from([("a", 1), ("b", 3), ("c", 4)]);
//!
//! let diff = diff_maps(&previous, &next);
//! assert_eq!(diff.upserts, vec![("b", 3), ("c", 4)]);
//! assert!(diff.removals.is_empty());
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use crate::codec::Serializer;
use crate::error::{panic_message, DriverError, PersistError};
use crate::metrics;
use crate::storage::traits::CollectionDriver;
use crate::write_queue::WriteSlot;

/// Keys to write and keys to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDiff<K, V> {
    /// New keys and keys whose value changed, in key order
    pub upserts: Vec<(K, V)>,
    /// Keys gone from the next snapshot, in key order
    pub removals: Vec<K>,
}

impl<K, V> MapDiff<K, V> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }

    /// Number of driver calls this diff turns into
    #[must_use]
    pub fn len(&self) -> usize {
        self.upserts.len() + self.removals.len()
    }

    /// Every key touched, upserts first
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.upserts.iter().map(|(k, _)| k).chain(self.removals.iter())
    }
}

/// Driver calls made by one applied diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub written: usize,
    pub removed: usize,
}

/// Compare two snapshots in a single ordered pass.
pub fn diff_maps<K, V>(previous: &BTreeMap<K, V>, next: &BTreeMap<K, V>) -> MapDiff<K, V>
where
    K: Ord + Clone,
    V: PartialEq + Clone,
{
    let mut upserts = Vec::new();
    let mut removals = Vec::new();
    let mut prev = previous.iter().peekable();
    let mut curr = next.iter().peekable();

    loop {
        match (prev.peek(), curr.peek()) {
            (None, None) => break,
            (Some((pk, _)), None) => {
                removals.push((*pk).clone());
                prev.next();
            }
            (None, Some((nk, nv))) => {
                upserts.push(((*nk).clone(), (*nv).clone()));
                curr.next();
            }
            (Some((pk, pv)), Some((nk, nv))) => match pk.cmp(nk) {
                Ordering::Less => {
                    removals.push((*pk).clone());
                    prev.next();
                }
                Ordering::Greater => {
                    upserts.push(((*nk).clone(), (*nv).clone()));
                    curr.next();
                }
                Ordering::Equal => {
                    if pv != nv {
                        upserts.push(((*nk).clone(), (*nv).clone()));
                    }
                    prev.next();
                    curr.next();
                }
            },
        }
    }

    MapDiff { upserts, removals }
}

enum Applied {
    Written,
    Removed,
}

/// Apply `diff` to `driver`, every operation concurrently.
///
/// `slots` holds the per-key write queue places reserved for this flush, if
/// writes are ordered per key. Waits for every operation to settle, then
/// returns the counts or the first error observed.
pub async fn apply_diff<K, V, S, D>(
    driver: Arc<D>,
    serializer: Arc<dyn Serializer<V, S>>,
    diff: MapDiff<K, V>,
    mut slots: BTreeMap<K, WriteSlot<K>>,
) -> Result<DiffStats, PersistError>
where
    K: Ord + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: Send + 'static,
    D: CollectionDriver<K, S> + ?Sized + 'static,
{
    metrics::record_diff(diff.upserts.len(), diff.removals.len());
    debug!(writes = diff.upserts.len(), removals = diff.removals.len(), "Applying collection diff");

    let mut tasks = JoinSet::new();

    for (key, value) in diff.upserts {
        let driver = driver.clone();
        let serializer = serializer.clone();
        let mut slot = slots.remove(&key);
        tasks.spawn(async move {
            let raw = serializer.serialize(&value).await.map_err(PersistError::Serialize)?;
            if let Some(slot) = slot.as_mut() {
                slot.ready().await;
            }
            driver.write(&key, raw).await.map_err(PersistError::Write)?;
            drop(slot);
            Ok::<_, PersistError>(Applied::Written)
        });
    }

    for key in diff.removals {
        let driver = driver.clone();
        let mut slot = slots.remove(&key);
        tasks.spawn(async move {
            if let Some(slot) = slot.as_mut() {
                slot.ready().await;
            }
            driver.remove(&key).await.map_err(PersistError::Write)?;
            drop(slot);
            Ok::<_, PersistError>(Applied::Removed)
        });
    }

    let mut stats = DiffStats::default();
    let mut first_error = None;

    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.unwrap_or_else(|join_err| {
            let message = if join_err.is_panic() {
                panic_message(join_err.into_panic().as_ref())
            } else {
                "collection operation cancelled".to_string()
            };
            Err(PersistError::Write(DriverError::Panicked(message)))
        });
        match outcome {
            Ok(Applied::Written) => stats.written += 1,
            Ok(Applied::Removed) => stats.removed += 1,
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(stats),
    }
}
