use std::collections::BTreeMap;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{CollectionDriver, SingleDriver};
use crate::error::DriverError;

/// One operation applied to a [`MemoryDriver`], in the order it took effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOp<K, S> {
    Read(K),
    ReadAll,
    Write(K, S),
    Remove(K),
}

/// DashMap-backed driver implementing both driver contracts.
///
/// Keeps a journal of applied operations so callers can see exactly what
/// reached storage.
pub struct MemoryDriver<K, S> {
    data: DashMap<K, S>,
    journal: Mutex<Vec<DriverOp<K, S>>>,
    latency: Option<Duration>,
}

impl<K: Eq + Hash + Clone, S: Clone> MemoryDriver<K, S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            journal: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    /// Driver pre-populated with entries (not journaled)
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = (K, S)>) -> Self {
        let driver = Self::new();
        for (k, v) in entries {
            driver.data.insert(k, v);
        }
        driver
    }

    /// Delay every operation by `latency` to simulate an asynchronous backend
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<S> {
        self.data.get(key).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Every operation applied so far
    #[must_use]
    pub fn ops(&self) -> Vec<DriverOp<K, S>> {
        self.journal.lock().clone()
    }

    /// Only the writes and removals applied so far
    #[must_use]
    pub fn mutations(&self) -> Vec<DriverOp<K, S>> {
        self.journal
            .lock()
            .iter()
            .filter(|op| matches!(op, DriverOp::Write(..) | DriverOp::Remove(_)))
            .cloned()
            .collect()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn record(&self, op: DriverOp<K, S>) {
        self.journal.lock().push(op);
    }
}

impl<K: Eq + Hash + Clone, S: Clone> Default for MemoryDriver<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, S> SingleDriver<K, S> for MemoryDriver<K, S>
where
    K: Eq + Hash + Clone + Send + Sync,
    S: Clone + Send + Sync,
{
    async fn read(&self, key: &K) -> Result<Option<S>, DriverError> {
        self.delay().await;
        self.record(DriverOp::Read(key.clone()));
        Ok(self.get(key))
    }

    async fn write(&self, key: &K, value: S) -> Result<(), DriverError> {
        self.delay().await;
        self.record(DriverOp::Write(key.clone(), value.clone()));
        self.data.insert(key.clone(), value);
        Ok(())
    }
}

#[async_trait]
impl<K, S> CollectionDriver<K, S> for MemoryDriver<K, S>
where
    K: Eq + Hash + Ord + Clone + Send + Sync,
    S: Clone + Send + Sync,
{
    async fn read_all(&self) -> Result<BTreeMap<K, S>, DriverError> {
        self.delay().await;
        self.record(DriverOp::ReadAll);
        Ok(self
            .data
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect())
    }

    async fn write(&self, key: &K, value: S) -> Result<(), DriverError> {
        self.delay().await;
        self.record(DriverOp::Write(key.clone(), value.clone()));
        self.data.insert(key.clone(), value);
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<(), DriverError> {
        self.delay().await;
        self.record(DriverOp::Remove(key.clone()));
        self.data.remove(key);
        Ok(())
    }
}
