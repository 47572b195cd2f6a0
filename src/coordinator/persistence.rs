// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! How a container value is read from and written to a driver.
//!
//! The engine is the same for both container forms; the difference lives
//! here. A single value is one keyed read and one keyed write per flush. A
//! collection is one `read_all` and a diff of per-key writes and removals.
//!
//! `flush` does its synchronous part (diffing, write queue reservation)
//! before returning the future, so the order of `flush` calls is the order
//! in which writes queue up per key.

use std::collections::BTreeMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::codec::Pipeline;
use crate::diff::{apply_diff, diff_maps};
use crate::error::PersistError;
use crate::storage::traits::{CollectionDriver, SingleDriver};
use crate::write_queue::WriteQueue;

use super::types::FlushJob;

pub(crate) type LoadFuture<T> = Pin<Box<dyn Future<Output = Result<Option<T>, PersistError>> + Send>>;
pub(crate) type FlushFuture = Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send>>;

pub(crate) trait Persistence<T>: Send + Sync + 'static {
    /// Metrics label
    fn mode(&self) -> &'static str;

    /// Read and unserialize the persisted value; `None` when nothing is stored.
    fn load(&self) -> LoadFuture<T>;

    fn flush(&self, job: FlushJob<T>) -> FlushFuture;
}

/// One value under one key.
pub(crate) struct SinglePersistence<K, V, S, D: ?Sized> {
    pub driver: Arc<D>,
    pub key: K,
    pub pipeline: Pipeline<V, S>,
    pub queue: Option<WriteQueue<()>>,
}

impl<K, V, S, D> Persistence<V> for SinglePersistence<K, V, S, D>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: Send + 'static,
    D: SingleDriver<K, S> + ?Sized + 'static,
{
    fn mode(&self) -> &'static str {
        "single"
    }

    fn load(&self) -> LoadFuture<V> {
        let driver = self.driver.clone();
        let key = self.key.clone();
        let pipeline = self.pipeline.clone();
        Box::pin(async move {
            match driver.read(&key).await.map_err(PersistError::Read)? {
                Some(raw) => pipeline.unserialize(raw).await.map(Some).map_err(PersistError::Unserialize),
                None => Ok(None),
            }
        })
    }

    fn flush(&self, job: FlushJob<V>) -> FlushFuture {
        let driver = self.driver.clone();
        let key = self.key.clone();
        let pipeline = self.pipeline.clone();
        let mut slot = self.queue.as_ref().map(|queue| queue.reserve(()));
        Box::pin(async move {
            let raw = pipeline.serialize(&job.payload).await.map_err(PersistError::Serialize)?;
            if let Some(slot) = slot.as_mut() {
                slot.ready().await;
            }
            driver.write(&key, raw).await.map_err(PersistError::Write)?;
            drop(slot);
            debug!(flush_id = %job.id, "Value written");
            Ok::<(), PersistError>(())
        })
    }
}

/// A keyed collection, each entry stored under its own key.
pub(crate) struct MapPersistence<K: Eq + Hash, V, S, D: ?Sized> {
    pub driver: Arc<D>,
    pub pipeline: Pipeline<V, S>,
    pub queue: Option<WriteQueue<K>>,
}

impl<K, V, S, D> Persistence<BTreeMap<K, V>> for MapPersistence<K, V, S, D>
where
    K: Ord + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
    S: Send + 'static,
    D: CollectionDriver<K, S> + ?Sized + 'static,
{
    fn mode(&self) -> &'static str {
        "collection"
    }

    fn load(&self) -> LoadFuture<BTreeMap<K, V>> {
        let driver = self.driver.clone();
        let pipeline = self.pipeline.clone();
        Box::pin(async move {
            let raw = driver.read_all().await.map_err(PersistError::Read)?;
            let mut entries = BTreeMap::new();
            for (key, raw) in raw {
                let value = pipeline.unserialize(raw).await.map_err(PersistError::Unserialize)?;
                entries.insert(key, value);
            }
            // An empty collection still replaces the container
            Ok::<_, PersistError>(Some(entries))
        })
    }

    fn flush(&self, job: FlushJob<BTreeMap<K, V>>) -> FlushFuture {
        let diff = diff_maps(&job.previous, &job.payload);
        debug!(flush_id = %job.id, changed = diff.len(), "Collection diffed");
        let slots = match self.queue.as_ref() {
            Some(queue) => diff.keys().map(|key| (key.clone(), queue.reserve(key.clone()))).collect(),
            None => BTreeMap::new(),
        };
        let driver = self.driver.clone();
        let serializer = self.pipeline.serializer();
        Box::pin(async move {
            apply_diff(driver, serializer, diff, slots).await.map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SyncFn;
    use crate::error::{CodecError, DriverError};
    use crate::lifecycle::FlushId;
    use crate::storage::memory::{DriverOp, MemoryDriver};

    fn job<T>(previous: T, payload: T) -> FlushJob<T> {
        FlushJob { id: FlushId::new(), payload, previous }
    }

    #[tokio::test]
    async fn test_single_load_absent() {
        let persistence = SinglePersistence {
            driver: Arc::new(MemoryDriver::<&str, u32>::new()),
            key: "counter",
            pipeline: Pipeline::<u32, u32>::identity(),
            queue: None,
        };
        assert_eq!(persistence.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_single_load_unserialize_failure() {
        let persistence = SinglePersistence {
            driver: Arc::new(MemoryDriver::with_entries([("counter", "x".to_string())])),
            key: "counter",
            pipeline: Pipeline::<u32, String>::from_fns(
                |v: &u32| Ok(v.to_string()),
                |s: String| s.parse::<u32>().map_err(|e| CodecError::new(e.to_string())),
            ),
            queue: None,
        };
        let err = persistence.load().await.unwrap_err();
        assert!(matches!(err, PersistError::Unserialize(_)));
    }

    #[tokio::test]
    async fn test_single_flush_serialize_failure_skips_driver() {
        let driver = Arc::new(MemoryDriver::<&str, u32>::new());
        let persistence = SinglePersistence {
            driver: driver.clone(),
            key: "counter",
            pipeline: Pipeline::<u32, u32>::identity()
                .with_serializer(SyncFn(|_: &u32| Err::<u32, _>(CodecError::new("nope")))),
            queue: Some(WriteQueue::new()),
        };

        let err = persistence.flush(job(0, 1)).await.unwrap_err();

        assert_eq!(err, PersistError::Serialize(CodecError::new("nope")));
        assert!(driver.ops().is_empty());
    }

    #[tokio::test]
    async fn test_map_flush_writes_only_the_diff() {
        let driver = Arc::new(MemoryDriver::<&str, u32>::new());
        let persistence = MapPersistence {
            driver: driver.clone(),
            pipeline: Pipeline::<u32, u32>::identity(),
            queue: None,
        };
        let previous = BTreeMap::from([("a", 1), ("b", 2)]);
        let next = BTreeMap::from([("a", 1)]);

        persistence.flush(job(previous, next)).await.unwrap();

        assert_eq!(driver.mutations(), vec![DriverOp::Remove("b")]);
    }

    #[tokio::test]
    async fn test_map_load_empty_collection_still_hydrates() {
        let persistence = MapPersistence {
            driver: Arc::new(MemoryDriver::<&str, u32>::new()),
            pipeline: Pipeline::<u32, u32>::identity(),
            queue: None,
        };
        assert_eq!(persistence.load().await.unwrap(), Some(BTreeMap::new()));
    }

    #[tokio::test]
    async fn test_map_load_read_failure() {
        struct Broken;

        #[async_trait::async_trait]
        impl CollectionDriver<&'static str, u32> for Broken {
            async fn read_all(&self) -> Result<BTreeMap<&'static str, u32>, DriverError> {
                Err(DriverError::Backend("offline".into()))
            }
            async fn write(&self, _key: &&'static str, _value: u32) -> Result<(), DriverError> {
                Ok(())
            }
            async fn remove(&self, _key: &&'static str) -> Result<(), DriverError> {
                Ok(())
            }
        }

        let persistence = MapPersistence::<&str, u32, u32, Broken> {
            driver: Arc::new(Broken),
            pipeline: Pipeline::<u32, u32>::identity(),
            queue: None,
        };
        let err = persistence.load().await.unwrap_err();
        assert_eq!(err, PersistError::Read(DriverError::Backend("offline".into())));
    }

    /// Collects formatted log output for the current thread.
    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_flush_logs_carry_the_flush_id() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();

        let single = SinglePersistence {
            driver: Arc::new(MemoryDriver::<&str, u32>::new()),
            key: "counter",
            pipeline: Pipeline::<u32, u32>::identity(),
            queue: None,
        };
        let single_job = job(0, 1);
        let single_id = single_job.id.to_string();
        runtime.block_on(single.flush(single_job)).unwrap();

        let map = MapPersistence {
            driver: Arc::new(MemoryDriver::<&str, u32>::new()),
            pipeline: Pipeline::<u32, u32>::identity(),
            queue: None,
        };
        let map_job = job(BTreeMap::new(), BTreeMap::from([("a", 1)]));
        let map_id = map_job.id.to_string();
        runtime.block_on(map.flush(map_job)).unwrap();

        let output = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(output.contains(&single_id), "{output}");
        assert!(output.contains(&map_id), "{output}");
    }
}
