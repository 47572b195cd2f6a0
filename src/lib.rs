//! # Persist Sync
//!
//! Keeps an observable in-memory value and its copy in a key-value storage
//! driver eventually consistent, with as few writes as possible.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Store (container)                       │
//! │  • Application mutates freely                               │
//! │  • Every mutation numbered and streamed to subscribers      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ changes
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Write Gate                           │
//! │  • Hydrating │ Writable │ ReadOnly                          │
//! │  • Catch-up flush when read-only ends                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ admitted changes
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Debounced Dispatcher                     │
//! │  • One pending value, last one wins                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ flush jobs (start/done/fail/finally)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Serialization Pipeline → Storage Driver            │
//! │  • Single value: one keyed write                            │
//! │  • Collection: per-key diff of writes and removals          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! At startup the engine reads the persisted value once and applies it to
//! the container ("hydration") while the gate holds every write back, so
//! the hydrated value is never written again.
//!
//! ## Quick Start
//!
//! ```rust
//! use persist_sync::{with_persistent_map, DriverSource, MemoryDriver, PersistOptions, Store};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let driver = Arc::new(MemoryDriver::<String, u32>::new());
//! let scores = Store::new(BTreeMap::<String, u32>::new());
//!
//! let handle = with_persistent_map(
//!     &scores,
//!     DriverSource::ready(driver.clone()),
//!     PersistOptions::default().flush_delay(Duration::from_millis(50)),
//! );
//! handle.ready().await;
//!
//! scores.update(|m| {
//!     let mut m = m.clone();
//!     m.insert("alice".to_string(), 3);
//!     m
//! });
//!
//! handle.shutdown().await;
//! assert_eq!(driver.get(&"alice".to_string()), Some(3));
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The engine, [`with_persistent`] and [`with_persistent_map`]
//! - [`store`]: Observable container and wake-up targets
//! - [`storage`]: Driver contracts and the in-memory driver
//! - [`codec`]: Serialization pipeline
//! - [`debounce`]: Debounced dispatcher and [`flush_delayed`]
//! - [`gate`]: Write gate state machine
//! - [`lifecycle`]: Flush lifecycle hooks
//! - [`diff`]: Collection diffing
//! - [`write_queue`]: Optional per-key write ordering
//! - [`resilience`]: Caller-side retry

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod diff;
pub mod error;
pub mod fault;
pub mod gate;
pub mod lifecycle;
pub mod metrics;
pub mod resilience;
pub mod storage;
pub mod store;
pub mod write_queue;

pub use codec::{AsyncFn, Identity, Json, Pipeline, Serializer, SyncFn, Unserializer};
pub use config::{PersistConfig, DEFAULT_FLUSH_DELAY};
pub use coordinator::{with_persistent, with_persistent_map, EngineState, PersistHandle, PersistOptions};
pub use debounce::{flush_delayed, DebounceHandle, Debouncer, FlushDelay};
pub use diff::{apply_diff, diff_maps, DiffStats, MapDiff};
pub use error::{CodecError, DriverError, FaultKind, PersistError, PersistResult, WakeUpError};
pub use fault::FaultChannel;
pub use gate::{GateState, GateTransition, WriteGate};
pub use lifecycle::{ChannelObserver, FlushId, FlushNotifier, LifecycleEvent, NoopObserver, PersistObserver};
pub use metrics::LatencyTimer;
pub use resilience::retry::{retry, RetryConfig, RetryDriver};
pub use storage::memory::{DriverOp, MemoryDriver};
pub use storage::traits::{CollectionDriver, SingleDriver};
pub use storage::DriverSource;
pub use store::{wake_up_fn, Change, Changes, FnWakeUp, Store, StoreReader, WakeUp};
pub use write_queue::{WriteQueue, WriteSlot};
