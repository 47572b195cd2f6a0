// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistence engine.
//!
//! One engine per container + driver pair. It owns:
//! - the write gate (hydrating / writable / read-only)
//! - the debouncer
//! - the in-flight flushes, each wrapped in lifecycle notifications
//! - the one-shot hydration read
//!
//! # Lifecycle
//!
//! ```text
//! WaitingForDriver → WakingUp → Running → Stopped
//!        ↓
//!      Failed
//! ```
//!
//! # Example
//!
//! ```
//! use persist_sync::{with_persistent, DriverSource, EngineState, MemoryDriver, PersistOptions, Store};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let driver = Arc::new(MemoryDriver::with_entries([("theme", "dark".to_string())]));
//! let store = Store::new("light".to_string());
//!
//! let handle = with_persistent(&store, DriverSource::ready(driver.clone()), "theme", PersistOptions::default());
//! assert_eq!(handle.ready().await, EngineState::Running);
//! assert_eq!(store.get(), "dark");
//!
//! store.set("solarized".to_string());
//! handle.shutdown().await;
//! assert_eq!(driver.get(&"theme").as_deref(), Some("solarized"));
//! # }
//! ```

mod flush;
mod handle;
mod hydrate;
mod options;
mod persistence;
mod types;

pub use handle::PersistHandle;
pub use options::PersistOptions;
pub use types::EngineState;

use std::collections::BTreeMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, Instrument};

use crate::debounce::Debouncer;
use crate::error::{DriverError, PersistError};
use crate::fault::FaultChannel;
use crate::gate::WriteGate;
use crate::lifecycle::FlushNotifier;
use crate::metrics;
use crate::storage::traits::{CollectionDriver, SingleDriver};
use crate::storage::DriverSource;
use crate::store::{Change, Store, WakeUp, WeakStore};
use crate::write_queue::WriteQueue;

use handle::Command;
use persistence::{LoadFuture, MapPersistence, Persistence, SinglePersistence};

type Connect<T> = Pin<Box<dyn Future<Output = Result<Arc<dyn Persistence<T>>, DriverError>> + Send>>;

/// Persist a single value under `key`.
///
/// Spawns the engine on the current tokio runtime and returns immediately.
/// Once the driver is available the engine reads the persisted value once,
/// applies it to the container (or the configured wake-up target) and from
/// then on writes every admitted change back.
pub fn with_persistent<K, V, S, D>(
    store: &Store<V>,
    driver: DriverSource<D>,
    key: K,
    options: PersistOptions<V, V, S>,
) -> PersistHandle
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: Send + 'static,
    D: SingleDriver<K, S> + ?Sized + 'static,
{
    let pipeline = options.pipeline.clone();
    let queue = options.config.serialize_writes_per_key.then(WriteQueue::new);
    let connect: Connect<V> = Box::pin(async move {
        let driver = driver.resolve().await?;
        Ok::<_, DriverError>(Arc::new(SinglePersistence { driver, key, pipeline, queue }) as Arc<dyn Persistence<V>>)
    });
    spawn_engine(store, connect, options, "single")
}

/// Persist a keyed collection, one driver entry per key.
///
/// Each flush writes only the entries that were added or changed and removes
/// only the entries that disappeared since the previous flush.
pub fn with_persistent_map<K, V, S, D>(
    store: &Store<BTreeMap<K, V>>,
    driver: DriverSource<D>,
    options: PersistOptions<BTreeMap<K, V>, V, S>,
) -> PersistHandle
where
    K: Ord + Hash + Clone + Send + Sync + 'static,
    V: PartialEq + Clone + Send + Sync + 'static,
    S: Send + 'static,
    D: CollectionDriver<K, S> + ?Sized + 'static,
{
    let pipeline = options.pipeline.clone();
    let queue = options.config.serialize_writes_per_key.then(WriteQueue::new);
    let connect: Connect<BTreeMap<K, V>> = Box::pin(async move {
        let driver = driver.resolve().await?;
        Ok::<_, DriverError>(Arc::new(MapPersistence { driver, pipeline, queue }) as Arc<dyn Persistence<BTreeMap<K, V>>>)
    });
    spawn_engine(store, connect, options, "collection")
}

fn spawn_engine<T, V, S>(
    store: &Store<T>,
    connect: Connect<T>,
    options: PersistOptions<T, V, S>,
    mode: &'static str,
) -> PersistHandle
where
    T: Clone + Send + Sync + 'static,
{
    let faults = FaultChannel::new(options.config.fault_channel_capacity);
    let read_only = options.read_only.clone();
    let gate = WriteGate::new(read_only.as_ref().map_or(false, |rx| *rx.borrow()));
    let (state_tx, state_rx) = watch::channel(EngineState::WaitingForDriver);
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let handle = PersistHandle::new(state_rx, gate.subscribe(), faults.clone(), command_tx);

    let setup = Setup {
        container: store.downgrade(),
        wake_up: options
            .wake_up
            .clone()
            .unwrap_or_else(|| Arc::new(store.downgrade()) as Arc<dyn WakeUp<T>>),
        debouncer: Debouncer::new(options.resolved_delay()),
        notifier: FlushNotifier::new(options.observer.clone(), faults.clone()),
        gate,
        read_only,
        faults,
        state: state_tx,
    };

    tokio::spawn(run(setup, connect, command_rx).instrument(tracing::info_span!("persist", mode = mode)));
    handle
}

/// Everything an engine needs before its driver is available.
struct Setup<T> {
    container: WeakStore<T>,
    wake_up: Arc<dyn WakeUp<T>>,
    debouncer: Debouncer<T>,
    notifier: FlushNotifier,
    gate: WriteGate,
    read_only: Option<watch::Receiver<bool>>,
    faults: FaultChannel,
    state: watch::Sender<EngineState>,
}

struct Engine<T> {
    /// Held weakly: the engine ends once the application drops the container
    container: WeakStore<T>,
    wake_up: Arc<dyn WakeUp<T>>,
    debouncer: Debouncer<T>,
    notifier: FlushNotifier,
    gate: WriteGate,
    read_only: Option<watch::Receiver<bool>>,
    faults: FaultChannel,
    state: watch::Sender<EngineState>,
    persistence: Arc<dyn Persistence<T>>,
    /// Payload of the most recently dispatched flush
    last_queued: T,
    /// Changes up to this sequence number are already covered by a scheduled value
    covered_through: u64,
    in_flight: JoinSet<()>,
}

async fn run<T>(setup: Setup<T>, connect: Connect<T>, mut commands: mpsc::UnboundedReceiver<Command>)
where
    T: Clone + Send + Sync + 'static,
{
    set_state(&setup.state, EngineState::WaitingForDriver);

    let persistence = tokio::select! {
        connected = connect => match connected {
            Ok(persistence) => persistence,
            Err(err) => {
                setup.faults.report(PersistError::DriverUnavailable(err));
                set_state(&setup.state, EngineState::Failed);
                return;
            }
        },
        Some(Command::Shutdown { done, .. }) = commands.recv() => {
            info!("Shut down before the driver became available");
            set_state(&setup.state, EngineState::Stopped);
            let _ = done.send(());
            return;
        }
    };

    // Subscribe only now, so changes made while the driver was pending are
    // never written back
    let Some((seq, initial, changes)) = setup.container.reader().map(|reader| reader.subscribe_from()) else {
        info!("Container dropped before the driver became available");
        set_state(&setup.state, EngineState::Stopped);
        return;
    };
    let loading = persistence.load();

    let engine = Engine {
        container: setup.container,
        wake_up: setup.wake_up,
        debouncer: setup.debouncer,
        notifier: setup.notifier,
        gate: setup.gate,
        read_only: setup.read_only,
        faults: setup.faults,
        state: setup.state,
        persistence,
        last_queued: initial,
        covered_through: seq,
        in_flight: JoinSet::new(),
    };
    engine.run(loading, changes, commands).await;
}

impl<T> Engine<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn run(
        mut self,
        loading: LoadFuture<T>,
        mut changes: crate::store::Changes<T>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut hydration = Some(tokio::spawn(loading));
        self.set_state(EngineState::WakingUp);

        loop {
            tokio::select! {
                Some(command) = commands.recv() => match command {
                    Command::Shutdown { deliver_pending, done } => {
                        if let Some(hydration) = hydration.take() {
                            hydration.abort();
                        }
                        // Changes made before the command was sent are admitted first
                        while let Some(change) = changes.try_next() {
                            self.on_change(change);
                        }
                        self.shutdown(deliver_pending).await;
                        let _ = done.send(());
                        return;
                    }
                },
                change = changes.next() => match change {
                    Some(change) => self.on_change(change),
                    None => {
                        info!("Container dropped, shutting down");
                        if let Some(hydration) = hydration.take() {
                            hydration.abort();
                        }
                        self.shutdown(true).await;
                        return;
                    }
                },
                changed = read_only_changed(&mut self.read_only) => match changed {
                    Ok(()) => self.sync_read_only(),
                    Err(_) => {
                        debug!("Read-only signal dropped, keeping its last value");
                        self.read_only = None;
                    }
                },
                loaded = join_hydration(&mut hydration), if hydration.is_some() => {
                    hydration = None;
                    self.on_loaded(loaded);
                    self.set_state(EngineState::Running);
                }
                value = self.debouncer.expired() => self.dispatch(value),
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(err) = joined {
                        debug!(error = %err, "Flush task ended abnormally");
                    }
                    metrics::set_flushes_in_flight(self.in_flight.len());
                }
            }
        }
    }

    fn on_change(&mut self, change: Change<T>) {
        // The signal may have moved since this change was queued
        self.sync_read_only();

        if change.seq <= self.covered_through {
            debug!(seq = change.seq, "Change already covered by a scheduled flush");
            return;
        }
        if !self.gate.admit(change.seq) {
            debug!(seq = change.seq, gate = %self.gate.state(), "Change not admitted");
            return;
        }
        self.schedule(change.value);
    }

    fn set_state(&self, state: EngineState) {
        set_state(&self.state, state);
    }
}

fn set_state(tx: &watch::Sender<EngineState>, state: EngineState) {
    metrics::set_engine_state(&state.to_string());
    info!(state = %state, "Persistence engine state changed");
    tx.send_replace(state);
}

async fn read_only_changed(rx: &mut Option<watch::Receiver<bool>>) -> Result<(), watch::error::RecvError> {
    match rx {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}

async fn join_hydration<T>(
    handle: &mut Option<JoinHandle<Result<Option<T>, PersistError>>>,
) -> Result<Result<Option<T>, PersistError>, tokio::task::JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
