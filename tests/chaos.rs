//! Chaos testing for the persistence engine.
//!
//! Failures are injected through driver wrappers, codec closures, hooks and
//! wake-up targets. In every case the engine must report the failure once,
//! keep the container intact and carry on with the next change.
//!
//! Run with: `cargo test --test chaos`

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::sleep;

use persist_sync::{
    wake_up_fn, with_persistent, with_persistent_map, ChannelObserver, CodecError, CollectionDriver, DriverError,
    DriverOp, DriverSource, EngineState, FaultKind, FlushId, LifecycleEvent, MemoryDriver, PersistConfig,
    PersistError, PersistObserver, PersistOptions, Pipeline, RetryConfig, RetryDriver, SingleDriver, Store,
    WakeUpError,
};

async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

// =============================================================================
// Failing Driver Wrappers - Precise Error Injection
// =============================================================================

/// Wraps a memory driver; reads and writes fail while the matching switch is on.
struct FailingDriver {
    inner: MemoryDriver<String, u32>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    panic_on_write: AtomicBool,
}

impl FailingDriver {
    fn new(inner: MemoryDriver<String, u32>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            panic_on_write: AtomicBool::new(false),
        }
    }

    fn check_write(&self) -> Result<(), DriverError> {
        if self.panic_on_write.load(Ordering::SeqCst) {
            panic!("driver exploded");
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DriverError::Backend("disk full".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SingleDriver<String, u32> for FailingDriver {
    async fn read(&self, key: &String) -> Result<Option<u32>, DriverError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DriverError::Backend("read timeout".into()));
        }
        SingleDriver::read(&self.inner, key).await
    }

    async fn write(&self, key: &String, value: u32) -> Result<(), DriverError> {
        self.check_write()?;
        SingleDriver::write(&self.inner, key, value).await
    }
}

#[async_trait]
impl CollectionDriver<String, u32> for FailingDriver {
    async fn read_all(&self) -> Result<BTreeMap<String, u32>, DriverError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DriverError::Backend("read timeout".into()));
        }
        self.inner.read_all().await
    }

    async fn write(&self, key: &String, value: u32) -> Result<(), DriverError> {
        if key == "poison" {
            return Err(DriverError::Backend("rejected key".into()));
        }
        self.check_write()?;
        CollectionDriver::write(&self.inner, key, value).await
    }

    async fn remove(&self, key: &String) -> Result<(), DriverError> {
        self.check_write()?;
        self.inner.remove(key).await
    }
}

/// Delays each write by its value in milliseconds.
struct VariableLatencyDriver {
    inner: MemoryDriver<String, u32>,
}

#[async_trait]
impl SingleDriver<String, u32> for VariableLatencyDriver {
    async fn read(&self, key: &String) -> Result<Option<u32>, DriverError> {
        SingleDriver::read(&self.inner, key).await
    }

    async fn write(&self, key: &String, value: u32) -> Result<(), DriverError> {
        sleep(Duration::from_millis(u64::from(value))).await;
        SingleDriver::write(&self.inner, key, value).await
    }
}

/// Fails the first `failures` writes, then delegates.
struct FlakyDriver {
    inner: MemoryDriver<String, u32>,
    failures: AtomicUsize,
}

#[async_trait]
impl SingleDriver<String, u32> for FlakyDriver {
    async fn read(&self, key: &String) -> Result<Option<u32>, DriverError> {
        SingleDriver::read(&self.inner, key).await
    }

    async fn write(&self, key: &String, value: u32) -> Result<(), DriverError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(DriverError::Backend("connection reset".into()));
        }
        SingleDriver::write(&self.inner, key, value).await
    }
}

/// Panics in one chosen hook and forwards every notification.
struct PanickingObserver {
    forward: ChannelObserver,
}

impl PersistObserver for PanickingObserver {
    fn on_flush_start(&self, id: &FlushId) {
        self.forward.on_flush_start(id);
        panic!("observer bug");
    }

    fn on_flush_done(&self, id: &FlushId) {
        self.forward.on_flush_done(id);
    }

    fn on_flush_fail(&self, id: &FlushId, error: &PersistError) {
        self.forward.on_flush_fail(id, error);
    }

    fn on_flush_finally(&self, id: &FlushId) {
        self.forward.on_flush_finally(id);
    }
}

fn key() -> String {
    "n".to_string()
}

// =============================================================================
// Write path
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_write_failure_fires_fail_then_finally_and_engine_continues() {
    let driver = Arc::new(FailingDriver::new(MemoryDriver::new()));
    let store = Store::new(0u32);
    let (observer, mut events) = ChannelObserver::new();

    let handle = with_persistent(
        &store,
        DriverSource::ready(driver.clone()),
        key(),
        PersistOptions::default().observer(observer),
    );
    let mut faults = handle.faults();
    handle.ready().await;

    driver.fail_writes.store(true, Ordering::SeqCst);
    store.set(1);
    settle().await;

    let expected = PersistError::Write(DriverError::Backend("disk full".into()));
    let LifecycleEvent::FlushStart(id) = events.try_recv().unwrap() else {
        panic!("expected flush start");
    };
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::FlushFail(id.clone(), expected.clone()));
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::FlushFinally(id));
    assert_eq!(faults.try_recv().unwrap(), expected);
    assert_eq!(faults.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(store.get(), 1, "container untouched by a failed write");

    driver.fail_writes.store(false, Ordering::SeqCst);
    store.set(2);
    settle().await;

    assert_eq!(driver.inner.get(&key()), Some(2));
    assert_eq!(handle.state(), EngineState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_driver_reports_aborted_flush() {
    let driver = Arc::new(FailingDriver::new(MemoryDriver::new()));
    let store = Store::new(0u32);
    let (observer, mut events) = ChannelObserver::new();

    let handle = with_persistent(
        &store,
        DriverSource::ready(driver.clone()),
        key(),
        PersistOptions::default().observer(observer),
    );
    let mut faults = handle.faults();
    handle.ready().await;

    driver.panic_on_write.store(true, Ordering::SeqCst);
    store.set(1);
    settle().await;

    let fault = faults.try_recv().unwrap();
    assert_eq!(fault.kind(), FaultKind::WriteFailure);
    assert!(fault.to_string().contains("driver exploded"));

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| match event {
            LifecycleEvent::FlushStart(_) => "start",
            LifecycleEvent::FlushDone(_) => "done",
            LifecycleEvent::FlushFail(..) => "fail",
            LifecycleEvent::FlushFinally(_) => "finally",
            _ => "hydrate",
        })
        .collect();
    assert_eq!(kinds, vec!["start", "fail", "finally"]);

    driver.panic_on_write.store(false, Ordering::SeqCst);
    store.set(2);
    settle().await;
    assert_eq!(driver.inner.get(&key()), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_serialize_failure_blocks_write() {
    let driver = Arc::new(MemoryDriver::<String, u32>::new());
    let store = Store::new(0u32);
    let (observer, mut events) = ChannelObserver::new();

    let pipeline = Pipeline::from_fns(
        |v: &u32| if *v == 13 { Err(CodecError::new("unlucky")) } else { Ok(*v) },
        |raw: u32| Ok(raw),
    );
    let handle = with_persistent(
        &store,
        DriverSource::ready(driver.clone()),
        key(),
        PersistOptions::new(pipeline).observer(observer),
    );
    let mut faults = handle.faults();
    handle.ready().await;

    store.set(13);
    settle().await;

    assert!(driver.mutations().is_empty());
    assert_eq!(faults.try_recv().unwrap(), PersistError::Serialize(CodecError::new("unlucky")));
    assert!(std::iter::from_fn(|| events.try_recv().ok())
        .any(|event| matches!(event, LifecycleEvent::FlushFail(_, PersistError::Serialize(_)))));

    store.set(14);
    settle().await;
    assert_eq!(driver.mutations(), vec![DriverOp::Write(key(), 14)]);
}

#[tokio::test(start_paused = true)]
async fn test_hook_panic_is_reported_and_flush_completes() {
    let driver = Arc::new(MemoryDriver::<String, u32>::new());
    let store = Store::new(0u32);
    let (forward, mut events) = ChannelObserver::new();

    let handle = with_persistent(
        &store,
        DriverSource::ready(driver.clone()),
        key(),
        PersistOptions::default().observer(PanickingObserver { forward }),
    );
    let mut faults = handle.faults();
    handle.ready().await;

    store.set(1);
    settle().await;

    assert_eq!(driver.get(&key()), Some(1));
    match faults.try_recv().unwrap() {
        PersistError::Hook { hook, message } => {
            assert_eq!(hook, "on_flush_start");
            assert!(message.contains("observer bug"));
        }
        other => panic!("unexpected fault: {other:?}"),
    }

    let LifecycleEvent::FlushStart(id) = events.try_recv().unwrap() else {
        panic!("expected flush start");
    };
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::FlushDone(id.clone()));
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::FlushFinally(id));

    // Still flushing afterwards
    store.set(2);
    settle().await;
    assert_eq!(driver.get(&key()), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_collection_write_failure_still_applies_other_keys() {
    let driver = Arc::new(FailingDriver::new(MemoryDriver::new()));
    let store = Store::new(BTreeMap::<String, u32>::new());

    let handle = with_persistent_map(&store, DriverSource::ready(driver.clone()), PersistOptions::default());
    let mut faults = handle.faults();
    handle.ready().await;

    store.set(BTreeMap::from([("ok".to_string(), 1), ("poison".to_string(), 2)]));
    settle().await;

    assert_eq!(driver.inner.get(&"ok".to_string()), Some(1));
    assert_eq!(
        faults.try_recv().unwrap(),
        PersistError::Write(DriverError::Backend("rejected key".into()))
    );
    assert_eq!(faults.try_recv().unwrap_err(), TryRecvError::Empty);
}

// =============================================================================
// Driver availability and hydration
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_rejected_driver_fails_engine_once() {
    let store = Store::new(0u32);
    let source = DriverSource::<MemoryDriver<String, u32>>::pending(async {
        sleep(Duration::from_millis(10)).await;
        Err(DriverError::Unavailable("connection refused".into()))
    });

    let handle = with_persistent(&store, source, key(), PersistOptions::default());
    let mut faults = handle.faults();

    assert_eq!(handle.ready().await, EngineState::Failed);
    let fault = faults.try_recv().unwrap();
    assert_eq!(fault.kind(), FaultKind::DriverUnavailable);
    assert_eq!(fault, PersistError::DriverUnavailable(DriverError::Unavailable("connection refused".into())));

    store.set(1);
    settle().await;
    assert_eq!(faults.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(handle.state(), EngineState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_skips_hydration_and_keeps_writing() {
    let driver = Arc::new(FailingDriver::new(MemoryDriver::with_entries([(key(), 7)])));
    driver.fail_reads.store(true, Ordering::SeqCst);
    let store = Store::new(0u32);
    let (observer, mut events) = ChannelObserver::new();

    let handle = with_persistent(
        &store,
        DriverSource::ready(driver.clone()),
        key(),
        PersistOptions::default().observer(observer),
    );
    let mut faults = handle.faults();
    assert_eq!(handle.ready().await, EngineState::Running);

    assert_eq!(store.get(), 0);
    assert_eq!(faults.try_recv().unwrap().kind(), FaultKind::ReadFailure);
    assert!(events.try_recv().is_err(), "hydrate hooks only fire for a hydrated value");

    store.set(1);
    settle().await;
    assert_eq!(driver.inner.get(&key()), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_unserialize_failure_leaves_container_untouched() {
    let driver = Arc::new(MemoryDriver::with_entries([(key(), "{not json".to_string())]));
    let store = Store::new(5u32);

    let handle = with_persistent(&store, DriverSource::ready(driver.clone()), key(), PersistOptions::new(Pipeline::json()));
    let mut faults = handle.faults();
    assert_eq!(handle.ready().await, EngineState::Running);

    assert_eq!(store.get(), 5);
    assert!(matches!(faults.try_recv().unwrap(), PersistError::Unserialize(_)));

    store.set(6);
    settle().await;
    assert_eq!(driver.get(&key()).as_deref(), Some("6"));
}

#[tokio::test(start_paused = true)]
async fn test_wake_up_refusal_is_reported() {
    let driver = Arc::new(MemoryDriver::with_entries([(key(), 7u32)]));
    let store = Store::new(0u32);
    let (observer, mut events) = ChannelObserver::new();

    let options = PersistOptions::default()
        .observer(observer)
        .wake_up(wake_up_fn(|_: u32| Err(WakeUpError::new("schema mismatch"))));
    let handle = with_persistent(&store, DriverSource::ready(driver.clone()), key(), options);
    let mut faults = handle.faults();
    handle.ready().await;

    assert_eq!(faults.try_recv().unwrap(), PersistError::WakeUp(WakeUpError::new("schema mismatch")));
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::BeforeHydrate);
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::AfterHydrate);
    assert_eq!(handle.gate_state(), persist_sync::GateState::Writable);
}

#[tokio::test(start_paused = true)]
async fn test_wake_up_panic_releases_gate() {
    let driver = Arc::new(MemoryDriver::with_entries([(key(), 7u32)]));
    let store = Store::new(0u32);

    let options = PersistOptions::default().wake_up(wake_up_fn(|_: u32| -> Result<(), WakeUpError> {
        panic!("wake-up target crashed")
    }));
    let handle = with_persistent(&store, DriverSource::ready(driver.clone()), key(), options);
    let mut faults = handle.faults();
    handle.ready().await;

    let fault = faults.try_recv().unwrap();
    assert_eq!(fault.kind(), FaultKind::ConversionFailure);
    assert!(fault.to_string().contains("wake-up target crashed"));

    store.set(1);
    settle().await;
    assert_eq!(driver.get(&key()), Some(1));
}

// =============================================================================
// Ordering and retry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_overlapping_writes_can_land_out_of_order() {
    let driver = Arc::new(VariableLatencyDriver { inner: MemoryDriver::new() });
    let store = Store::new(0u32);

    let handle = with_persistent(&store, DriverSource::ready(driver.clone()), key(), PersistOptions::default());
    handle.ready().await;

    store.set(50);
    store.set(5);
    sleep(Duration::from_millis(100)).await;

    // Fire-and-forget: the slow first write lands last
    assert_eq!(driver.inner.get(&key()), Some(50));
}

#[tokio::test(start_paused = true)]
async fn test_write_queue_keeps_submission_order() {
    let driver = Arc::new(VariableLatencyDriver { inner: MemoryDriver::new() });
    let store = Store::new(0u32);

    let options = PersistOptions::default().config(PersistConfig {
        serialize_writes_per_key: true,
        ..Default::default()
    });
    let handle = with_persistent(&store, DriverSource::ready(driver.clone()), key(), options);
    handle.ready().await;

    store.set(50);
    store.set(5);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(driver.inner.mutations(), vec![DriverOp::Write(key(), 50), DriverOp::Write(key(), 5)]);
    assert_eq!(driver.inner.get(&key()), Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_retry_driver_absorbs_transient_faults() {
    let flaky = Arc::new(FlakyDriver { inner: MemoryDriver::new(), failures: AtomicUsize::new(2) });
    let driver = Arc::new(RetryDriver::new(
        flaky.clone(),
        RetryConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            factor: 2.0,
            max_retries: Some(5),
        },
    ));
    let store = Store::new(0u32);

    let handle = with_persistent(&store, DriverSource::ready(driver), key(), PersistOptions::default());
    let mut faults = handle.faults();
    handle.ready().await;

    store.set(9);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(flaky.inner.get(&key()), Some(9));
    assert_eq!(faults.try_recv().unwrap_err(), TryRecvError::Empty);
}

#[tokio::test(start_paused = true)]
async fn test_without_retry_a_transient_fault_is_final() {
    let flaky = Arc::new(FlakyDriver { inner: MemoryDriver::new(), failures: AtomicUsize::new(1) });
    let store = Store::new(0u32);

    let handle = with_persistent(&store, DriverSource::ready(flaky.clone()), key(), PersistOptions::default());
    let mut faults = handle.faults();
    handle.ready().await;

    store.set(9);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(flaky.inner.get(&key()), None);
    assert_eq!(faults.try_recv().unwrap().kind(), FaultKind::WriteFailure);
}
