//! Options accepted by [`super::with_persistent`] and [`super::with_persistent_map`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::codec::Pipeline;
use crate::config::PersistConfig;
use crate::debounce::FlushDelay;
use crate::lifecycle::{NoopObserver, PersistObserver};
use crate::store::WakeUp;

/// Builder for engine options.
///
/// `T` is the container value type, `V` the value type the pipeline converts
/// and `S` the payload type the driver stores. For a single value `T == V`;
/// for a collection `T` is `BTreeMap<K, V>` and the pipeline works per entry.
///
/// # Example
///
/// ```
/// use persist_sync::{PersistOptions, PersistConfig, Pipeline};
/// use std::time::Duration;
/// use tokio::sync::watch;
///
/// let (_read_only_tx, read_only) = watch::channel(false);
///
/// let options: PersistOptions<u32, u32, String> = PersistOptions::new(Pipeline::from_fns(
///     |v: &u32| Ok(v.to_string()),
///     |s: String| s.parse().map_err(|e: std::num::ParseIntError| persist_sync::CodecError::new(e.to_string())),
/// ))
/// .flush_delay(Duration::from_millis(250))
/// .read_only(read_only)
/// .config(PersistConfig { serialize_writes_per_key: true, ..Default::default() });
/// ```
pub struct PersistOptions<T, V, S> {
    pub(super) config: PersistConfig,
    pub(super) flush_delay: Option<FlushDelay>,
    pub(super) read_only: Option<watch::Receiver<bool>>,
    pub(super) wake_up: Option<Arc<dyn WakeUp<T>>>,
    pub(super) observer: Arc<dyn PersistObserver>,
    pub(super) pipeline: Pipeline<V, S>,
}

impl<T, V, S> PersistOptions<T, V, S> {
    pub fn new(pipeline: Pipeline<V, S>) -> Self {
        Self {
            config: PersistConfig::default(),
            flush_delay: None,
            read_only: None,
            wake_up: None,
            observer: Arc::new(NoopObserver),
            pipeline,
        }
    }

    /// Static configuration. Its flush delay applies unless
    /// [`flush_delay`](Self::flush_delay) or [`live_config`](Self::live_config)
    /// is also given.
    pub fn config(mut self, config: PersistConfig) -> Self {
        self.config = config;
        self
    }

    /// Debounce every flush by `delay`
    pub fn flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = Some(FlushDelay::Fixed(delay));
        self
    }

    /// Configuration that can change while the engine runs.
    ///
    /// The flush delay is re-read each time a change is scheduled; the other
    /// fields are taken from the value current at attach.
    pub fn live_config(mut self, config: watch::Receiver<PersistConfig>) -> Self {
        self.config = config.borrow().clone();
        self.flush_delay = Some(FlushDelay::Live(config));
        self
    }

    /// Suspend persistence while the signal is `true`
    pub fn read_only(mut self, read_only: watch::Receiver<bool>) -> Self {
        self.read_only = Some(read_only);
        self
    }

    /// Apply hydrated values to `target` instead of the container
    pub fn wake_up(mut self, target: impl WakeUp<T> + 'static) -> Self {
        self.wake_up = Some(Arc::new(target));
        self
    }

    pub fn observer(mut self, observer: impl PersistObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn pipeline(mut self, pipeline: Pipeline<V, S>) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub(super) fn resolved_delay(&self) -> FlushDelay {
        self.flush_delay
            .clone()
            .unwrap_or_else(|| self.config.flush_delay().into())
    }
}

impl<T, V: Clone + Send + Sync + 'static> Default for PersistOptions<T, V, V> {
    fn default() -> Self {
        Self::new(Pipeline::identity())
    }
}
