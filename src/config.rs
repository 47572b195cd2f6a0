//! Configuration for persistence engines.
//!
//! # Example
//!
//! ```
//! use persist_sync::PersistConfig;
//! use std::time::Duration;
//!
//! // Minimal config: every change is flushed immediately
//! let config = PersistConfig::default();
//! assert_eq!(config.flush_delay(), None);
//!
//! // Debounced writes with per-key ordering
//! let config = PersistConfig {
//!     flush_delay_ms: Some(250),
//!     serialize_writes_per_key: true,
//!     ..Default::default()
//! };
//! assert_eq!(config.flush_delay(), Some(Duration::from_millis(250)));
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Default quiet period used by [`crate::flush_delayed`] when no delay is given.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(1000);

/// Configuration for a persistence engine.
///
/// Can be swapped at runtime through a `watch` channel (see
/// [`crate::PersistOptions::live_config`]); only `flush_delay_ms` is re-read
/// after attach, the other fields are fixed when the engine starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersistConfig {
    /// Debounce interval in milliseconds. `None` flushes every change immediately.
    #[serde(default)]
    pub flush_delay_ms: Option<u64>,

    /// Queue writes per key so they reach the driver in submission order
    #[serde(default)]
    pub serialize_writes_per_key: bool,

    /// Capacity of the broadcast channel carrying faults
    #[serde(default = "default_fault_channel_capacity")]
    pub fault_channel_capacity: usize,
}

fn default_fault_channel_capacity() -> usize { 64 }

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: None,
            serialize_writes_per_key: false,
            fault_channel_capacity: default_fault_channel_capacity(),
        }
    }
}

impl PersistConfig {
    /// Debounce interval, `None` meaning synchronous delivery.
    #[must_use]
    pub fn flush_delay(&self) -> Option<Duration> {
        self.flush_delay_ms.map(Duration::from_millis)
    }
}
