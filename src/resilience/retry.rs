// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Engines never retry on their own: a failed flush is reported and the next
//! change is flushed as usual. Callers who want transient driver faults
//! retried wrap their driver in [`RetryDriver`], or drive [`retry`]
//! themselves from `on_flush_fail`.
//!
//! # Example
//!
//! ```
//! use persist_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Per-operation: quick retry, then fail
//! let query = RetryConfig::query();
//! assert_eq!(query.max_retries, Some(3));
//!
//! // Background: never give up
//! let daemon = RetryConfig::daemon();
//! assert_eq!(daemon.max_retries, None);
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::DriverError;
use crate::metrics;
use crate::storage::traits::{CollectionDriver, SingleDriver};

/// Backoff policy.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::query()`] - Quick retry for individual driver calls
/// - [`RetryConfig::daemon()`] - Infinite retry for background writers
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts before giving up, `None` for no limit
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// 3 attempts with fast backoff, then the error goes back to the caller.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Retries forever, backoff capped at 5 minutes.
    #[must_use]
    pub fn daemon() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            factor: 2.0,
        }
    }

    /// Delay before the attempt following `delay`
    #[must_use]
    pub fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or `config` gives up.
pub async fn retry<F, Fut, T, E>(operation_name: &'static str, config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, retries = attempts, "Operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                match config.max_retries {
                    Some(max) if attempts >= max => return Err(err),
                    Some(max) => warn!(
                        operation = operation_name,
                        attempt = attempts,
                        max_attempts = max,
                        error = %err,
                        ?delay,
                        "Operation failed, retrying"
                    ),
                    None => warn!(
                        operation = operation_name,
                        attempt = attempts,
                        error = %err,
                        ?delay,
                        "Operation failed, will retry forever"
                    ),
                }
                metrics::record_retry(operation_name, attempts);

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

/// Driver wrapper retrying every failed operation per its [`RetryConfig`].
pub struct RetryDriver<D: ?Sized> {
    inner: Arc<D>,
    config: RetryConfig,
}

impl<D: ?Sized> RetryDriver<D> {
    pub fn new(inner: Arc<D>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &Arc<D> {
        &self.inner
    }
}

#[async_trait]
impl<K, S, D> SingleDriver<K, S> for RetryDriver<D>
where
    K: Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
    D: SingleDriver<K, S> + ?Sized,
{
    async fn read(&self, key: &K) -> Result<Option<S>, DriverError> {
        retry("read", &self.config, || self.inner.read(key)).await
    }

    async fn write(&self, key: &K, value: S) -> Result<(), DriverError> {
        retry("write", &self.config, || self.inner.write(key, value.clone())).await
    }
}

#[async_trait]
impl<K, S, D> CollectionDriver<K, S> for RetryDriver<D>
where
    K: Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
    D: CollectionDriver<K, S> + ?Sized,
{
    async fn read_all(&self) -> Result<BTreeMap<K, S>, DriverError> {
        retry("read_all", &self.config, || self.inner.read_all()).await
    }

    async fn write(&self, key: &K, value: S) -> Result<(), DriverError> {
        retry("write", &self.config, || self.inner.write(key, value.clone())).await
    }

    async fn remove(&self, key: &K) -> Result<(), DriverError> {
        retry("remove", &self.config, || self.inner.remove(key)).await
    }
}
