// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage driver contracts and the in-memory reference driver.
//!
//! Drivers are external collaborators: the engine only ever calls the
//! operations in [`traits`]. A driver may also arrive late, which is what
//! [`DriverSource`] models.

pub mod memory;
pub mod traits;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::DriverError;

type PendingDriver<D> = Pin<Box<dyn Future<Output = Result<Arc<D>, DriverError>> + Send>>;

/// A driver that is either usable now or still initializing.
pub enum DriverSource<D: ?Sized> {
    Ready(Arc<D>),
    Pending(PendingDriver<D>),
}

impl<D: ?Sized> DriverSource<D> {
    /// Driver usable right away.
    pub fn ready(driver: Arc<D>) -> Self {
        Self::Ready(driver)
    }

    /// Driver delivered by a future (e.g. a connection being opened).
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<Arc<D>, DriverError>> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }

    pub(crate) async fn resolve(self) -> Result<Arc<D>, DriverError> {
        match self {
            Self::Ready(driver) => Ok(driver),
            Self::Pending(future) => future.await,
        }
    }
}

impl<D: ?Sized> From<Arc<D>> for DriverSource<D> {
    fn from(driver: Arc<D>) -> Self {
        Self::Ready(driver)
    }
}
