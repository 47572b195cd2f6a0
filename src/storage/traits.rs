// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::DriverError;

/// Key-value driver persisting one item under one key.
#[async_trait]
pub trait SingleDriver<K, S>: Send + Sync
where
    K: Sync,
    S: Send,
{
    /// Read the persisted item, `None` when nothing was stored yet.
    async fn read(&self, key: &K) -> Result<Option<S>, DriverError>;
    async fn write(&self, key: &K, value: S) -> Result<(), DriverError>;
}

/// Driver persisting a keyed collection one entry at a time.
#[async_trait]
pub trait CollectionDriver<K, S>: Send + Sync
where
    K: Sync,
    S: Send,
{
    /// Read every persisted entry.
    async fn read_all(&self) -> Result<BTreeMap<K, S>, DriverError>;
    async fn write(&self, key: &K, value: S) -> Result<(), DriverError>;
    async fn remove(&self, key: &K) -> Result<(), DriverError>;
}
