// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Serialization pipeline between in-memory values and driver payloads.
//!
//! Both directions are independent: either can be synchronous or
//! asynchronous, either can fail, and either defaults to the identity when
//! the value and payload types are the same.
//!
//! # Example
//!
//! ```
//! use persist_sync::{Pipeline, CodecError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // Store numbers as strings
//! let pipeline: Pipeline<u32, String> = Pipeline::from_fns(
//!     |v: &u32| Ok(v.to_string()),
//!     |s: String| s.parse::<u32>().map_err(|e| CodecError::new(e.to_string())),
//! );
//!
//! assert_eq!(pipeline.serialize(&42).await.unwrap(), "42");
//! assert_eq!(pipeline.unserialize("7".into()).await.unwrap(), 7);
//! assert!(pipeline.unserialize("x".into()).await.is_err());
//! # }
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Outbound conversion, applied before every write.
#[async_trait]
pub trait Serializer<V, S>: Send + Sync {
    async fn serialize(&self, value: &V) -> Result<S, CodecError>;
}

/// Inbound conversion, applied to what hydration reads.
#[async_trait]
pub trait Unserializer<S, V>: Send + Sync {
    async fn unserialize(&self, raw: S) -> Result<V, CodecError>;
}

/// Pass-through conversion for when value and payload are the same type.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

#[async_trait]
impl<V: Clone + Send + Sync> Serializer<V, V> for Identity {
    async fn serialize(&self, value: &V) -> Result<V, CodecError> {
        Ok(value.clone())
    }
}

#[async_trait]
impl<V: Send + 'static> Unserializer<V, V> for Identity {
    async fn unserialize(&self, raw: V) -> Result<V, CodecError> {
        Ok(raw)
    }
}

/// JSON text via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

#[async_trait]
impl<V: Serialize + Sync> Serializer<V, String> for Json {
    async fn serialize(&self, value: &V) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

#[async_trait]
impl<V: DeserializeOwned + Send> Unserializer<String, V> for Json {
    async fn unserialize(&self, raw: String) -> Result<V, CodecError> {
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Plain closure used as a conversion step.
pub struct SyncFn<F>(pub F);

#[async_trait]
impl<V, S, F> Serializer<V, S> for SyncFn<F>
where
    V: Sync,
    S: Send,
    F: Fn(&V) -> Result<S, CodecError> + Send + Sync,
{
    async fn serialize(&self, value: &V) -> Result<S, CodecError> {
        (self.0)(value)
    }
}

#[async_trait]
impl<S, V, F> Unserializer<S, V> for SyncFn<F>
where
    S: Send + 'static,
    V: Send,
    F: Fn(S) -> Result<V, CodecError> + Send + Sync,
{
    async fn unserialize(&self, raw: S) -> Result<V, CodecError> {
        (self.0)(raw)
    }
}

/// Closure returning a future, used as a conversion step.
///
/// The serialize direction hands the closure an owned clone of the value.
pub struct AsyncFn<F, In>(F, PhantomData<fn(In)>);

impl<F, In> AsyncFn<F, In> {
    pub fn new(f: F) -> Self {
        Self(f, PhantomData)
    }
}

#[async_trait]
impl<V, S, F, Fut> Serializer<V, S> for AsyncFn<F, V>
where
    V: Clone + Send + Sync + 'static,
    S: Send,
    F: Fn(V) -> Fut + Send + Sync,
    Fut: Future<Output = Result<S, CodecError>> + Send,
{
    async fn serialize(&self, value: &V) -> Result<S, CodecError> {
        (self.0)(value.clone()).await
    }
}

#[async_trait]
impl<S, V, F, Fut> Unserializer<S, V> for AsyncFn<F, S>
where
    S: Send + 'static,
    V: Send,
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, CodecError>> + Send,
{
    async fn unserialize(&self, raw: S) -> Result<V, CodecError> {
        (self.0)(raw).await
    }
}

/// Both conversion directions for one value type.
pub struct Pipeline<V, S> {
    serializer: Arc<dyn Serializer<V, S>>,
    unserializer: Arc<dyn Unserializer<S, V>>,
}

impl<V, S> Clone for Pipeline<V, S> {
    fn clone(&self) -> Self {
        Self {
            serializer: self.serializer.clone(),
            unserializer: self.unserializer.clone(),
        }
    }
}

impl<V, S> Pipeline<V, S> {
    pub fn new(
        serializer: impl Serializer<V, S> + 'static,
        unserializer: impl Unserializer<S, V> + 'static,
    ) -> Self {
        Self {
            serializer: Arc::new(serializer),
            unserializer: Arc::new(unserializer),
        }
    }

    /// Pipeline from two plain closures
    pub fn from_fns<F, G>(serialize: F, unserialize: G) -> Self
    where
        V: Sync + Send,
        S: Send + 'static,
        F: Fn(&V) -> Result<S, CodecError> + Send + Sync + 'static,
        G: Fn(S) -> Result<V, CodecError> + Send + Sync + 'static,
    {
        Self::new(SyncFn(serialize), SyncFn(unserialize))
    }

    pub fn with_serializer(mut self, serializer: impl Serializer<V, S> + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn with_unserializer(mut self, unserializer: impl Unserializer<S, V> + 'static) -> Self {
        self.unserializer = Arc::new(unserializer);
        self
    }

    pub async fn serialize(&self, value: &V) -> Result<S, CodecError> {
        self.serializer.serialize(value).await
    }

    pub async fn unserialize(&self, raw: S) -> Result<V, CodecError> {
        self.unserializer.unserialize(raw).await
    }

    pub(crate) fn serializer(&self) -> Arc<dyn Serializer<V, S>> {
        self.serializer.clone()
    }
}

impl<V: Clone + Send + Sync + 'static> Pipeline<V, V> {
    /// Both directions pass values through unchanged
    #[must_use]
    pub fn identity() -> Self {
        Self::new(Identity, Identity)
    }
}

impl<V: Clone + Send + Sync + 'static> Default for Pipeline<V, V> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<V: Serialize + DeserializeOwned + Send + Sync> Pipeline<V, String> {
    /// JSON text payloads
    #[must_use]
    pub fn json() -> Self {
        Self::new(Json, Json)
    }
}
