// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Flush lifecycle notifications.
//!
//! Every flush handed to a driver produces, in order:
//!
//! ```text
//! on_flush_start → (on_flush_done | on_flush_fail) → on_flush_finally
//! ```
//!
//! all tagged with the same [`FlushId`]. Hooks are invoked through
//! [`FlushNotifier`], which catches a panicking hook, reports it as a
//! `HookFailure` and carries on with the remaining notifications.
//!
//! # Example
//!
//! ```
//! use persist_sync::{ChannelObserver, LifecycleEvent, PersistObserver, FlushId};
//!
//! let (observer, mut events) = ChannelObserver::new();
//! let id = FlushId::new();
//! observer.on_flush_start(&id);
//! observer.on_flush_finally(&id);
//!
//! assert_eq!(events.try_recv().unwrap(), LifecycleEvent::FlushStart(id.clone()));
//! assert_eq!(events.try_recv().unwrap(), LifecycleEvent::FlushFinally(id));
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{panic_message, PersistError};
use crate::fault::FaultChannel;

/// Correlation token for one flush.
///
/// Fresh for every flush and only meaningful compared against itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlushId(Uuid);

impl FlushId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FlushId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FlushId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hooks around flushes and hydration. Every hook defaults to a no-op.
///
/// Hooks run on the engine's task and should return quickly. A hook that
/// panics is reported on the fault channel; it never aborts the flush.
pub trait PersistObserver: Send + Sync {
    /// Before the serialize/write attempt
    fn on_flush_start(&self, _id: &FlushId) {}

    fn on_flush_done(&self, _id: &FlushId) {}

    fn on_flush_fail(&self, _id: &FlushId, _error: &PersistError) {}

    /// Always last, whatever the outcome
    fn on_flush_finally(&self, _id: &FlushId) {}

    /// Immediately before a hydrated value is applied
    fn on_before_hydrate(&self) {}

    /// Immediately after a hydrated value was applied, even if the wake-up
    /// target refused it
    fn on_after_hydrate(&self) {}
}

/// Observer with every hook left as a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PersistObserver for NoopObserver {}

/// One observed lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    FlushStart(FlushId),
    FlushDone(FlushId),
    FlushFail(FlushId, PersistError),
    FlushFinally(FlushId),
    BeforeHydrate,
    AfterHydrate,
}

impl LifecycleEvent {
    /// Correlation id for flush events
    #[must_use]
    pub fn flush_id(&self) -> Option<&FlushId> {
        match self {
            Self::FlushStart(id) | Self::FlushDone(id) | Self::FlushFail(id, _) | Self::FlushFinally(id) => {
                Some(id)
            }
            Self::BeforeHydrate | Self::AfterHydrate => None,
        }
    }
}

/// Observer forwarding every notification into an unbounded channel.
///
/// Useful for tests and for callers that retry failed flushes themselves.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }
}

impl PersistObserver for ChannelObserver {
    fn on_flush_start(&self, id: &FlushId) {
        self.emit(LifecycleEvent::FlushStart(id.clone()));
    }

    fn on_flush_done(&self, id: &FlushId) {
        self.emit(LifecycleEvent::FlushDone(id.clone()));
    }

    fn on_flush_fail(&self, id: &FlushId, error: &PersistError) {
        self.emit(LifecycleEvent::FlushFail(id.clone(), error.clone()));
    }

    fn on_flush_finally(&self, id: &FlushId) {
        self.emit(LifecycleEvent::FlushFinally(id.clone()));
    }

    fn on_before_hydrate(&self) {
        self.emit(LifecycleEvent::BeforeHydrate);
    }

    fn on_after_hydrate(&self) {
        self.emit(LifecycleEvent::AfterHydrate);
    }
}

/// Invokes observer hooks, isolating the engine from hook panics.
#[derive(Clone)]
pub struct FlushNotifier {
    observer: Arc<dyn PersistObserver>,
    faults: FaultChannel,
}

impl FlushNotifier {
    pub fn new(observer: Arc<dyn PersistObserver>, faults: FaultChannel) -> Self {
        Self { observer, faults }
    }

    pub fn start(&self, id: &FlushId) {
        self.fire("on_flush_start", |o| o.on_flush_start(id));
    }

    pub fn done(&self, id: &FlushId) {
        self.fire("on_flush_done", |o| o.on_flush_done(id));
    }

    pub fn fail(&self, id: &FlushId, error: &PersistError) {
        self.fire("on_flush_fail", |o| o.on_flush_fail(id, error));
    }

    pub fn finally(&self, id: &FlushId) {
        self.fire("on_flush_finally", |o| o.on_flush_finally(id));
    }

    pub fn before_hydrate(&self) {
        self.fire("on_before_hydrate", |o| o.on_before_hydrate());
    }

    pub fn after_hydrate(&self) {
        self.fire("on_after_hydrate", |o| o.on_after_hydrate());
    }

    fn fire(&self, hook: &'static str, call: impl FnOnce(&dyn PersistObserver)) {
        let observer = self.observer.as_ref();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| call(observer))) {
            self.faults.report(PersistError::Hook {
                hook,
                message: panic_message(payload.as_ref()),
            });
        }
    }
}
