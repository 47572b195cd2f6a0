// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Caller-side handle to a running engine.

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::error::PersistError;
use crate::fault::FaultChannel;
use crate::gate::GateState;

use super::types::EngineState;

pub(super) enum Command {
    /// Finish up and exit. `deliver_pending` flushes a debounced value
    /// instead of dropping it.
    Shutdown {
        deliver_pending: bool,
        done: oneshot::Sender<()>,
    },
}

/// Handle returned when persistence is attached to a container.
///
/// Dropping the handle detaches it: the engine keeps persisting for as long
/// as the container lives. When every `Store` handle is gone the engine
/// delivers its pending value and stops. Use [`shutdown`](Self::shutdown) or
/// [`stop`](Self::stop) to end it earlier.
pub struct PersistHandle {
    state: watch::Receiver<EngineState>,
    gate: watch::Receiver<GateState>,
    faults: FaultChannel,
    /// Subscribed before the engine started, so nothing is missed
    first_faults: Mutex<Option<broadcast::Receiver<PersistError>>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl PersistHandle {
    pub(super) fn new(
        state: watch::Receiver<EngineState>,
        gate: watch::Receiver<GateState>,
        faults: FaultChannel,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let first_faults = Mutex::new(Some(faults.subscribe()));
        Self { state, gate, faults, first_faults, commands }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    #[must_use]
    pub fn gate_state(&self) -> GateState {
        *self.gate.borrow()
    }

    #[must_use]
    pub fn gate_receiver(&self) -> watch::Receiver<GateState> {
        self.gate.clone()
    }

    /// Subscribe to reported faults.
    ///
    /// The first call returns a receiver that has seen every fault since the
    /// engine was attached; later calls only see faults from then on.
    pub fn faults(&self) -> broadcast::Receiver<PersistError> {
        self.first_faults
            .lock()
            .take()
            .unwrap_or_else(|| self.faults.subscribe())
    }

    /// Wait until startup is over: the engine is `Running`, `Failed` or `Stopped`.
    pub async fn ready(&self) -> EngineState {
        let mut state = self.state.clone();
        if let Ok(settled) = state.wait_for(EngineState::is_settled).await {
            return *settled;
        }
        // Engine gone without settling
        let last = *state.borrow();
        last
    }

    /// Deliver any pending debounced value, wait for in-flight flushes, then stop.
    pub async fn shutdown(self) {
        self.close(true).await;
    }

    /// Drop any pending debounced value, wait for in-flight flushes, then stop.
    pub async fn stop(self) {
        self.close(false).await;
    }

    async fn close(self, deliver_pending: bool) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Shutdown { deliver_pending, done }).is_ok() {
            // Engine already gone when the sender is dropped unanswered
            let _ = finished.await;
        }
    }
}
