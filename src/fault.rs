// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Diagnostic sink for every failure an engine catches.
//!
//! Each fault is logged once, counted once, and broadcast to subscribers.
//! Nothing reported here ever stops the engine.

use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::error::{FaultKind, PersistError};
use crate::metrics;

#[derive(Clone)]
pub struct FaultChannel {
    tx: broadcast::Sender<PersistError>,
}

impl FaultChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn report(&self, fault: PersistError) {
        let kind = fault.kind();
        match kind {
            FaultKind::DriverUnavailable => error!(kind = %kind, error = %fault, "Persistence fault"),
            _ => warn!(kind = %kind, error = %fault, "Persistence fault"),
        }
        metrics::record_fault(kind);
        // No subscribers is fine: the log line above is the fault's record
        let _ = self.tx.send(fault);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PersistError> {
        self.tx.subscribe()
    }
}
