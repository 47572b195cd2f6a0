//! Gate transitions, scheduling and flush dispatch.
//!
//! A dispatched flush runs on its own task so the engine keeps accepting
//! changes while the driver works. Lifecycle notifications are fired from
//! the task wrapping it, so `on_flush_fail` and `on_flush_finally` still fire
//! when the flush panics.

use tracing::{debug, info};

use crate::error::{panic_message, PersistError};
use crate::gate::GateTransition;
use crate::lifecycle::FlushId;
use crate::metrics::{self, LatencyTimer};

use super::types::FlushJob;
use super::{Engine, EngineState};

impl<T> Engine<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Bring the gate in line with the current read-only signal.
    pub(super) fn sync_read_only(&mut self) {
        let Some(read_only) = self.read_only.as_mut().map(|rx| *rx.borrow_and_update()) else {
            return;
        };

        match self.gate.set_read_only(read_only) {
            GateTransition::Unchanged => {}
            GateTransition::Closed => {
                if self.debouncer.cancel() {
                    debug!("Pending flush dropped");
                }
                info!("Persistence suspended, read-only");
            }
            GateTransition::Reopened => {
                let Some((seq, value)) = self.container.reader().map(|reader| reader.snapshot()) else {
                    return;
                };
                self.covered_through = seq;
                info!(seq = seq, "Persistence resumed, scheduling catch-up flush");
                self.schedule(value);
            }
        }
    }

    pub(super) fn schedule(&mut self, value: T) {
        if let Some(value) = self.debouncer.schedule(value) {
            self.dispatch(value);
        }
    }

    /// Hand `payload` to the driver.
    pub(super) fn dispatch(&mut self, payload: T) {
        let previous = std::mem::replace(&mut self.last_queued, payload.clone());
        let id = FlushId::new();
        debug!(flush_id = %id, "Dispatching flush");

        self.notifier.start(&id);
        // Write queue slots are taken here, in dispatch order
        let flush = self.persistence.flush(FlushJob { id: id.clone(), payload, previous });

        let notifier = self.notifier.clone();
        let faults = self.faults.clone();
        let mode = self.persistence.mode();

        self.in_flight.spawn(async move {
            let timer = LatencyTimer::new(mode);
            let outcome = match tokio::spawn(flush).await {
                Ok(outcome) => outcome,
                Err(join_err) if join_err.is_panic() => {
                    Err(PersistError::Aborted(panic_message(join_err.into_panic().as_ref())))
                }
                Err(_) => Err(PersistError::Aborted("flush cancelled".to_string())),
            };
            drop(timer);
            metrics::record_flush(mode, outcome.is_ok());

            match outcome {
                Ok(()) => {
                    debug!(flush_id = %id, "Flush done");
                    notifier.done(&id);
                }
                Err(err) => {
                    faults.report(err.clone());
                    notifier.fail(&id, &err);
                }
            }
            notifier.finally(&id);
        });
        metrics::set_flushes_in_flight(self.in_flight.len());
    }

    /// Settle the pending value and every in-flight flush, then stop.
    #[tracing::instrument(skip(self))]
    pub(super) async fn shutdown(&mut self, deliver_pending: bool) {
        if deliver_pending {
            if let Some(value) = self.debouncer.take_pending() {
                debug!("Delivering pending flush before shutdown");
                self.dispatch(value);
            }
        } else if self.debouncer.cancel() {
            debug!("Pending flush dropped by stop");
        }

        let in_flight = self.in_flight.len();
        while self.in_flight.join_next().await.is_some() {}
        metrics::set_flushes_in_flight(0);

        info!(in_flight = in_flight, deliver_pending = deliver_pending, "Persistence engine shut down");
        self.set_state(EngineState::Stopped);
    }
}
