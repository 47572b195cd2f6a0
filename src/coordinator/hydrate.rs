// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hydration: apply the persisted value once, without writing it back.
//!
//! The read itself runs concurrently with live updates (it was spawned when
//! the engine subscribed). Only its outcome is handled here:
//!
//! - read or unserialize failed: reported, container untouched
//! - nothing persisted: container untouched
//! - a value: applied to the wake-up target while the gate is `Hydrating`;
//!   the one container mutation it reports is never flushed
//!
//! `on_before_hydrate` / `on_after_hydrate` only fire in the last case.
//! `on_after_hydrate` fires even when the wake-up target refused the value.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::task::JoinError;
use tracing::{debug, info};

use crate::error::{panic_message, DriverError, PersistError, WakeUpError};
use crate::metrics;

use super::Engine;

impl<T> Engine<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(super) fn on_loaded(&mut self, loaded: Result<Result<Option<T>, PersistError>, JoinError>) {
        let mode = self.persistence.mode();
        let loaded = loaded.unwrap_or_else(|join_err| {
            let message = if join_err.is_panic() {
                panic_message(join_err.into_panic().as_ref())
            } else {
                "hydration read cancelled".to_string()
            };
            Err(PersistError::Read(DriverError::Panicked(message)))
        });

        match loaded {
            Err(err) => {
                metrics::record_hydration(mode, "failed");
                self.faults.report(err);
            }
            Ok(None) => {
                metrics::record_hydration(mode, "empty");
                debug!("Nothing persisted yet, skipping hydration");
            }
            Ok(Some(value)) => self.hydrate(value),
        }
    }

    #[tracing::instrument(skip_all, fields(mode = self.persistence.mode()))]
    fn hydrate(&mut self, value: T) {
        let mode = self.persistence.mode();
        self.notifier.before_hydrate();

        let wake_up = self.wake_up.clone();
        let hydrated = value.clone();

        let woke = self.gate.hydrate(|| match catch_unwind(AssertUnwindSafe(|| wake_up.wake_up_seq(value))) {
            Ok(Ok(seq)) => (Ok(seq), seq),
            Ok(Err(err)) => (Err(err), None),
            Err(payload) => (Err(WakeUpError::new(panic_message(payload.as_ref()))), None),
        });

        match woke {
            Ok(seq) => {
                metrics::record_hydration(mode, "hydrated");
                // Next diff is against what is persisted
                self.last_queued = hydrated;
                if let Some(seq) = seq {
                    // Earlier changes were overwritten in the container
                    self.covered_through = self.covered_through.max(seq);
                    if self.debouncer.cancel() {
                        debug!("Pending flush superseded by hydrated value");
                    }
                }
                info!(seq = ?seq, "Hydrated from persistent driver");
            }
            Err(err) => {
                metrics::record_hydration(mode, "failed");
                self.faults.report(PersistError::WakeUp(err));
            }
        }

        self.notifier.after_hydrate();
    }
}
