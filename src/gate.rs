// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write gate: decides whether an accepted change may reach the driver.
//!
//! The gate is an explicit state recomputed from two inputs, the hydration
//! flag and the external read-only flag:
//!
//! | hydrating | read-only | state       |
//! |-----------|-----------|-------------|
//! | yes       | any       | `Hydrating` |
//! | no        | yes       | `ReadOnly`  |
//! | no        | no        | `Writable`  |
//!
//! Every recomputation is published on a `watch` channel.
//!
//! # Example
//!
//! ```
//! use persist_sync::{WriteGate, GateState, GateTransition};
//!
//! let mut gate = WriteGate::new(true);
//! assert_eq!(gate.state(), GateState::ReadOnly);
//! assert!(!gate.admit(1));
//!
//! assert_eq!(gate.set_read_only(false), GateTransition::Reopened);
//! assert!(gate.admit(2));
//! ```

use tokio::sync::watch;
use tracing::debug;

use crate::metrics;

/// Current gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Hydration is replacing the container value; nothing gets through
    Hydrating,
    /// Changes flow to the driver
    Writable,
    /// Persistence suspended by the read-only input
    ReadOnly,
}

impl GateState {
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Writable)
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hydrating => write!(f, "Hydrating"),
            Self::Writable => write!(f, "Writable"),
            Self::ReadOnly => write!(f, "ReadOnly"),
        }
    }
}

/// Effect of a read-only input change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    Unchanged,
    /// Read-only switched on: pending deliveries must be dropped
    Closed,
    /// Read-only switched off: the current value needs a catch-up flush
    Reopened,
}

/// Gate state machine for one engine.
pub struct WriteGate {
    hydrating: bool,
    read_only: bool,
    /// Mutation made by the hydration replace, if it touched the container
    hydrated_seq: Option<u64>,
    tx: watch::Sender<GateState>,
}

impl WriteGate {
    pub fn new(read_only: bool) -> Self {
        let state = if read_only { GateState::ReadOnly } else { GateState::Writable };
        let (tx, _) = watch::channel(state);
        Self {
            hydrating: false,
            read_only,
            hydrated_seq: None,
            tx,
        }
    }

    #[must_use]
    pub fn state(&self) -> GateState {
        if self.hydrating {
            GateState::Hydrating
        } else if self.read_only {
            GateState::ReadOnly
        } else {
            GateState::Writable
        }
    }

    /// Watch gate state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.tx.subscribe()
    }

    /// Whether the mutation with sequence number `seq` may be flushed.
    #[must_use]
    pub fn admit(&self, seq: u64) -> bool {
        if self.hydrated_seq == Some(seq) {
            return false;
        }
        self.state().is_writable()
    }

    pub fn set_read_only(&mut self, read_only: bool) -> GateTransition {
        if self.read_only == read_only {
            return GateTransition::Unchanged;
        }
        self.read_only = read_only;
        self.publish();
        if read_only {
            GateTransition::Closed
        } else {
            GateTransition::Reopened
        }
    }

    /// Run `mutate` with the gate held in `Hydrating`.
    ///
    /// `mutate` returns its result and the sequence number of the container
    /// mutation it made, if any. Only that mutation is kept out of the driver;
    /// application writes racing with hydration are admitted as usual. The
    /// gate is released on every exit path, panics included.
    pub fn hydrate<R>(&mut self, mutate: impl FnOnce() -> (R, Option<u64>)) -> R {
        struct Release<'a> {
            gate: &'a mut WriteGate,
        }

        impl Drop for Release<'_> {
            fn drop(&mut self) {
                self.gate.hydrating = false;
                self.gate.publish();
                debug!(seq = ?self.gate.hydrated_seq, "Hydration window closed");
            }
        }

        self.hydrating = true;
        self.hydrated_seq = None;
        self.publish();
        let mut release = Release { gate: self };
        let (result, seq) = mutate();
        release.gate.hydrated_seq = seq;
        result
    }

    fn publish(&self) {
        let state = self.state();
        metrics::set_gate_state(state);
        self.tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_initial_state_follows_read_only() {
        assert_eq!(WriteGate::new(false).state(), GateState::Writable);
        assert_eq!(WriteGate::new(true).state(), GateState::ReadOnly);
    }

    #[test]
    fn test_read_only_transitions() {
        let mut gate = WriteGate::new(false);
        assert_eq!(gate.set_read_only(false), GateTransition::Unchanged);
        assert_eq!(gate.set_read_only(true), GateTransition::Closed);
        assert!(!gate.admit(1));
        assert_eq!(gate.set_read_only(true), GateTransition::Unchanged);
        assert_eq!(gate.set_read_only(false), GateTransition::Reopened);
        assert!(gate.admit(2));
    }

    #[test]
    fn test_hydration_suppresses_only_its_own_mutation() {
        let mut gate = WriteGate::new(false);

        let observed = gate.hydrate(|| ("replaced", Some(5)));

        assert_eq!(observed, "replaced");
        assert_eq!(gate.state(), GateState::Writable);
        assert!(gate.admit(4));
        assert!(!gate.admit(5));
        assert!(gate.admit(6));
    }

    #[test]
    fn test_hydration_without_container_mutation_suppresses_nothing() {
        let mut gate = WriteGate::new(false);
        gate.hydrate(|| ((), None));

        assert!(gate.admit(1));
        assert!(gate.admit(2));
    }

    #[test]
    fn test_state_is_hydrating_inside_critical_section() {
        let mut gate = WriteGate::new(false);
        let rx = gate.subscribe();
        let seen = Cell::new(None);

        gate.hydrate(|| (seen.set(Some(*rx.borrow())), None));

        assert_eq!(seen.get(), Some(GateState::Hydrating));
        assert_eq!(*rx.borrow(), GateState::Writable);
    }

    #[test]
    fn test_release_runs_when_mutation_panics() {
        let mut gate = WriteGate::new(false);

        let result = catch_unwind(AssertUnwindSafe(|| {
            gate.hydrate(|| -> ((), Option<u64>) { panic!("wake-up target exploded") })
        }));

        assert!(result.is_err());
        assert_eq!(gate.state(), GateState::Writable);
        assert!(gate.admit(1));
    }

    #[test]
    fn test_read_only_outlasts_hydration() {
        let mut gate = WriteGate::new(true);
        gate.hydrate(|| ((), None));
        assert_eq!(gate.state(), GateState::ReadOnly);
    }

    #[test]
    fn test_gate_state_display() {
        assert_eq!(GateState::Hydrating.to_string(), "Hydrating");
        assert_eq!(GateState::Writable.to_string(), "Writable");
        assert_eq!(GateState::ReadOnly.to_string(), "ReadOnly");
    }
}
