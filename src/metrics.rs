// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for persist-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `persist_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `mode`: single, collection
//! - `status`: success, error
//! - `kind`: fault kind (see [`FaultKind`](crate::FaultKind))

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::error::FaultKind;
use crate::gate::GateState;

/// Record a finished flush
pub fn record_flush(mode: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        "persist_sync_flushes_total",
        "mode" => mode,
        "status" => status
    )
    .increment(1);
}

/// Record flush latency, from dispatch to driver acknowledgement
pub fn record_flush_latency(mode: &'static str, duration: Duration) {
    histogram!(
        "persist_sync_flush_seconds",
        "mode" => mode
    )
    .record(duration.as_secs_f64());
}

/// Set the number of flushes dispatched but not yet acknowledged
pub fn set_flushes_in_flight(count: usize) {
    gauge!("persist_sync_flushes_in_flight").set(count as f64);
}

/// Record a pending delivery replaced before its quiet period ended
pub fn record_debounce_superseded() {
    counter!("persist_sync_debounce_superseded_total").increment(1);
}

/// Record a hydration outcome: hydrated, empty, failed
pub fn record_hydration(mode: &'static str, outcome: &'static str) {
    counter!(
        "persist_sync_hydrations_total",
        "mode" => mode,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a fault published on the fault channel
pub fn record_fault(kind: FaultKind) {
    counter!(
        "persist_sync_faults_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record the per-key operations produced by one collection flush
pub fn record_diff(written: usize, removed: usize) {
    counter!("persist_sync_diff_writes_total").increment(written as u64);
    counter!("persist_sync_diff_removes_total").increment(removed as u64);
}

/// Set gate state (0 = Writable, 1 = Hydrating, 2 = ReadOnly)
pub fn set_gate_state(state: GateState) {
    let level = match state {
        GateState::Writable => 0.0,
        GateState::Hydrating => 1.0,
        GateState::ReadOnly => 2.0,
    };
    gauge!("persist_sync_gate_state").set(level);
}

/// Track engine state machine transitions
pub fn set_engine_state(state: &str) {
    counter!(
        "persist_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record a retried driver call
pub fn record_retry(operation: &'static str, attempt: usize) {
    counter!(
        "persist_sync_retries_total",
        "operation" => operation
    )
    .increment(1);
    histogram!(
        "persist_sync_retry_attempt",
        "operation" => operation
    )
    .record(attempt as f64);
}

/// A timing guard that records flush latency on drop
pub struct LatencyTimer {
    mode: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(mode: &'static str) -> Self {
        Self {
            mode,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_flush_latency(self.mode, self.start.elapsed());
    }
}
