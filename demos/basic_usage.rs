// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic persist-sync usage example.
//!
//! Demonstrates:
//! 1. Persisting a single JSON value with a debounce window
//! 2. Hydrating a second container from what was persisted
//! 3. Persisting a keyed collection with diff-based writes
//! 4. Suspending persistence with a read-only signal
//! 5. Observing flush lifecycle events and faults
//! 6. Displaying captured metrics
//!
//! Everything runs against the in-memory driver, no services needed.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use persist_sync::{
    with_persistent, with_persistent_map, ChannelObserver, DriverOp, DriverSource, LifecycleEvent, MemoryDriver,
    PersistOptions, Pipeline, Store,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Settings {
    theme: String,
    font_size: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           persist-sync: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Single value, debounced
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Persisting settings (JSON, 200ms debounce)...");

    let settings_driver = Arc::new(MemoryDriver::<&'static str, String>::new());
    let settings = Store::new(Settings { theme: "light".into(), font_size: 12 });
    let (observer, mut events) = ChannelObserver::new();

    let handle = with_persistent(
        &settings,
        DriverSource::ready(settings_driver.clone()),
        "settings",
        PersistOptions::new(Pipeline::json())
            .flush_delay(Duration::from_millis(200))
            .observer(observer),
    );
    println!("   State: {}", handle.ready().await);

    for size in 13..=16 {
        settings.update(|s| Settings { font_size: size, ..s.clone() });
    }
    settings.update(|s| Settings { theme: "dark".into(), ..s.clone() });
    println!("   └─ 5 updates in a burst");

    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("   └─ Driver writes: {}", settings_driver.mutations().len());
    println!("   └─ Persisted: {}", settings_driver.get(&"settings").unwrap_or_default());

    while let Ok(event) = events.try_recv() {
        println!("   └─ Lifecycle: {:?}", event_name(&event));
    }
    handle.shutdown().await;

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Hydration
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🌅 Hydrating a fresh container from the driver...");

    let restored = Store::new(Settings { theme: "light".into(), font_size: 12 });
    let handle = with_persistent(
        &restored,
        DriverSource::ready(settings_driver.clone()),
        "settings",
        PersistOptions::new(Pipeline::json()),
    );
    handle.ready().await;
    println!("   └─ Restored: {:?}", restored.get());
    println!("   └─ Writes caused by hydration: {}", settings_driver.mutations().len() - 1);
    handle.shutdown().await;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Keyed collection
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🗂️  Persisting a keyed collection...");

    let scores_driver = Arc::new(MemoryDriver::with_entries([
        ("alice".to_string(), 3u32),
        ("bob".to_string(), 5),
    ]));
    let scores = Store::new(BTreeMap::<String, u32>::new());
    let (read_only_tx, read_only) = watch::channel(false);

    let handle = with_persistent_map(
        &scores,
        DriverSource::ready(scores_driver.clone()),
        PersistOptions::default().read_only(read_only),
    );
    let mut faults = handle.faults();
    handle.ready().await;
    println!("   └─ Hydrated: {:?}", scores.get());

    scores.update(|m| {
        let mut m = m.clone();
        m.insert("bob".into(), 6);
        m.insert("carol".into(), 1);
        m.remove("alice");
        m
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    for op in scores_driver.mutations() {
        match op {
            DriverOp::Write(k, v) => println!("   └─ write  {} = {}", k, v),
            DriverOp::Remove(k) => println!("   └─ remove {}", k),
            _ => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Read-only
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔒 Going read-only...");
    read_only_tx.send_replace(true);
    tokio::time::sleep(Duration::from_millis(10)).await;
    println!("   └─ Gate: {}", handle.gate_state());

    let before = scores_driver.mutations().len();
    for bonus in 1..=3 {
        scores.update(|m| {
            let mut m = m.clone();
            *m.entry("carol".into()).or_default() += bonus;
            m
        });
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    println!("   └─ Writes while read-only: {}", scores_driver.mutations().len() - before);

    read_only_tx.send_replace(false);
    tokio::time::sleep(Duration::from_millis(10)).await;
    println!("   └─ Gate: {}", handle.gate_state());
    println!("   └─ Catch-up writes: {}", scores_driver.mutations().len() - before);
    println!("   └─ carol = {:?}", scores_driver.get(&"carol".to_string()));

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Faults
    // ─────────────────────────────────────────────────────────────────────────
    match faults.try_recv() {
        Ok(fault) => println!("\n⚠️  Fault reported: {} ({})", fault, fault.kind()),
        Err(_) => println!("\n✅ No faults reported"),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Captured metrics:");
    dump_metrics(&snapshotter);

    println!("\n🛑 Shutting down...");
    handle.shutdown().await;

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

fn event_name(event: &LifecycleEvent) -> &'static str {
    match event {
        LifecycleEvent::FlushStart(_) => "flush start",
        LifecycleEvent::FlushDone(_) => "flush done",
        LifecycleEvent::FlushFail(..) => "flush fail",
        LifecycleEvent::FlushFinally(_) => "flush finally",
        LifecycleEvent::BeforeHydrate => "before hydrate",
        LifecycleEvent::AfterHydrate => "after hydrate",
    }
}

/// Print every captured metric, grouped by kind and sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<(u8, String)> = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let name = if labels.is_empty() {
            key.name().to_string()
        } else {
            format!("{}{{{}}}", key.name(), labels.join(","))
        };

        match value {
            DebugValue::Counter(v) => lines.push((0, format!("counter   {} = {}", name, v))),
            DebugValue::Gauge(v) => lines.push((1, format!("gauge     {} = {:.0}", name, v.into_inner()))),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                lines.push((2, format!("histogram {} count={} sum={:.4}", name, count, sum)));
            }
        }
    }

    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
        return;
    }
    lines.sort();
    for (_, line) in lines {
        println!("   └─ {}", line);
    }
}
