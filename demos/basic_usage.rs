// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic collection-sync usage example.
//!
//! Demonstrates:
//! 1. Building an engine over in-memory collaborators
//! 2. Publishing records with an image asset
//! 3. FirstLoad, LoadMore and a cache-first Refresh
//! 4. Going offline and serving from the cache
//! 5. Deleting a record and reclaiming its image
//! 6. Displaying metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use collection_sync::storage::memory::{
    MemoryBinaryStore, MemoryFileSystem, MemoryKv, MemoryRemoteCollection,
};
use collection_sync::{
    EngineConfig, Record, SyncEngine, SyncMode, TimeoutBinaryStore, TimeoutRemote,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           collection-sync: Basic Usage Example                ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure the engine
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring engine...");

    let config = EngineConfig {
        page_size: 3,
        has_assets: true,
        ..EngineConfig::new("moments", "momentCache")
    };

    let remote = Arc::new(MemoryRemoteCollection::new(config.sort_field.clone()));
    let fs = Arc::new(MemoryFileSystem::new());
    let binary = Arc::new(MemoryBinaryStore::new(fs.clone()));
    let engine = SyncEngine::new(
        config,
        Arc::new(TimeoutRemote::new(remote.clone(), Duration::from_secs(5))),
        Arc::new(TimeoutBinaryStore::new(binary.clone(), Duration::from_secs(30))),
        fs.clone(),
        Arc::new(MemoryKv::new()),
    )?;

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Publish
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Publishing 5 moments...");
    let mut published = Vec::new();
    for i in 0..5 {
        let photo = fs.create_temp(1_024 * (i + 1));
        let moment = Record::new("pair-1", 0).with_field("caption", json!(format!("moment #{i}")));
        let record = engine.publish("pair-1", moment, &[photo]).await?;
        println!("   └─ {} → {}", record.id().unwrap_or("?"), record.asset_refs[0].remote_id);
        published.push(record);
        // distinct sort timestamps
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Paged reads
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 FirstLoad...");
    let view = engine.sync("pair-1", SyncMode::FirstLoad).await?;
    print_view(&view);

    println!("\n📖 LoadMore...");
    let view = engine.sync("pair-1", SyncMode::LoadMore).await?;
    print_view(&view);
    println!("   Cursor: {:?}", engine.cursor("pair-1"));

    println!("\n🔄 Refresh (head unchanged, no downloads)...");
    let before = binary.download_count();
    engine.sync("pair-1", SyncMode::Refresh).await?;
    println!("   └─ downloads during refresh: {}", binary.download_count() - before);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Offline
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📴 Remote offline, refreshing from cache...");
    remote.set_offline(true);
    let view = engine.sync("pair-1", SyncMode::Refresh).await?;
    println!("   └─ served {} cached records", view.len());
    remote.set_offline(false);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Delete
    // ─────────────────────────────────────────────────────────────────────────
    if let Some(id) = published.last().and_then(Record::id) {
        println!("\n🗑️  Deleting {id}...");
        engine.delete("pair-1", id, None).await?;
    }
    let stats = engine.image_stats("pair-1");
    println!("   └─ image cache: {} entries, {} bytes", stats.entry_count, stats.total_bytes);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    println!("\n✅ Done.");
    Ok(())
}

fn print_view(view: &[Record]) {
    for record in view {
        let caption = record.payload.get("caption").and_then(|v| v.as_str()).unwrap_or("");
        let local = record
            .asset_refs
            .first()
            .and_then(|a| a.local_path.as_deref())
            .unwrap_or("(not materialized)");
        println!("   └─ {} {caption:<12} {local}", record.id().unwrap_or("?"));
    }
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let rendered = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => v.into_inner().to_string(),
                DebugValue::Histogram(samples) => format!("{} samples", samples.len()),
            };
            format!("{}{{{}}} = {}", key.name(), labels.join(","), rendered)
        })
        .collect();
    lines.sort();
    for line in lines {
        println!("   └─ {line}");
    }
}
