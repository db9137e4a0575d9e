// Rust guideline compliant 2026-08-22

//! Play-ledger ingestion entry point -- `SQLite` storage demo.
//!
//! Identical to the main `playledger` binary except that storage is backed
//! by a `SQLite` file (`playledger.db` in the current working directory)
//! instead of in-memory collections. This demonstrates that the hexagonal
//! `EventStore` port is truly swappable: only this entry point and the
//! adapter change; all domain and component crates are untouched.
//!
//! # Usage
//!
//! ```text
//! # Full demo session with a summary at the end -- CTRL+C stops early
//! $env:RUST_LOG='info'; cargo run --bin playledger_sqlite; Remove-Item env:RUST_LOG
//!
//! # Also show per-item skip and dedup output
//! $env:RUST_LOG='debug'; cargo run --bin playledger_sqlite; Remove-Item env:RUST_LOG
//! ```
//!
//! The file `playledger.db` is created on first run. Inspect rows with any
//! `SQLite` browser (e.g., DB Browser for `SQLite`).

mod adapters;

// Load sqlite_store directly so it only enters this binary's module tree,
// avoiding dead_code warnings in the `playledger` binary (which uses
// MemoryStore instead).
#[path = "adapters/sqlite_store.rs"]
mod sqlite_store;

use adapters::eval_queue::ConcurrentEvalQueue;
use anyhow::Context as _;
use chrono::Utc;
use domain::EventStore as _;
use fraud::{FraudConfig, FraudEvaluator};
use pipeline::{IngestionPipeline, PipelineConfig};
use registry::{DeviceRegistry, RegistryConfig};
use simulator::{SimulatorConfig, TrafficSimulator};
use sqlite_store::SqliteStore;
use std::time::Duration;
use tracing::Instrument as _;
use worker::{EvalWorker, WorkerConfig};

/// Database file created in the current working directory on first run.
///
/// Using the current working directory is acceptable for a demo adapter.
/// A production adapter would read this from configuration or environment.
const DB_URL: &str = "sqlite:playledger.db";

/// Batches the driver submits before closing the queue and summarizing.
const DEMO_BATCHES: u32 = 40;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize the tracing subscriber before any async work.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // -- Ingestion: duplicate screening with the stock 30 s window --
    let pipeline_config = PipelineConfig::builder()
        // .dedup_window(chrono::Duration::seconds(60)) for lenient clients
        .build()
        .context("failed to build pipeline config")?;
    let ingest = IngestionPipeline::new(pipeline_config);

    // -- Device identity: salted fingerprints, neutral starting reputation --
    let registry_config = RegistryConfig::builder("playledger-demo-salt".to_owned())
        .build()
        .context("failed to build registry config")?;
    let device_registry = DeviceRegistry::new(registry_config);

    // -- Fraud heuristics: stock thresholds; see FraudConfig for the knobs --
    let fraud_config = FraudConfig::builder()
        .build()
        .context("failed to build fraud config")?;
    let evaluator = FraudEvaluator::new(fraud_config);

    // -- Evaluation queue and worker: the asynchronous single-play path --
    // Generous capacity: enough for a full session of single plays.
    let queue = ConcurrentEvalQueue::new(256);
    let worker_config = WorkerConfig::builder(10)
        // 25 ms keeps the worker hot without starving the driver.
        .poll_interval(Duration::from_millis(25))
        .build()
        .context("failed to build worker config")?;
    let worker = EvalWorker::new(worker_config);

    // -- Simulated traffic: small pools with dirty items mixed in --
    let sim_config = SimulatorConfig::builder(8)
        // .seed(42) for a reproducible session
        .build()
        .context("failed to build simulator config")?;
    let sim = TrafficSimulator::new(sim_config);

    // SqliteStore: opens or creates playledger.db in the working directory.
    let store = SqliteStore::new(DB_URL)
        .await
        .context("failed to open SQLite store")?;
    // The catalog check rejects unknown songs; seed the simulated catalog
    // before any traffic flows. Re-running the demo reuses existing rows.
    for song in sim.songs() {
        store
            .seed_song(*song)
            .await
            .context("failed to seed the song catalog")?;
    }
    // One demo account owns every simulated device.
    let user_id = uuid::Uuid::new_v4();

    // Shutdown cascade: the driver completes -> queue.close() -> worker
    // drains the backlog and stops.
    let driver = async {
        for batch_no in 1..=DEMO_BATCHES {
            let report = ingest
                .ingest_batch(
                    &store,
                    &device_registry,
                    &evaluator,
                    user_id,
                    sim.next_batch(),
                )
                .await
                .context("batch ingestion failed")?;
            tracing::info!(
                "driver.batch.done: no={batch_no} recorded={} skipped={} flagged={}",
                report.plays_recorded(),
                report.plays_skipped(),
                report.fraud_flags.len()
            );

            // Sprinkle interactive single plays between batches; these are
            // queued and reach the evaluator through the worker.
            if batch_no % 5 == 0 {
                let event = ingest
                    .ingest_one(&store, &queue, sim.next_single())
                    .await
                    .context("single-play ingestion failed")?;
                tracing::debug!("driver.single.recorded: event_id={}", event.event_id);
            }

            // 150 ms between batches keeps logs readable in real time.
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        // Close the queue so the worker exits cleanly after draining.
        queue.close();
        Ok::<(), anyhow::Error>(())
    };

    let session = async {
        // tokio::join! polls both futures concurrently and returns the tuple directly.
        let (d, w) = tokio::join!(
            driver.instrument(tracing::info_span!("driver")),
            worker
                .run(&store, &device_registry, &evaluator, &queue)
                .instrument(tracing::info_span!("worker"))
        );
        d.and(w.context("evaluation worker failed"))
    };

    // Race the session against CTRL+C.
    // CTRL+C: close the queue; whatever already landed still gets summarized.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("main.shutdown: ctrl_c received, closing the evaluation queue");
            queue.close();
        }
        result = session => {
            result?;
        }
    }

    // Per-song aggregates over the session window, for this run's catalog.
    let now = Utc::now();
    let since = now - chrono::Duration::hours(1);
    for song in sim.songs() {
        let stats = store
            .play_stats(*song, since, now)
            .await
            .context("failed to read play stats")?;
        if stats.total_plays == 0 {
            continue;
        }
        tracing::info!(
            "main.summary: song={song} plays={} venues={} devices={} avg_confidence={}",
            stats.total_plays,
            stats.unique_venues,
            stats.unique_devices,
            stats
                .avg_confidence
                .map_or_else(|| "n/a".to_owned(), |v| format!("{v:.1}"))
        );
    }

    Ok(())
}
