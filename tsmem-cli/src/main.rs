//! tsmem - drives concurrent ingestion into a memory database and flushes it

use anyhow::Context;
use crossbeam_channel::{bounded, Receiver};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tsmem_core::{
    CompoundField, MemoryDatabase, MemoryDatabaseConfig, MemoryFlusher, MetricPayload,
    MetricPoint, SimpleField, SimpleFieldType,
};

/// Ingest run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct CliConfig {
    database: MemoryDatabaseConfig,
    /// Writer threads
    workers: usize,
    /// Points generated in total
    points: usize,
    metrics: u32,
    series_per_metric: u32,
    /// Slots per family
    slots: u16,
    /// Points per `with_lock` batch
    batch_size: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            database: MemoryDatabaseConfig::default(),
            workers: 4,
            points: 100_000,
            metrics: 16,
            series_per_metric: 64,
            slots: 360,
            batch_size: 64,
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CliConfig> {
    let path = match path {
        Some(path) => path,
        None => return Ok(CliConfig::default()),
    };
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = serde_json::from_str(&data)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

fn random_point(rng: &mut impl Rng, config: &CliConfig) -> MetricPoint {
    let metric_id = rng.gen_range(0..config.metrics.max(1));
    let series_id = rng.gen_range(0..config.series_per_metric.max(1));
    let slot_index = rng.gen_range(0..config.slots.max(1));

    // even metrics carry histograms, odd ones simple fields
    if metric_id % 2 == 0 {
        let values = vec![rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0)];
        MetricPoint {
            metric_id,
            series_id,
            slot_index,
            field_ids: (1..=6).collect(),
            payload: MetricPayload {
                simple_fields: Vec::new(),
                compound_field: Some(CompoundField {
                    min: rng.gen_range(0.0..1.0),
                    max: rng.gen_range(1.0..100.0),
                    sum: rng.gen_range(0.0..1000.0),
                    count: values.iter().sum(),
                    explicit_bounds: vec![10.0, 100.0],
                    values,
                }),
            },
        }
    } else {
        MetricPoint {
            metric_id,
            series_id,
            slot_index,
            field_ids: vec![1, 2],
            payload: MetricPayload {
                simple_fields: vec![
                    SimpleField::new("requests", SimpleFieldType::DeltaSum, rng.gen_range(0.0..50.0)),
                    SimpleField::new("load", SimpleFieldType::Gauge, rng.gen_range(0.0..1.0)),
                ],
                compound_field: None,
            },
        }
    }
}

fn run_worker(db: &MemoryDatabase, rx: Receiver<Vec<MetricPoint>>) -> (usize, usize) {
    let mut written = 0;
    let mut failed = 0;
    for batch in rx {
        let writer = db.with_lock();
        for point in &batch {
            match writer.write_without_lock(point) {
                Ok(()) => written += 1,
                Err(err) => {
                    failed += 1;
                    warn!(metric_id = point.metric_id, series_id = point.series_id, error = %err, "write failed");
                }
            }
        }
    }
    (written, failed)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref().map(Path::new))?;
    info!(
        workers = config.workers,
        points = config.points,
        metrics = config.metrics,
        "starting tsmem ingest"
    );

    let db = Arc::new(MemoryDatabase::new(config.database.clone())?);
    let (tx, rx) = bounded::<Vec<MetricPoint>>(config.workers.max(1) * 4);

    let started = Instant::now();
    let handles: Vec<_> = (0..config.workers.max(1))
        .map(|_| {
            let db = Arc::clone(&db);
            let rx = rx.clone();
            thread::spawn(move || run_worker(&db, rx))
        })
        .collect();
    drop(rx);

    let mut rng = rand::thread_rng();
    let batch_size = config.batch_size.max(1);
    let mut remaining = config.points;
    while remaining > 0 {
        let n = remaining.min(batch_size);
        let batch = (0..n).map(|_| random_point(&mut rng, &config)).collect();
        tx.send(batch).context("all writers exited")?;
        remaining -= n;
    }
    drop(tx);

    let mut written = 0;
    let mut failed = 0;
    for handle in handles {
        let (ok, err) = handle
            .join()
            .map_err(|_| anyhow::anyhow!("writer thread panicked"))?;
        written += ok;
        failed += err;
    }
    info!(
        written,
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "ingest finished"
    );

    let mut flusher = MemoryFlusher::new();
    db.flush_family_to(&mut flusher)?;
    info!(
        metrics = flusher.metrics().len(),
        bytes = flusher.total_bytes(),
        "flush finished"
    );

    println!("{}", serde_json::to_string_pretty(&db.stats())?);
    db.close()?;
    Ok(())
}
