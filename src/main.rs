//! Binary entry point: run a full staging job in one process
//!
//! Takes exactly five positional arguments, the per-application checkpoint
//! payload sizes in bytes, and runs the standard five-application topology
//! over the in-process fabric. The job runs until killed.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use cdbb::constants::{validate_constants, APP_BAND_COUNT};
use cdbb::{run_job, CheckpointStats, JobConfig, LocalFabric, Payload, ShutdownFlag};

fn usage(program: &str) {
    eprintln!("USAGE: {program} <app1_bytes> <app2_bytes> <app3_bytes> <app4_bytes> <app5_bytes>");
}

fn parse_payload_sizes() -> [u64; APP_BAND_COUNT] {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("cdbb");
    if args.len() != APP_BAND_COUNT + 1 {
        usage(program);
        std::process::exit(1);
    }

    let mut sizes = [0u64; APP_BAND_COUNT];
    for (slot, raw) in sizes.iter_mut().zip(&args[1..]) {
        match raw.parse::<u64>() {
            Ok(size) => *slot = size,
            Err(_) => {
                eprintln!("unparseable payload size: {raw}");
                usage(program);
                std::process::exit(1);
            }
        }
    }
    sizes
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let sizes = parse_payload_sizes();
    validate_constants().map_err(anyhow::Error::msg)?;

    let config = JobConfig::standard(sizes);
    config.validate().context("standard topology")?;

    let payload = Payload::load_default().context("loading checkpoint payload source")?;
    payload
        .ensure_covers(&config)
        .context("payload source too small for configured bands")?;

    let fabric = LocalFabric::new(config.world_size);
    let stats = Arc::new(CheckpointStats::new()?);
    let shutdown = ShutdownFlag::new();

    info!(
        world_size = config.world_size,
        bb_slots = config.bb_slot_count(),
        bands = config.bands.len(),
        "staging job starting"
    );
    run_job(&config, &fabric, payload, &stats, &shutdown)?;

    let summary = stats.summary();
    info!(
        staged = summary.staged,
        direct = summary.direct,
        failed = summary.failed,
        p99_us = summary.p99_us,
        "staging job finished"
    );
    Ok(())
}
