//! Writer-side admission protocol and checkpoint loop
//!
//! Each checkpoint probes the coordinator, then either streams the payload
//! to the designated BB rank or appends it straight to the writer's own PFS
//! file. The periodic loop fires one checkpoint per period as a
//! fire-and-forget task on a bounded pool, so a slow transfer overlaps the
//! next period instead of delaying it, up to the pool bound.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::config::{BandConfig, JobConfig};
use crate::constants::COORDINATOR_RANK;
use crate::error::{CdbbError, Result};
use crate::metrics::CheckpointStats;
use crate::payload::Payload;
use crate::runtime::ShutdownFlag;
use crate::transport::{
    decode_i32, encode_i32, Rank, Tag, Transport, SENDER_WRITER,
};

/// How one checkpoint completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// Admitted by the coordinator and sent to a BB rank
    Staged {
        /// BB host rank that absorbed the payload
        target: Rank,
    },
    /// Every burst buffer was saturated; written directly to the PFS
    DirectToPfs,
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Execute a single checkpoint: probe, then stage or fall through
pub fn run_checkpoint<T: Transport + ?Sized>(
    transport: &T,
    drain_path: &Path,
    payload: &[u8],
    run_index: u64,
) -> Result<CheckpointOutcome> {
    let rank = transport.rank();
    let time_start = epoch_secs();
    let size = payload.len() as i32;

    transport.send(COORDINATOR_RANK, Tag::SenderKind, &encode_i32(SENDER_WRITER))?;
    transport.send(COORDINATOR_RANK, Tag::ProbeSize, &encode_i32(size))?;

    let accept = transport.recv_from(COORDINATOR_RANK, Tag::DecisionAccept)?;
    let target = transport.recv_from(COORDINATOR_RANK, Tag::DecisionTarget)?;
    let accepted = decode_i32(&accept.payload)? != 0;
    let target = decode_i32(&target.payload)?;
    debug!(rank, accepted, target, "placement decision");

    let outcome = if accepted {
        if target < 0 || target as usize >= transport.world_size() {
            return Err(CdbbError::invalid_message(format!(
                "accepted decision names rank {target} outside the world"
            )));
        }
        let target = target as Rank;
        transport.send(target, Tag::IngestSize, &encode_i32(size))?;
        transport.send(target, Tag::IngestData, payload)?;
        debug!(rank, target, size, "sent payload to burst buffer");
        CheckpointOutcome::Staged { target }
    } else {
        if let Some(parent) = drain_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().append(true).create(true).open(drain_path)?;
        file.write_all(payload)?;
        file.flush()?;
        debug!(rank, size, "no space left in any burst buffer; wrote to PFS");
        CheckpointOutcome::DirectToPfs
    };

    let time_end = epoch_secs();
    info!(
        ckpt_run = run_index,
        writer_rank = rank,
        elapsed = time_end - time_start,
        time_start,
        time_end,
        staged = matches!(outcome, CheckpointOutcome::Staged { .. }),
        "checkpoint complete"
    );
    Ok(outcome)
}

/// Caps the number of overlapping in-flight checkpoint tasks
///
/// `spawn` blocks once the bound is reached, so a writer that outruns its
/// transfers backs off instead of piling up unbounded threads.
pub struct CheckpointPool {
    max_in_flight: usize,
    in_flight: Arc<(Mutex<usize>, Condvar)>,
}

impl CheckpointPool {
    /// Pool admitting at most `max_in_flight` concurrent tasks
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            in_flight: Arc::new((Mutex::new(0), Condvar::new())),
        }
    }

    /// Run `task` on its own thread, blocking until a slot frees up
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (count, freed) = &*self.in_flight;
        {
            let mut guard = count.lock();
            while *guard >= self.max_in_flight {
                freed.wait(&mut guard);
            }
            *guard += 1;
        }

        let gate = Arc::clone(&self.in_flight);
        thread::spawn(move || {
            task();
            let (count, freed) = &*gate;
            *count.lock() -= 1;
            freed.notify_all();
        });
    }

    /// Block until every spawned task has finished
    pub fn wait_idle(&self) {
        let (count, freed) = &*self.in_flight;
        let mut guard = count.lock();
        while *guard > 0 {
            freed.wait(&mut guard);
        }
    }
}

/// Run one writer rank: staggered start, then one checkpoint per period
/// until the shutdown flag trips
pub fn run<T>(
    transport: Arc<T>,
    config: &JobConfig,
    band: &BandConfig,
    payload: &Payload,
    stats: Arc<CheckpointStats>,
    shutdown: &ShutdownFlag,
) -> Result<()>
where
    T: Transport + 'static,
{
    let rank = transport.rank();
    debug!(
        rank,
        application = band.index,
        delay_secs = band.initial_delay.as_secs_f64(),
        "writer starting after stagger delay"
    );
    if shutdown.sleep(band.initial_delay) {
        return Ok(());
    }

    let pool = CheckpointPool::new(config.max_in_flight_checkpoints);
    let drain_path: PathBuf = config.drain_path(rank);
    let mut run_index: u64 = 0;

    loop {
        let task_transport = Arc::clone(&transport);
        let task_stats = Arc::clone(&stats);
        let task_payload = payload.clone();
        let task_path = drain_path.clone();
        let size = band.payload_size;
        let index = run_index;

        pool.spawn(move || {
            let started = Instant::now();
            let result = task_payload
                .slice(size)
                .and_then(|bytes| run_checkpoint(&*task_transport, &task_path, bytes, index));
            match result {
                Ok(CheckpointOutcome::Staged { .. }) => task_stats.record_staged(started.elapsed()),
                Ok(CheckpointOutcome::DirectToPfs) => task_stats.record_direct(started.elapsed()),
                Err(err) if err.is_disconnect() => {
                    debug!(ckpt_run = index, "checkpoint cut short by job teardown");
                }
                Err(err) => {
                    task_stats.record_failure();
                    error!(ckpt_run = index, %err, "checkpoint failed");
                }
            }
        });
        run_index += 1;

        if shutdown.sleep(band.period) {
            break;
        }
    }

    pool.wait_idle();
    debug!(rank, checkpoints = run_index, "writer stopped");
    Ok(())
}
