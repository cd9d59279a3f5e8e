//! Role dispatch and the per-job runtime
//!
//! Every rank classifies itself from its rank number alone: rank 0 is the
//! coordinator, every `stride-1` offset hosts a burst buffer, ranks inside a
//! configured band write checkpoints, and everything else idles. The job
//! runner drives one thread per rank over the in-process fabric, with a
//! startup barrier before any role loop begins.
//!
//! Production role loops run for the job's lifetime. The [`ShutdownFlag`]
//! exists for testability: tripping it stops the writer loops, and closing
//! the fabric unblocks the coordinator and BB loops.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::bb;
use crate::config::{BandConfig, JobConfig};
use crate::constants::COORDINATOR_RANK;
use crate::coordinator;
use crate::error::{CdbbError, Result};
use crate::metrics::CheckpointStats;
use crate::payload::Payload;
use crate::transport::{LocalEndpoint, LocalFabric, Rank, Transport};
use crate::writer;

/// What a rank does for the lifetime of the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Rank 0: serializes placement decisions
    Coordinator,
    /// Hosts a burst buffer and its producer/consumer pair
    BurstBuffer,
    /// Emits periodic checkpoints for one application band
    Writer(BandConfig),
    /// Outside every band; does nothing
    Idle,
}

/// Classify `rank` by position; BB hosting takes precedence over band
/// membership, so a band range spanning a BB rank never claims it
pub fn classify(config: &JobConfig, rank: Rank) -> Role {
    if rank == COORDINATOR_RANK {
        Role::Coordinator
    } else if config.is_bb_host(rank) {
        Role::BurstBuffer
    } else if let Some(band) = config.band_of(rank) {
        Role::Writer(band.clone())
    } else {
        Role::Idle
    }
}

/// Cloneable flag that stops writer loops between iterations
///
/// Only the first trigger has an effect. `sleep` doubles as the writers'
/// period timer so a teardown never waits out a full checkpoint period.
#[derive(Clone)]
pub struct ShutdownFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownFlag {
    /// New, untripped flag
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Trip the flag and wake every sleeper
    pub fn trigger(&self) {
        let (tripped, woken) = &*self.inner;
        *tripped.lock() = true;
        woken.notify_all();
    }

    /// Whether the flag has been tripped
    pub fn is_tripped(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `duration` or until tripped; returns true if tripped
    pub fn sleep(&self, duration: Duration) -> bool {
        let (tripped, woken) = &*self.inner;
        let mut guard = tripped.lock();
        let deadline = Instant::now() + duration;
        while !*guard {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            woken.wait_for(&mut guard, deadline - now);
        }
        true
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a whole job: one thread per rank, startup barrier, role loops
///
/// Blocks until every rank loop has exited, which in production means the
/// job's lifetime. Per-rank failures are logged by the failing rank and do
/// not propagate to other ranks.
pub fn run_job(
    config: &JobConfig,
    fabric: &LocalFabric,
    payload: &Payload,
    stats: &Arc<CheckpointStats>,
    shutdown: &ShutdownFlag,
) -> Result<()> {
    config.validate()?;
    payload.ensure_covers(config)?;

    let endpoints: Vec<Arc<LocalEndpoint>> = (0..config.world_size)
        .map(|rank| fabric.endpoint(rank).map(Arc::new))
        .collect::<Result<_>>()?;

    crossbeam::thread::scope(|scope| {
        for endpoint in endpoints {
            let stats = Arc::clone(stats);
            let shutdown = shutdown.clone();
            scope.spawn(move |_| run_rank(endpoint, config, payload, stats, shutdown));
        }
    })
    .map_err(|_| CdbbError::unexpected("a rank thread panicked"))
}

fn run_rank(
    endpoint: Arc<LocalEndpoint>,
    config: &JobConfig,
    payload: &Payload,
    stats: Arc<CheckpointStats>,
    shutdown: ShutdownFlag,
) {
    let rank = endpoint.rank();
    if let Err(err) = endpoint.barrier() {
        if !err.is_disconnect() {
            error!(rank, %err, "startup barrier failed");
        }
        return;
    }

    let result = match classify(config, rank) {
        Role::Coordinator => coordinator::run(&*endpoint, config),
        Role::BurstBuffer => bb::run(&*endpoint, config),
        Role::Writer(band) => writer::run(
            Arc::clone(&endpoint),
            config,
            &band,
            payload,
            stats,
            &shutdown,
        ),
        Role::Idle => {
            debug!(rank, "rank has no role in this job");
            Ok(())
        }
    };

    match result {
        Ok(()) => debug!(rank, "rank loop finished"),
        Err(err) if err.is_disconnect() => debug!(rank, "rank loop closed with the job"),
        Err(err) => error!(rank, %err, "rank loop failed"),
    }
}
