//! Burst buffer node runtime
//!
//! A BB node is a fixed-capacity in-memory staging ring worked by two
//! threads: the producer absorbs writer payloads off the fabric, the
//! consumer drains them to the node's PFS file and reports occupancy to the
//! coordinator. The ring's condvars are the only coupling between the two.

pub mod consumer;
pub mod producer;
pub mod ring;

pub use ring::{ChunkDescriptor, StagingRing};

use tracing::debug;

use crate::config::JobConfig;
use crate::error::{CdbbError, Result};
use crate::transport::Transport;

/// Run one BB node to completion: allocate its ring, start the producer
/// and consumer threads, and join them when the job tears down
pub fn run<T: Transport + ?Sized>(transport: &T, config: &JobConfig) -> Result<()> {
    let rank = transport.rank();
    let ring = StagingRing::new(config.bb_capacity as usize, config.max_pending_chunks);
    let drain_path = config.drain_path(rank);
    debug!(rank, capacity = config.bb_capacity, "BB node up");

    let outcome = crossbeam::thread::scope(|scope| {
        let producing = scope.spawn(|_| producer::run(transport, &ring));
        let draining = scope.spawn(|_| consumer::run(transport, &ring, &drain_path));

        let produced = producing
            .join()
            .unwrap_or_else(|_| Err(CdbbError::unexpected("producer thread panicked")));
        let drained = draining
            .join()
            .unwrap_or_else(|_| Err(CdbbError::unexpected("consumer thread panicked")));
        produced.and(drained)
    });
    outcome.map_err(|_| CdbbError::unexpected("BB node scope panicked"))?
}
