//! Drain side of a BB node
//!
//! Pulls the head chunk from the ring, appends it to the node's PFS drain
//! file, releases the ring space, and reports the new occupancy to the
//! coordinator. Chunks reach the file in exact ingest order. A failed PFS
//! write is fatal for the node; there are no retries.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::bb::ring::StagingRing;
use crate::constants::COORDINATOR_RANK;
use crate::error::Result;
use crate::transport::{encode_i32, encode_u64, Tag, Transport, SENDER_BB};

/// Run the drain loop until the ring is closed and empty; the ring is
/// closed on every exit path so a blocked producer wakes up
pub fn run<T: Transport + ?Sized>(
    transport: &T,
    ring: &StagingRing,
    drain_path: &Path,
) -> Result<()> {
    let rank = transport.rank();
    debug!(rank, path = %drain_path.display(), "BB consumer up");
    let result = drain_loop(transport, ring, drain_path);
    ring.close();
    match result {
        Err(err) if err.is_disconnect() => Ok(()),
        other => other,
    }
}

fn open_drain_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().append(true).create(true).open(path)?)
}

fn drain_loop<T: Transport + ?Sized>(
    transport: &T,
    ring: &StagingRing,
    drain_path: &Path,
) -> Result<()> {
    let rank = transport.rank();
    let mut file = open_drain_file(drain_path)?;
    loop {
        let chunk = ring.next_chunk()?;
        file.write_all(&chunk)?;
        file.flush()?;
        let occupancy = ring.complete()?;

        // best-effort at teardown: the job may already be closing
        match report(transport, occupancy) {
            Ok(()) => {}
            Err(err) if err.is_disconnect() => {}
            Err(err) => return Err(err),
        }
        debug!(
            rank,
            drained = chunk.len(),
            occupancy,
            "drained chunk to PFS"
        );
    }
}

fn report<T: Transport + ?Sized>(transport: &T, occupancy: u64) -> Result<()> {
    transport.send(COORDINATOR_RANK, Tag::SenderKind, &encode_i32(SENDER_BB))?;
    transport.send(COORDINATOR_RANK, Tag::DrainReport, &encode_u64(occupancy))
}
