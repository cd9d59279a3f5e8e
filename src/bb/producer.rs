//! Ingest side of a BB node
//!
//! Receives two-message envelopes from writers (an i32 size on the ingest
//! size tag, then exactly that many bytes on the data tag from the same
//! source) and stages each payload at the tail of the ring. Blocks inside
//! `StagingRing::push` when the ring is out of room.

use tracing::debug;

use crate::bb::ring::StagingRing;
use crate::error::{CdbbError, Result};
use crate::transport::{decode_i32, Tag, Transport};

/// Run the ingest loop until the transport closes; the ring is closed on
/// every exit path so the consumer can finish draining
pub fn run<T: Transport + ?Sized>(transport: &T, ring: &StagingRing) -> Result<()> {
    let rank = transport.rank();
    debug!(rank, "BB producer up");
    let result = ingest_loop(transport, ring);
    ring.close();
    match result {
        Err(err) if err.is_disconnect() => Ok(()),
        other => other,
    }
}

fn ingest_loop<T: Transport + ?Sized>(transport: &T, ring: &StagingRing) -> Result<()> {
    let rank = transport.rank();
    loop {
        let size_env = transport.recv(Tag::IngestSize)?;
        let size = decode_i32(&size_env.payload)?;
        if size <= 0 {
            return Err(CdbbError::invalid_message(format!(
                "ingest size {size} from rank {}",
                size_env.source
            )));
        }

        // the data message must come from the same writer as the size
        let data_env = transport.recv_from(size_env.source, Tag::IngestData)?;
        if data_env.payload.len() != size as usize {
            return Err(CdbbError::invalid_message(format!(
                "ingest data of {} bytes, size message said {size}",
                data_env.payload.len()
            )));
        }

        ring.push(&data_env.payload)?;
        debug!(
            rank,
            source = size_env.source,
            size,
            occupancy = ring.occupancy(),
            "staged incoming chunk"
        );
    }
}
