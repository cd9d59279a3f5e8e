//! In-memory staging ring shared by one BB node's producer and consumer
//!
//! Bytes live in a fixed ring keyed by (head, tail) offsets; the pending
//! FIFO carries (offset, length) descriptors so chunks drain in exact
//! ingest order even while new payloads land behind them. Both the byte
//! capacity and the pending-chunk bound block the producer rather than
//! dropping data. The consumer waits on a not-empty condvar.
//!
//! Draining is two-phase: `next_chunk` copies the head chunk out without
//! releasing its bytes, and `complete` advances the head and shrinks the
//! occupancy only after the caller has persisted the chunk. Occupancy
//! therefore always equals the sum of pending chunk lengths.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::{CdbbError, Result};

/// Position and length of one staged chunk inside the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Ring offset of the chunk's first byte
    pub offset: usize,
    /// Chunk length in bytes
    pub len: usize,
}

struct RingState {
    storage: Box<[u8]>,
    head: usize,
    tail: usize,
    occupancy: usize,
    pending: VecDeque<ChunkDescriptor>,
    closed: bool,
}

impl RingState {
    fn check_accounting(&self) {
        debug_assert_eq!(
            self.occupancy,
            self.pending.iter().map(|chunk| chunk.len).sum::<usize>()
        );
    }
}

/// Bounded byte ring plus pending-chunk FIFO, guarded by one mutex with
/// not-empty and not-full condvars
pub struct StagingRing {
    state: Mutex<RingState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    max_pending: usize,
}

impl StagingRing {
    /// Allocate a ring of `capacity` bytes admitting at most `max_pending`
    /// undrained chunks
    pub fn new(capacity: usize, max_pending: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                storage: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                occupancy: 0,
                pending: VecDeque::with_capacity(max_pending.min(1024)),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            max_pending,
        }
    }

    /// Byte capacity of the ring
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently staged
    pub fn occupancy(&self) -> u64 {
        self.state.lock().occupancy as u64
    }

    /// Chunks currently staged
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Stage one chunk at the tail, blocking while the ring lacks byte
    /// room or the pending FIFO is at its bound
    pub fn push(&self, payload: &[u8]) -> Result<()> {
        let len = payload.len();
        if len == 0 {
            return Err(CdbbError::invalid_message("zero-length chunk"));
        }
        if len > self.capacity {
            return Err(CdbbError::Capacity {
                requested: len as u64,
                capacity: self.capacity as u64,
            });
        }

        let mut state = self.state.lock();
        let mut warned = false;
        loop {
            if state.closed {
                return Err(CdbbError::ChannelClosed);
            }
            if state.occupancy + len <= self.capacity && state.pending.len() < self.max_pending {
                break;
            }
            if !warned && state.pending.len() >= self.max_pending {
                warn!(
                    pending = state.pending.len(),
                    bound = self.max_pending,
                    "pending-chunk queue full; producer blocked, raise the bound"
                );
                warned = true;
            }
            self.not_full.wait(&mut state);
        }

        let offset = state.tail;
        let first = len.min(self.capacity - offset);
        state.storage[offset..offset + first].copy_from_slice(&payload[..first]);
        state.storage[..len - first].copy_from_slice(&payload[first..]);

        state.pending.push_back(ChunkDescriptor { offset, len });
        state.tail = (offset + len) % self.capacity;
        state.occupancy += len;
        state.check_accounting();

        self.not_empty.notify_all();
        Ok(())
    }

    /// Copy out the head chunk, blocking while the ring is empty
    ///
    /// The chunk's bytes stay staged until [`StagingRing::complete`]
    /// releases them. Returns [`CdbbError::ChannelClosed`] once the ring is
    /// closed and fully drained.
    pub fn next_chunk(&self) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        loop {
            if let Some(chunk) = state.pending.front().copied() {
                let mut out = vec![0u8; chunk.len];
                let first = chunk.len.min(self.capacity - chunk.offset);
                out[..first].copy_from_slice(&state.storage[chunk.offset..chunk.offset + first]);
                out[first..].copy_from_slice(&state.storage[..chunk.len - first]);
                return Ok(out);
            }
            if state.closed {
                return Err(CdbbError::ChannelClosed);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Release the head chunk after it has been persisted; returns the new
    /// occupancy for the drain report
    pub fn complete(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let chunk = state
            .pending
            .pop_front()
            .ok_or_else(|| CdbbError::unexpected("complete() with no staged chunk"))?;
        debug_assert_eq!(state.head, chunk.offset);
        state.head = (chunk.offset + chunk.len) % self.capacity;
        state.occupancy -= chunk.len;
        state.check_accounting();

        self.not_full.notify_all();
        Ok(state.occupancy as u64)
    }

    /// Close the ring: producers fail fast, the consumer drains what
    /// remains and then sees [`CdbbError::ChannelClosed`]
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_chunks_drain_in_fifo_order() {
        let ring = StagingRing::new(64, 16);
        ring.push(b"alpha").unwrap();
        ring.push(b"beta").unwrap();
        ring.push(b"gamma").unwrap();

        assert_eq!(ring.next_chunk().unwrap(), b"alpha");
        ring.complete().unwrap();
        assert_eq!(ring.next_chunk().unwrap(), b"beta");
        ring.complete().unwrap();
        assert_eq!(ring.next_chunk().unwrap(), b"gamma");
        assert_eq!(ring.complete().unwrap(), 0);
    }

    #[test]
    fn test_occupancy_tracks_pending_sum() {
        let ring = StagingRing::new(64, 16);
        ring.push(&[1; 10]).unwrap();
        ring.push(&[2; 6]).unwrap();
        assert_eq!(ring.occupancy(), 16);
        assert_eq!(ring.pending_len(), 2);

        ring.next_chunk().unwrap();
        // occupancy only drops once the chunk is completed
        assert_eq!(ring.occupancy(), 16);
        assert_eq!(ring.complete().unwrap(), 6);
        assert_eq!(ring.occupancy(), 6);
    }

    #[test]
    fn test_wrap_around_preserves_bytes() {
        let ring = StagingRing::new(8, 16);
        ring.push(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(ring.next_chunk().unwrap(), &[1, 2, 3, 4, 5]);
        ring.complete().unwrap();

        // tail is at 5; this chunk wraps past the end of the storage
        ring.push(&[6, 7, 8, 9, 10, 11]).unwrap();
        assert_eq!(ring.next_chunk().unwrap(), &[6, 7, 8, 9, 10, 11]);
        assert_eq!(ring.complete().unwrap(), 0);
    }

    #[test]
    fn test_producer_blocks_at_byte_capacity() {
        let ring = Arc::new(StagingRing::new(8, 16));
        ring.push(&[0; 6]).unwrap();

        let blocked = Arc::clone(&ring);
        let handle = thread::spawn(move || blocked.push(&[1; 4]));
        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());

        ring.next_chunk().unwrap();
        ring.complete().unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(ring.occupancy(), 4);
    }

    #[test]
    fn test_producer_blocks_at_pending_bound() {
        let ring = Arc::new(StagingRing::new(1024, 2));
        ring.push(&[0; 1]).unwrap();
        ring.push(&[1; 1]).unwrap();

        let blocked = Arc::clone(&ring);
        let handle = thread::spawn(move || blocked.push(&[2; 1]));
        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());

        ring.next_chunk().unwrap();
        ring.complete().unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(ring.pending_len(), 2);
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let ring = StagingRing::new(8, 16);
        assert!(matches!(
            ring.push(&[0; 9]),
            Err(CdbbError::Capacity { .. })
        ));
        assert!(ring.push(&[]).is_err());
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let ring = Arc::new(StagingRing::new(8, 16));
        let consumer = Arc::clone(&ring);
        let handle = thread::spawn(move || consumer.next_chunk());

        thread::sleep(Duration::from_millis(20));
        ring.close();
        assert!(handle.join().unwrap().unwrap_err().is_disconnect());
        assert!(ring.push(&[1]).unwrap_err().is_disconnect());
    }

    #[test]
    fn test_close_lets_consumer_drain_remainder() {
        let ring = StagingRing::new(16, 4);
        ring.push(b"left").unwrap();
        ring.close();

        assert_eq!(ring.next_chunk().unwrap(), b"left");
        ring.complete().unwrap();
        assert!(ring.next_chunk().unwrap_err().is_disconnect());
    }
}
