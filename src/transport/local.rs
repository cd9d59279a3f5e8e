//! In-process fabric implementing the transport contract
//!
//! One mailbox per (rank, tag) pair, each a mutex-guarded FIFO with a
//! condvar for blocked receivers. Every rank of the job runs as a thread in
//! the same process and talks through a shared [`LocalFabric`]; per-pair
//! ordering falls out of the per-mailbox queues. `shutdown` closes the
//! fabric and wakes every blocked receive and barrier with
//! [`CdbbError::ChannelClosed`], which is how role loops learn the job is
//! over.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{CdbbError, Result};
use crate::transport::{Envelope, Rank, Tag, Transport, TAG_COUNT};

struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    available: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }
}

struct BarrierState {
    arrived: usize,
    generation: u64,
}

struct FabricShared {
    world_size: usize,
    /// Mailboxes indexed by `rank * TAG_COUNT + tag.index()`
    mailboxes: Vec<Mailbox>,
    closed: AtomicBool,
    barrier: Mutex<BarrierState>,
    barrier_released: Condvar,
}

impl FabricShared {
    fn mailbox(&self, rank: Rank, tag: Tag) -> &Mailbox {
        &self.mailboxes[rank * TAG_COUNT + tag.index()]
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The shared side of the in-process fabric; create once per job and hand
/// one [`LocalEndpoint`] to each rank thread
#[derive(Clone)]
pub struct LocalFabric {
    shared: Arc<FabricShared>,
}

impl LocalFabric {
    /// Create a fabric for a job of `world_size` ranks
    pub fn new(world_size: usize) -> Self {
        let mailboxes = (0..world_size * TAG_COUNT).map(|_| Mailbox::new()).collect();
        Self {
            shared: Arc::new(FabricShared {
                world_size,
                mailboxes,
                closed: AtomicBool::new(false),
                barrier: Mutex::new(BarrierState {
                    arrived: 0,
                    generation: 0,
                }),
                barrier_released: Condvar::new(),
            }),
        }
    }

    /// Endpoint bound to `rank`
    pub fn endpoint(&self, rank: Rank) -> Result<LocalEndpoint> {
        if rank >= self.shared.world_size {
            return Err(CdbbError::transport(format!(
                "rank {rank} outside world of {}",
                self.shared.world_size
            )));
        }
        Ok(LocalEndpoint {
            shared: Arc::clone(&self.shared),
            rank,
        })
    }

    /// Close the fabric and wake everything blocked on it
    ///
    /// Idempotent. Messages already queued are still delivered; once a
    /// mailbox runs dry, receivers get [`CdbbError::ChannelClosed`].
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        for mailbox in &self.shared.mailboxes {
            let _guard = mailbox.queue.lock();
            mailbox.available.notify_all();
        }
        let _guard = self.shared.barrier.lock();
        self.shared.barrier_released.notify_all();
    }

    /// Whether `shutdown` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// One rank's handle on the [`LocalFabric`]
pub struct LocalEndpoint {
    shared: Arc<FabricShared>,
    rank: Rank,
}

impl LocalEndpoint {
    fn recv_filtered(&self, source: Option<Rank>, tag: Tag) -> Result<Envelope> {
        let mailbox = self.shared.mailbox(self.rank, tag);
        let mut queue = mailbox.queue.lock();
        loop {
            let slot = match source {
                None => {
                    if queue.is_empty() {
                        None
                    } else {
                        Some(0)
                    }
                }
                Some(src) => queue.iter().position(|env| env.source == src),
            };
            if let Some(index) = slot {
                // remove() cannot fail: the index came from this locked queue
                return queue
                    .remove(index)
                    .ok_or_else(|| CdbbError::unexpected("mailbox index vanished under lock"));
            }
            if self.shared.is_closed() {
                return Err(CdbbError::ChannelClosed);
            }
            mailbox.available.wait(&mut queue);
        }
    }
}

impl Transport for LocalEndpoint {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    fn send(&self, dest: Rank, tag: Tag, payload: &[u8]) -> Result<()> {
        if dest >= self.shared.world_size {
            return Err(CdbbError::transport(format!(
                "send to rank {dest} outside world of {}",
                self.shared.world_size
            )));
        }
        if self.shared.is_closed() {
            return Err(CdbbError::ChannelClosed);
        }
        let mailbox = self.shared.mailbox(dest, tag);
        let mut queue = mailbox.queue.lock();
        queue.push_back(Envelope {
            source: self.rank,
            payload: payload.to_vec(),
        });
        // notify_all: a by-source receiver may not match the new message
        mailbox.available.notify_all();
        Ok(())
    }

    fn recv(&self, tag: Tag) -> Result<Envelope> {
        self.recv_filtered(None, tag)
    }

    fn recv_from(&self, source: Rank, tag: Tag) -> Result<Envelope> {
        self.recv_filtered(Some(source), tag)
    }

    fn barrier(&self) -> Result<()> {
        let mut state = self.shared.barrier.lock();
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.shared.world_size {
            state.arrived = 0;
            state.generation += 1;
            self.shared.barrier_released.notify_all();
            return Ok(());
        }
        while state.generation == generation {
            if self.shared.is_closed() {
                return Err(CdbbError::ChannelClosed);
            }
            self.shared.barrier_released.wait(&mut state);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{decode_i32, encode_i32};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_send_recv_carries_source() {
        let fabric = LocalFabric::new(4);
        let sender = fabric.endpoint(2).unwrap();
        let receiver = fabric.endpoint(0).unwrap();

        sender.send(0, Tag::SenderKind, &encode_i32(1)).unwrap();
        let env = receiver.recv(Tag::SenderKind).unwrap();
        assert_eq!(env.source, 2);
        assert_eq!(decode_i32(&env.payload).unwrap(), 1);
    }

    #[test]
    fn test_per_pair_fifo_order() {
        let fabric = LocalFabric::new(2);
        let sender = fabric.endpoint(1).unwrap();
        let receiver = fabric.endpoint(0).unwrap();

        for value in 0..10 {
            sender.send(0, Tag::ProbeSize, &encode_i32(value)).unwrap();
        }
        for value in 0..10 {
            let env = receiver.recv(Tag::ProbeSize).unwrap();
            assert_eq!(decode_i32(&env.payload).unwrap(), value);
        }
    }

    #[test]
    fn test_recv_from_leaves_other_sources_queued() {
        let fabric = LocalFabric::new(3);
        let a = fabric.endpoint(1).unwrap();
        let b = fabric.endpoint(2).unwrap();
        let receiver = fabric.endpoint(0).unwrap();

        a.send(0, Tag::IngestData, b"from-a").unwrap();
        b.send(0, Tag::IngestData, b"from-b").unwrap();

        let env = receiver.recv_from(2, Tag::IngestData).unwrap();
        assert_eq!(env.payload, b"from-b");

        let env = receiver.recv(Tag::IngestData).unwrap();
        assert_eq!(env.source, 1);
        assert_eq!(env.payload, b"from-a");
    }

    #[test]
    fn test_recv_from_blocks_until_matching_source() {
        let fabric = LocalFabric::new(3);
        let receiver = fabric.endpoint(0).unwrap();
        let late = fabric.endpoint(2).unwrap();

        let handle = thread::spawn(move || receiver.recv_from(2, Tag::IngestSize));
        thread::sleep(Duration::from_millis(20));
        late.send(0, Tag::IngestSize, &encode_i32(7)).unwrap();

        let env = handle.join().unwrap().unwrap();
        assert_eq!(env.source, 2);
    }

    #[test]
    fn test_barrier_releases_all_ranks() {
        let fabric = LocalFabric::new(4);
        let mut handles = Vec::new();
        for rank in 0..4 {
            let endpoint = fabric.endpoint(rank).unwrap();
            handles.push(thread::spawn(move || endpoint.barrier()));
        }
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
    }

    #[test]
    fn test_shutdown_wakes_blocked_recv() {
        let fabric = LocalFabric::new(2);
        let receiver = fabric.endpoint(0).unwrap();
        let handle = thread::spawn(move || receiver.recv(Tag::DrainReport));

        thread::sleep(Duration::from_millis(20));
        fabric.shutdown();

        let err = handle.join().unwrap().unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_queued_messages_survive_shutdown() {
        let fabric = LocalFabric::new(2);
        let sender = fabric.endpoint(1).unwrap();
        let receiver = fabric.endpoint(0).unwrap();

        sender.send(0, Tag::ProbeSize, &encode_i32(9)).unwrap();
        fabric.shutdown();

        let env = receiver.recv(Tag::ProbeSize).unwrap();
        assert_eq!(decode_i32(&env.payload).unwrap(), 9);
        assert!(receiver.recv(Tag::ProbeSize).unwrap_err().is_disconnect());
        assert!(sender.send(0, Tag::ProbeSize, &[]).unwrap_err().is_disconnect());
    }
}
