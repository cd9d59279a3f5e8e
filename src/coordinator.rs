//! Placement coordinator
//!
//! Rank 0 owns the per-BB occupancy vector and serializes every placement
//! decision. Writers probe it before each checkpoint; BB nodes overwrite
//! their slot after each drain. The vector is optimistic: a decision credits
//! the target immediately, and the next drain report replaces the credit
//! with the authoritative value.

use tracing::{debug, warn};

use crate::config::JobConfig;
use crate::constants::PFS_SENTINEL_RANK;
use crate::error::Result;
use crate::transport::{
    decode_i32, decode_u64, encode_i32, Rank, Tag, Transport, SENDER_BB, SENDER_WRITER,
};

/// Outcome of one placement decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Whether any burst buffer admitted the write
    pub accepted: bool,
    /// BB host rank to send to, or [`PFS_SENTINEL_RANK`] when rejected
    pub target: i32,
}

/// Global occupancy tracking plus the admission decision
///
/// Slot `s` covers ranks `[s * stride, (s + 1) * stride)` and is hosted by
/// rank `s * stride + stride - 1`.
pub struct OccupancyBoard {
    occupancy: Vec<u64>,
    capacity: u64,
    stride: usize,
}

impl OccupancyBoard {
    /// Board of `slots` burst buffers of `capacity` bytes each
    pub fn new(slots: usize, capacity: u64, stride: usize) -> Self {
        Self {
            occupancy: vec![0; slots],
            capacity,
            stride,
        }
    }

    /// Board sized for a validated job configuration
    pub fn from_config(config: &JobConfig) -> Self {
        Self::new(config.bb_slot_count(), config.bb_capacity, config.stride)
    }

    /// Current view of per-slot occupancy
    pub fn occupancy(&self) -> &[u64] {
        &self.occupancy
    }

    fn bb_rank(&self, slot: usize) -> i32 {
        (slot * self.stride + self.stride - 1) as i32
    }

    /// Slot with the least staged bytes; ties go to the lowest index
    fn least_loaded_slot(&self) -> usize {
        let mut smallest = u64::MAX;
        let mut slot = 0;
        for (index, &occupancy) in self.occupancy.iter().enumerate() {
            if occupancy < smallest {
                smallest = occupancy;
                slot = index;
            }
        }
        slot
    }

    /// Decide where `writer_rank`'s next `size` bytes go
    ///
    /// Local BB first, then the least-loaded remote, then the PFS sentinel.
    /// Admission is strict: a write that would exactly fill a buffer is
    /// refused. Accepting credits the target immediately.
    pub fn place(&mut self, writer_rank: Rank, size: u64) -> Placement {
        let local = writer_rank / self.stride;
        if self.occupancy[local].saturating_add(size) < self.capacity {
            self.occupancy[local] += size;
            return Placement {
                accepted: true,
                target: self.bb_rank(local),
            };
        }

        let least = self.least_loaded_slot();
        if self.occupancy[least].saturating_add(size) < self.capacity {
            self.occupancy[least] += size;
            return Placement {
                accepted: true,
                target: self.bb_rank(least),
            };
        }

        Placement {
            accepted: false,
            target: PFS_SENTINEL_RANK,
        }
    }

    /// Overwrite a slot with the authoritative post-drain occupancy
    pub fn record_report(&mut self, bb_rank: Rank, occupancy: u64) {
        let slot = bb_rank / self.stride;
        match self.occupancy.get_mut(slot) {
            Some(entry) => *entry = occupancy,
            None => warn!(bb_rank, occupancy, "drain report from unknown slot; dropping"),
        }
    }
}

/// Run the request server until the transport closes
///
/// Two message kinds arrive on the control channel, discriminated by the
/// leading sender-kind tag. Malformed messages are dropped with a log line;
/// the coordinator never retries and never propagates a writer's error to
/// anyone else.
pub fn run<T: Transport + ?Sized>(transport: &T, config: &JobConfig) -> Result<()> {
    let mut board = OccupancyBoard::from_config(config);
    debug!(slots = board.occupancy().len(), "coordinator up");

    loop {
        let kind_env = match transport.recv(Tag::SenderKind) {
            Ok(envelope) => envelope,
            Err(err) if err.is_disconnect() => return Ok(()),
            Err(err) => return Err(err),
        };
        let kind = match decode_i32(&kind_env.payload) {
            Ok(kind) => kind,
            Err(err) => {
                warn!(source = kind_env.source, %err, "malformed sender kind; dropping");
                continue;
            }
        };

        match kind {
            SENDER_BB => {
                let report = transport.recv_from(kind_env.source, Tag::DrainReport)?;
                match decode_u64(&report.payload) {
                    Ok(occupancy) => {
                        board.record_report(report.source, occupancy);
                        debug!(bb_rank = report.source, occupancy, "recorded drain report");
                    }
                    Err(err) => {
                        warn!(source = report.source, %err, "malformed drain report; dropping");
                    }
                }
            }
            SENDER_WRITER => {
                let probe = transport.recv_from(kind_env.source, Tag::ProbeSize)?;
                let size = match decode_i32(&probe.payload) {
                    Ok(size) if size > 0 => size,
                    Ok(size) => {
                        warn!(source = probe.source, size, "non-positive probe size; dropping");
                        continue;
                    }
                    Err(err) => {
                        warn!(source = probe.source, %err, "malformed probe; dropping");
                        continue;
                    }
                };

                let placement = board.place(probe.source, size as u64);
                transport.send(
                    probe.source,
                    Tag::DecisionAccept,
                    &encode_i32(placement.accepted as i32),
                )?;
                transport.send(probe.source, Tag::DecisionTarget, &encode_i32(placement.target))?;

                if !placement.accepted {
                    debug!(writer = probe.source, size, "all burst buffers full");
                } else if placement.target as usize / config.stride == probe.source / config.stride {
                    debug!(writer = probe.source, target = placement.target, size, "placed at local BB");
                } else {
                    debug!(writer = probe.source, target = placement.target, size, "local BB full, placed at remote BB");
                }
            }
            other => {
                warn!(source = kind_env.source, kind = other, "unknown sender kind; dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{encode_u64, LocalFabric};
    use std::thread;

    fn board() -> OccupancyBoard {
        // three slots, 1000-byte buffers, stride 8
        OccupancyBoard::new(3, 1000, 8)
    }

    #[test]
    fn test_local_bb_preferred_when_it_has_room() {
        let mut board = board();
        let placement = board.place(9, 500);
        assert_eq!(placement, Placement { accepted: true, target: 15 });
        assert_eq!(board.occupancy(), &[0, 500, 0]);
    }

    #[test]
    fn test_full_local_redirects_to_least_loaded_lowest_index() {
        let mut board = board();
        board.place(9, 500);

        // local slot would be exactly filled; slots 0 and 2 tie at zero
        let placement = board.place(9, 500);
        assert_eq!(placement, Placement { accepted: true, target: 7 });
        assert_eq!(board.occupancy(), &[500, 500, 0]);
    }

    #[test]
    fn test_redirect_chain_walks_the_argmin() {
        let mut board = board();
        board.place(9, 500);
        board.place(9, 500);

        let placement = board.place(9, 500);
        assert_eq!(placement, Placement { accepted: true, target: 23 });
        assert_eq!(board.occupancy(), &[500, 500, 500]);
    }

    #[test]
    fn test_drain_report_restores_local_preference() {
        let mut board = board();
        board.place(9, 500);

        board.record_report(15, 200);
        let placement = board.place(9, 799);
        assert_eq!(placement, Placement { accepted: true, target: 15 });
        assert_eq!(board.occupancy()[1], 999);
    }

    #[test]
    fn test_all_slots_near_capacity_rejects_any_size() {
        let mut board = board();
        for slot_rank in [15, 7, 23] {
            board.record_report(slot_rank, 999);
        }
        let placement = board.place(9, 1);
        assert_eq!(
            placement,
            Placement { accepted: false, target: PFS_SENTINEL_RANK }
        );
        assert_eq!(board.occupancy(), &[999, 999, 999]);
    }

    #[test]
    fn test_serialized_probes_commute() {
        let mut forward = board();
        forward.place(9, 600);
        forward.place(17, 600);

        let mut reverse = board();
        reverse.place(17, 600);
        reverse.place(9, 600);

        assert_eq!(forward.occupancy(), &[0, 600, 600]);
        assert_eq!(forward.occupancy(), reverse.occupancy());
    }

    #[test]
    fn test_exact_fill_is_refused() {
        let mut board = board();
        board.record_report(15, 400);
        // 400 + 600 == 1000 fails the strict check on local and remote alike
        board.record_report(7, 400);
        board.record_report(23, 400);
        let placement = board.place(9, 600);
        assert!(!placement.accepted);
    }

    #[test]
    fn test_occupancy_above_i32_max_still_compares() {
        let mut board = OccupancyBoard::new(2, u64::MAX, 8);
        board.record_report(7, i32::MAX as u64 + 10);
        board.record_report(15, 5);
        let placement = board.place(1, 1);
        // slot 0 is the local slot and has room, but the argmin must not
        // wrap through an i32 if local is bypassed
        assert!(placement.accepted);
        assert_eq!(board.least_loaded_slot(), 1);
    }

    #[test]
    fn test_server_round_trip_over_fabric() {
        let config = JobConfig::new(16).with_bb_capacity(1000);
        let fabric = LocalFabric::new(16);
        let coordinator = fabric.endpoint(0).unwrap();
        let writer = fabric.endpoint(9).unwrap();
        let bb = fabric.endpoint(15).unwrap();

        thread::scope(|scope| {
            let server = scope.spawn(|| run(&coordinator, &config));

            // first probe lands on the local BB
            writer.send(0, Tag::SenderKind, &encode_i32(SENDER_WRITER)).unwrap();
            writer.send(0, Tag::ProbeSize, &encode_i32(600)).unwrap();
            let accept = writer.recv_from(0, Tag::DecisionAccept).unwrap();
            let target = writer.recv_from(0, Tag::DecisionTarget).unwrap();
            assert_eq!(decode_i32(&accept.payload).unwrap(), 1);
            assert_eq!(decode_i32(&target.payload).unwrap(), 15);

            // second probe of the same size cannot fit anywhere in a
            // two-slot world once slot 0 is also credited
            writer.send(0, Tag::SenderKind, &encode_i32(SENDER_WRITER)).unwrap();
            writer.send(0, Tag::ProbeSize, &encode_i32(600)).unwrap();
            let accept = writer.recv_from(0, Tag::DecisionAccept).unwrap();
            let target = writer.recv_from(0, Tag::DecisionTarget).unwrap();
            assert_eq!(decode_i32(&accept.payload).unwrap(), 1);
            assert_eq!(decode_i32(&target.payload).unwrap(), 7);

            writer.send(0, Tag::SenderKind, &encode_i32(SENDER_WRITER)).unwrap();
            writer.send(0, Tag::ProbeSize, &encode_i32(600)).unwrap();
            let accept = writer.recv_from(0, Tag::DecisionAccept).unwrap();
            let target = writer.recv_from(0, Tag::DecisionTarget).unwrap();
            assert_eq!(decode_i32(&accept.payload).unwrap(), 0);
            assert_eq!(decode_i32(&target.payload).unwrap(), PFS_SENTINEL_RANK);

            // a drain report frees the local slot again
            bb.send(0, Tag::SenderKind, &encode_i32(SENDER_BB)).unwrap();
            bb.send(0, Tag::DrainReport, &encode_u64(0)).unwrap();

            writer.send(0, Tag::SenderKind, &encode_i32(SENDER_WRITER)).unwrap();
            writer.send(0, Tag::ProbeSize, &encode_i32(600)).unwrap();
            let accept = writer.recv_from(0, Tag::DecisionAccept).unwrap();
            let target = writer.recv_from(0, Tag::DecisionTarget).unwrap();
            assert_eq!(decode_i32(&accept.payload).unwrap(), 1);
            assert_eq!(decode_i32(&target.payload).unwrap(), 15);

            fabric.shutdown();
            server.join().unwrap().unwrap();
        });
    }
}
