//! Job topology and tuning configuration
//!
//! A job is described by its world size, the BB host stride, per-buffer
//! capacity, and a table of application bands. `JobConfig::standard`
//! reproduces the five-application production topology; tests build small
//! worlds through the `with_*` builders.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{CdbbError, Result};
use crate::transport::Rank;

/// One application: a contiguous band of writer ranks sharing a payload
/// size and checkpoint cadence
///
/// A band range may span BB host ranks; role dispatch carves those out, so
/// the band's effective writer set never overlaps a BB slot or rank 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandConfig {
    /// 1-based application index, used in logs
    pub index: usize,
    /// First rank of the band (inclusive)
    pub rank_lo: Rank,
    /// Last rank of the band (inclusive)
    pub rank_hi: Rank,
    /// Bytes each writer stages per checkpoint
    pub payload_size: u64,
    /// Delay before the band's first checkpoint, spreading load across bands
    pub initial_delay: Duration,
    /// Checkpoint period
    pub period: Duration,
}

impl BandConfig {
    /// Whether `rank` falls inside the band's range
    #[inline]
    pub fn contains(&self, rank: Rank) -> bool {
        rank >= self.rank_lo && rank <= self.rank_hi
    }
}

/// Full description of one staging job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Total number of ranks; must be a multiple of `stride` so every
    /// writer's local slot is hosted
    pub world_size: usize,
    /// Spacing between BB host ranks
    pub stride: usize,
    /// Byte capacity of each in-memory burst buffer
    pub bb_capacity: u64,
    /// Bound on staged-but-undrained chunks per BB node
    pub max_pending_chunks: usize,
    /// Bound on overlapping in-flight checkpoints per writer rank
    pub max_in_flight_checkpoints: usize,
    /// Directory receiving the per-rank append-only drain files
    pub drain_root: PathBuf,
    /// Application bands
    pub bands: Vec<BandConfig>,
}

impl JobConfig {
    /// Minimal configuration for a world of `world_size` ranks; add bands
    /// with [`JobConfig::with_band`]
    pub fn new(world_size: usize) -> Self {
        Self {
            world_size,
            stride: constants::STRIDE,
            bb_capacity: constants::BB_CAPACITY,
            max_pending_chunks: constants::MAX_PENDING_CHUNKS,
            max_in_flight_checkpoints: num_cpus::get().max(2),
            drain_root: PathBuf::from(constants::DEFAULT_DRAIN_ROOT),
            bands: Vec::new(),
        }
    }

    /// The five-application production topology: 368 ranks, five 73-rank
    /// bands starting at rank 1, staggered in 120 s steps, 600 s period
    pub fn standard(payload_sizes: [u64; constants::APP_BAND_COUNT]) -> Self {
        let mut config = Self::new(constants::STANDARD_WORLD_SIZE);
        for (i, payload_size) in payload_sizes.into_iter().enumerate() {
            let rank_lo = 1 + i * constants::STANDARD_BAND_WIDTH;
            config = config.with_band(BandConfig {
                index: i + 1,
                rank_lo,
                rank_hi: rank_lo + constants::STANDARD_BAND_WIDTH - 1,
                payload_size,
                initial_delay: Duration::from_secs(i as u64 * constants::DEFAULT_STAGGER_SECS),
                period: Duration::from_secs(constants::DEFAULT_CHECKPOINT_PERIOD_SECS),
            });
        }
        config
    }

    /// Set the BB host stride
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Set the per-buffer byte capacity
    pub fn with_bb_capacity(mut self, bb_capacity: u64) -> Self {
        self.bb_capacity = bb_capacity;
        self
    }

    /// Set the pending-chunk bound
    pub fn with_max_pending_chunks(mut self, max_pending_chunks: usize) -> Self {
        self.max_pending_chunks = max_pending_chunks;
        self
    }

    /// Set the in-flight checkpoint bound
    pub fn with_max_in_flight_checkpoints(mut self, bound: usize) -> Self {
        self.max_in_flight_checkpoints = bound;
        self
    }

    /// Set the drain directory
    pub fn with_drain_root(mut self, drain_root: impl Into<PathBuf>) -> Self {
        self.drain_root = drain_root.into();
        self
    }

    /// Append an application band
    pub fn with_band(mut self, band: BandConfig) -> Self {
        self.bands.push(band);
        self
    }

    /// Number of BB slots in the occupancy vector
    #[inline]
    pub fn bb_slot_count(&self) -> usize {
        self.world_size / self.stride
    }

    /// Slot index owning `rank`'s local burst buffer
    #[inline]
    pub fn slot_of(&self, rank: Rank) -> usize {
        rank / self.stride
    }

    /// Rank hosting the burst buffer of `slot`
    #[inline]
    pub fn bb_rank_for_slot(&self, slot: usize) -> Rank {
        slot * self.stride + (self.stride - 1)
    }

    /// Whether `rank` hosts a burst buffer
    #[inline]
    pub fn is_bb_host(&self, rank: Rank) -> bool {
        rank % self.stride == self.stride - 1
    }

    /// The band whose range contains `rank`, if any
    pub fn band_of(&self, rank: Rank) -> Option<&BandConfig> {
        self.bands.iter().find(|band| band.contains(rank))
    }

    /// Drain file for `rank`: `<drain_root>/rank<rank>.out`
    pub fn drain_path(&self, rank: Rank) -> PathBuf {
        self.drain_root.join(format!("rank{rank}.out"))
    }

    /// Check the whole configuration; every rank-facing component assumes a
    /// validated config
    pub fn validate(&self) -> Result<()> {
        if self.stride < 2 {
            return Err(CdbbError::config("stride must be at least 2"));
        }
        if self.world_size == 0 || self.world_size % self.stride != 0 {
            return Err(CdbbError::config(format!(
                "world size {} must be a non-zero multiple of stride {}",
                self.world_size, self.stride
            )));
        }
        if self.bb_capacity == 0 {
            return Err(CdbbError::config("BB capacity must be non-zero"));
        }
        if self.max_pending_chunks == 0 {
            return Err(CdbbError::config("pending-chunk bound must be non-zero"));
        }
        if self.max_in_flight_checkpoints == 0 {
            return Err(CdbbError::config("in-flight checkpoint bound must be non-zero"));
        }

        let mut spans: Vec<(Rank, Rank, usize)> = Vec::with_capacity(self.bands.len());
        for band in &self.bands {
            if band.rank_lo > band.rank_hi {
                return Err(CdbbError::config(format!(
                    "band {} is empty: [{}, {}]",
                    band.index, band.rank_lo, band.rank_hi
                )));
            }
            if band.rank_lo == 0 {
                return Err(CdbbError::config(format!(
                    "band {} claims the coordinator rank",
                    band.index
                )));
            }
            if band.rank_hi >= self.world_size {
                return Err(CdbbError::config(format!(
                    "band {} ends at rank {} outside world of {}",
                    band.index, band.rank_hi, self.world_size
                )));
            }
            if band.payload_size == 0 {
                return Err(CdbbError::config(format!(
                    "band {} payload size must be non-zero",
                    band.index
                )));
            }
            if band.payload_size >= self.bb_capacity {
                return Err(CdbbError::config(format!(
                    "band {} payload of {} bytes can never be admitted to a {}-byte buffer",
                    band.index, band.payload_size, self.bb_capacity
                )));
            }
            if band.payload_size > i32::MAX as u64 {
                return Err(CdbbError::config(format!(
                    "band {} payload of {} bytes does not fit the i32 wire size",
                    band.index, band.payload_size
                )));
            }
            spans.push((band.rank_lo, band.rank_hi, band.index));
        }

        spans.sort_unstable();
        for pair in spans.windows(2) {
            if pair[1].0 <= pair[0].1 {
                return Err(CdbbError::config(format!(
                    "bands {} and {} overlap",
                    pair[0].2, pair[1].2
                )));
            }
        }
        Ok(())
    }
}
