//! Build-time tunables for the burst buffer staging layer
//!
//! These are the defaults for a production job; `JobConfig` lets a test or
//! harness override capacity, stride, and paths per job.

use static_assertions::const_assert;

/// Rank that serializes every placement decision
pub const COORDINATOR_RANK: usize = 0;

/// Default capacity of one in-memory burst buffer (4 GiB)
pub const BB_CAPACITY: u64 = 4 * 1024 * 1024 * 1024;

/// Spacing between BB host ranks; every rank with
/// `rank % STRIDE == STRIDE - 1` hosts a burst buffer
pub const STRIDE: usize = 8;

/// Upper bound on chunks staged but not yet drained on one BB node
pub const MAX_PENDING_CHUNKS: usize = 2000;

/// Wire value the coordinator returns as the target when every burst
/// buffer is saturated and the writer must bypass staging entirely
pub const PFS_SENTINEL_RANK: i32 = 666;

/// Default checkpoint period for every application band (seconds)
pub const DEFAULT_CHECKPOINT_PERIOD_SECS: u64 = 600;

/// Default stagger step between consecutive application bands (seconds)
pub const DEFAULT_STAGGER_SECS: u64 = 120;

/// Number of application bands in the standard topology
pub const APP_BAND_COUNT: usize = 5;

/// Number of writer ranks in each band of the standard topology
pub const STANDARD_BAND_WIDTH: usize = 73;

/// World size of the standard five-application topology
pub const STANDARD_WORLD_SIZE: usize = 368;

/// Directory the drain files land in, one append-only file per rank
pub const DEFAULT_DRAIN_ROOT: &str = "/scratch.global/cdbb";

/// Source file whose contents are loaded once and replayed as the
/// checkpoint payload of every writer
pub const DEFAULT_PAYLOAD_SOURCE: &str = "/scratch.global/cdbb/ddFile.input";

const_assert!(STRIDE >= 2);
const_assert!(MAX_PENDING_CHUNKS > 0);
const_assert!(BB_CAPACITY > 0);
const_assert!(STANDARD_WORLD_SIZE % STRIDE == 0);

/// Validate relationships between constants that `const_assert` cannot express
pub fn validate_constants() -> Result<(), &'static str> {
    if (PFS_SENTINEL_RANK as usize) < STANDARD_WORLD_SIZE {
        return Err("PFS_SENTINEL_RANK must not collide with a real rank");
    }
    if STANDARD_BAND_WIDTH * APP_BAND_COUNT >= STANDARD_WORLD_SIZE {
        return Err("standard bands must fit inside the standard world");
    }
    if DEFAULT_STAGGER_SECS > DEFAULT_CHECKPOINT_PERIOD_SECS {
        return Err("stagger step must not exceed the checkpoint period");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_validation() {
        assert!(validate_constants().is_ok());
    }

    #[test]
    fn test_sentinel_is_not_a_standard_rank() {
        assert!(PFS_SENTINEL_RANK as usize >= STANDARD_WORLD_SIZE);
    }

    #[test]
    fn test_standard_world_hosts_every_slot() {
        assert_eq!(STANDARD_WORLD_SIZE % STRIDE, 0);
        let last_writer = STANDARD_BAND_WIDTH * APP_BAND_COUNT;
        assert!(last_writer / STRIDE < STANDARD_WORLD_SIZE / STRIDE);
    }
}
