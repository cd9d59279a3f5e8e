//! Rank-addressed message transport contract and wire encoding
//!
//! The staging layer assumes a reliable, ordered, point-to-point fabric with
//! source-rank identity and tag-based demultiplexing, the contract an
//! MPI-style runtime provides. The fabric itself is external; this module
//! defines the trait the roles are written against plus the fixed tag
//! taxonomy and the little-endian scalar codec used on every control
//! message. [`local::LocalFabric`] is the in-process implementation the
//! binary harness and the test suite run on.

pub mod local;

pub use local::{LocalEndpoint, LocalFabric};

use crate::error::{CdbbError, Result};

/// Process rank within the job
pub type Rank = usize;

/// Sender-kind discriminator carried on [`Tag::SenderKind`]: drain report
pub const SENDER_BB: i32 = 0;

/// Sender-kind discriminator carried on [`Tag::SenderKind`]: writer probe
pub const SENDER_WRITER: i32 = 1;

/// Message tags, bit-exact across implementations
///
/// The integer values are part of the wire contract; peers built against a
/// different implementation of the fabric must observe the same numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Tag {
    /// i32 sender kind preceding every control exchange with rank 0
    SenderKind = 0,
    /// i32 payload size of a writer probe
    ProbeSize = 1,
    /// i32 accept flag (0/1) of a placement decision
    DecisionAccept = 2,
    /// i32 target rank of a placement decision, or the PFS sentinel
    DecisionTarget = 3,
    /// i32 payload size preceding an ingest transfer
    IngestSize = 4,
    /// raw payload bytes of an ingest transfer
    IngestData = 5,
    /// u64 post-drain occupancy reported by a BB node
    DrainReport = 6,
}

/// Number of distinct tags; mailbox arrays are sized by this
pub const TAG_COUNT: usize = 7;

impl Tag {
    /// All tags in wire-value order
    pub const ALL: [Tag; TAG_COUNT] = [
        Tag::SenderKind,
        Tag::ProbeSize,
        Tag::DecisionAccept,
        Tag::DecisionTarget,
        Tag::IngestSize,
        Tag::IngestData,
        Tag::DrainReport,
    ];

    /// Dense index of this tag, equal to its wire value
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A received message together with its source rank
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Rank that sent the message
    pub source: Rank,
    /// Raw message payload
    pub payload: Vec<u8>,
}

/// Contract every fabric implementation must satisfy
///
/// Guarantees required of an implementation: per (sender, receiver, tag)
/// FIFO delivery, reliable transfer, and source identity on receipt.
pub trait Transport: Send + Sync {
    /// Rank of this endpoint
    fn rank(&self) -> Rank;

    /// Total number of ranks in the job
    fn world_size(&self) -> usize;

    /// Send `payload` to `dest` on `tag`; blocks until accepted by the fabric
    fn send(&self, dest: Rank, tag: Tag, payload: &[u8]) -> Result<()>;

    /// Receive the next message on `tag` from any source
    fn recv(&self, tag: Tag) -> Result<Envelope>;

    /// Receive the next message on `tag` sent by `source`
    fn recv_from(&self, source: Rank, tag: Tag) -> Result<Envelope>;

    /// Block until every rank in the job has entered the barrier
    fn barrier(&self) -> Result<()>;
}

/// Encode an i32 scalar for the wire
#[inline]
pub fn encode_i32(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Decode an i32 scalar from a wire payload
pub fn decode_i32(payload: &[u8]) -> Result<i32> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| CdbbError::invalid_message(format!("expected 4 bytes, got {}", payload.len())))?;
    Ok(i32::from_le_bytes(bytes))
}

/// Encode a u64 scalar for the wire
#[inline]
pub fn encode_u64(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

/// Decode a u64 scalar from a wire payload
pub fn decode_u64(payload: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = payload
        .try_into()
        .map_err(|_| CdbbError::invalid_message(format!("expected 8 bytes, got {}", payload.len())))?;
    Ok(u64::from_le_bytes(bytes))
}
