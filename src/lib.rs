//! CDBB - Collaborative distributed burst buffer staging layer
//!
//! Absorbs periodic checkpoint payloads from many parallel writers into a
//! sparse set of in-memory burst buffers and drains them asynchronously to
//! a parallel file system. A single coordinator tracks per-buffer occupancy
//! and arbitrates placement: local buffer first, then the least-loaded
//! remote, and only when every buffer is saturated does a writer fall
//! through to a direct PFS write.

pub mod bb;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod payload;
pub mod runtime;
pub mod transport;
pub mod writer;

// Re-export main components
pub use bb::{ChunkDescriptor, StagingRing};
pub use config::{BandConfig, JobConfig};
pub use coordinator::{OccupancyBoard, Placement};
pub use error::{CdbbError, Result};
pub use metrics::{CheckpointStats, StatsSummary};
pub use payload::Payload;
pub use runtime::{classify, run_job, Role, ShutdownFlag};
pub use transport::{LocalEndpoint, LocalFabric, Rank, Tag, Transport};
pub use writer::CheckpointOutcome;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
