// This module contains the storage adapter: the write and query contract of
// the time-series store, an InfluxDB 2.x implementation used in production,
// and an in-memory implementation used by tests and storeless bring-up.

mod influx;
mod memory;

// Re-exports.
pub use influx::{InfluxConfig, InfluxStore};
pub use memory::MemStore;

use crate::measurement::{ChannelId, DeviceId, RawSample, RunHeader, RunId, RunStatus, SamplePoint};
use async_trait::async_trait;
use thiserror::Error;

/// Default number of headers returned by `list_recent_runs`.
pub const RECENT_RUNS_LIMIT: usize = 10;

/// Cap on the number of points returned by `get_samples`.
pub const SAMPLES_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage write failed: {0}")]
    Write(String),
    #[error("storage query failed: {0}")]
    Query(String),
}

/// Write and query contract of the time-series store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Writes the header record of a finished run, minting its identifier
    /// from the wall clock.
    async fn write_run_header(
        &self,
        start_time: u64,
        end_time: u64,
        status: RunStatus,
        device_count: u32,
        channel_count: u32,
    ) -> Result<RunId, StoreError>;

    /// Writes one point per sample, timestamped 1ms apart from a base, and
    /// flushes before returning.
    async fn write_samples(
        &self,
        run_id: RunId,
        device: DeviceId,
        channel: ChannelId,
        samples: Vec<RawSample>,
    ) -> Result<(), StoreError>;

    /// Returns up to `limit` run headers, newest first.
    async fn list_recent_runs(&self, limit: usize) -> Result<Vec<RunHeader>, StoreError>;

    /// Returns the stored points of `run_id`, oldest first, capped at
    /// [`SAMPLES_LIMIT`].
    async fn get_samples(&self, run_id: RunId) -> Result<Vec<SamplePoint>, StoreError>;
}
