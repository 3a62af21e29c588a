use super::{Store, StoreError, SAMPLES_LIMIT};
use crate::measurement::{ChannelId, DeviceId, RawSample, RunHeader, RunId, RunStatus, SamplePoint};
use crate::time::{RunIdGen, SysTime};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// In-memory store. Keeps the same contract as the InfluxDB-backed store,
/// which makes it usable both by the engine tests and for bring-up without a
/// database.
pub struct MemStore {
    time: Arc<dyn SysTime>,
    ids: RunIdGen,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    headers: Vec<RunHeader>,
    samples: Vec<SamplePoint>,
}

impl MemStore {
    pub fn new(time: Arc<dyn SysTime>) -> Self {
        Self {
            time,
            ids: RunIdGen::new(),
            inner: Mutex::new(Inner::default()),
        }
    }
}

#[async_trait]
impl Store for MemStore {
    async fn write_run_header(
        &self,
        start_time: u64,
        end_time: u64,
        status: RunStatus,
        device_count: u32,
        channel_count: u32,
    ) -> Result<RunId, StoreError> {
        let history_id = self.ids.next(&*self.time);
        self.inner.lock().headers.push(RunHeader {
            history_id,
            start_time,
            end_time,
            status,
            device_count,
            channel_count,
        });
        Ok(history_id)
    }

    async fn write_samples(
        &self,
        run_id: RunId,
        device: DeviceId,
        channel: ChannelId,
        samples: Vec<RawSample>,
    ) -> Result<(), StoreError> {
        let base = self.time.nanos();
        let mut inner = self.inner.lock();
        for (index, value) in samples.into_iter().enumerate() {
            inner.samples.push(SamplePoint {
                history_id: run_id,
                device_id: device,
                channel_id: channel,
                value,
                timestamp: base + index as i64 * 1_000_000,
            });
        }
        Ok(())
    }

    async fn list_recent_runs(&self, limit: usize) -> Result<Vec<RunHeader>, StoreError> {
        let mut headers = self.inner.lock().headers.clone();
        headers.sort_by(|a, b| b.history_id.cmp(&a.history_id));
        headers.truncate(limit);
        Ok(headers)
    }

    async fn get_samples(&self, run_id: RunId) -> Result<Vec<SamplePoint>, StoreError> {
        let mut samples: Vec<_> = self
            .inner
            .lock()
            .samples
            .iter()
            .filter(|point| point.history_id == run_id)
            .cloned()
            .collect();
        samples.sort_by_key(|point| point.timestamp);
        samples.truncate(SAMPLES_LIMIT);
        Ok(samples)
    }
}
