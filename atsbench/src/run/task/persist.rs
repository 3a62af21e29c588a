use crate::measurement::{ChannelResult, RunStatus};
use crate::protocol::Outbound;
use crate::run::prelude::FrameSender;
use crate::run::task;
use crate::store::Store;
use crate::time::SysTime;
use crate::{info, warn};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Upper bound on in-flight sample writes.
const MAX_INFLIGHT_WRITES: usize = 10;

/// Writes the run header and every collected result to the store, then emits
/// the terminal status frame. Runs strictly after streaming has ended, so a
/// run is only forgotten once its data is queryable.
pub async fn persist_task(
    store: Arc<dyn Store>,
    time: Arc<dyn SysTime>,
    start_time: u64,
    device_count: u32,
    channel_count: u32,
    status: RunStatus,
    all_results: Vec<ChannelResult>,
    frames: &FrameSender,
) {
    let end_time = time.millis();
    let run_id = match store
        .write_run_header(start_time, end_time, status, device_count, channel_count)
        .await
    {
        Ok(run_id) => run_id,
        Err(e) => {
            // without a header there is nothing to attach samples to: report
            // and discard the in-memory results
            warn!("[persist] error writing run header: {}", e);
            send_frame(frames, Outbound::error(format!("failed to persist run: {}", e))).await;
            return;
        }
    };

    send_frame(
        frames,
        Outbound::Writing {
            message: format!("persisting {} channel results", all_results.len()),
        },
    )
    .await;

    let semaphore = Arc::new(Semaphore::new(MAX_INFLIGHT_WRITES));
    let mut writes: FuturesUnordered<_> = all_results
        .into_iter()
        .map(|result| {
            let store = store.clone();
            let semaphore = semaphore.clone();
            task::spawn(async move {
                // the permit bounds how many writes are in flight; the
                // semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                if let Err(e) = store
                    .write_samples(run_id, result.device, result.channel, result.voltages)
                    .await
                {
                    // an individual write failure does not abort the batch
                    warn!(
                        "[persist] error writing samples for device {} channel {}: {}",
                        result.device, result.channel, e
                    );
                }
            })
        })
        .collect();
    while let Some(join) = writes.next().await {
        if let Err(e) = join {
            warn!("[persist] write task ended badly: {:?}", e);
        }
    }

    info!("[persist] run {} persisted", run_id);
    send_frame(
        frames,
        Outbound::completed_message(format!("run {} persisted", run_id)),
    )
    .await;
}

async fn send_frame(frames: &FrameSender, frame: Outbound) {
    if let Err(e) = frames.send(frame).await {
        warn!("[persist] error writing to session sink: {:?}", e);
    }
}
