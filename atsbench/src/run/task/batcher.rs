use crate::measurement::ChannelResult;
use crate::protocol::Outbound;
use crate::run::prelude::{FrameSender, ResultReceiver};
use crate::warn;
use tokio::time::{self, Duration};

/// Results are flushed to the sink once this many accumulate.
pub const BATCH_SIZE: usize = 10;

/// A non-empty buffer is flushed at least this often.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Single consumer of the results channel, single writer to the session sink.
/// Streams bounded batches until the fleet closes the channel, then emits the
/// final batch as the streaming `completed` frame. Returns the canonical set
/// of results streamed, in emission order, for the persistence pipeline.
pub async fn batcher_task(mut results: ResultReceiver, frames: FrameSender) -> Vec<ChannelResult> {
    let mut buffer = Vec::with_capacity(BATCH_SIZE);
    let mut all_results = Vec::new();
    // once the sink dies we keep draining, so that workers stay unblocked,
    // but stop writing
    let mut sink_gone = false;
    let mut interval = time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            result = results.recv() => match result {
                Some(result) => {
                    all_results.push(result.clone());
                    buffer.push(result);
                    if buffer.len() >= BATCH_SIZE {
                        flush(&mut buffer, &frames, &mut sink_gone).await;
                    }
                }
                None => break,
            },
            _ = interval.tick() => {
                if !buffer.is_empty() {
                    flush(&mut buffer, &frames, &mut sink_gone).await;
                }
            }
        }
    }

    // the terminal streaming frame carries whatever is left over
    let last_batch = std::mem::take(&mut buffer);
    send_frame(Outbound::completed_batch(last_batch), &frames, &mut sink_gone).await;
    all_results
}

async fn flush(buffer: &mut Vec<ChannelResult>, frames: &FrameSender, sink_gone: &mut bool) {
    let results = std::mem::take(buffer);
    send_frame(Outbound::InProgress { results }, frames, sink_gone).await;
}

async fn send_frame(frame: Outbound, frames: &FrameSender, sink_gone: &mut bool) {
    if *sink_gone {
        return;
    }
    if let Err(e) = frames.send(frame).await {
        warn!("[batcher] error writing to session sink: {:?}", e);
        *sink_gone = true;
    }
}
