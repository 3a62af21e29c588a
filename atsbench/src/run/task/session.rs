use crate::protocol::{Command, Outbound};
use crate::run::controller::RunController;
use crate::run::prelude::FrameSender;
use crate::run::rw::Connection;
use crate::run::task;
use crate::{info, warn, HashMap};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Registry of live session sinks, so that frames can be broadcast to every
/// connected client. Guarded by its own mutex; a sink that fails a broadcast
/// write is evicted.
#[derive(Default)]
pub struct Sessions {
    next_id: AtomicU64,
    sinks: Mutex<HashMap<u64, FrameSender>>,
}

impl Sessions {
    pub fn new() -> Self {
        Default::default()
    }

    fn register(&self, frames: FrameSender) -> u64 {
        let session_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sinks.lock().insert(session_id, frames);
        session_id
    }

    fn deregister(&self, session_id: u64) {
        self.sinks.lock().remove(&session_id);
    }

    /// Sends `frame` to every live sink, evicting the ones that fail.
    pub async fn broadcast(&self, frame: Outbound) {
        // snapshot the sinks so the lock is not held across the sends
        let sinks: Vec<(u64, FrameSender)> = self
            .sinks
            .lock()
            .iter()
            .map(|(session_id, frames)| (*session_id, frames.clone()))
            .collect();

        let mut dead = Vec::new();
        for (session_id, frames) in sinks {
            if frames.send(frame.clone()).await.is_err() {
                dead.push(session_id);
            }
        }
        if !dead.is_empty() {
            let mut sinks = self.sinks.lock();
            for session_id in dead {
                warn!("[sessions] evicting dead sink {}", session_id);
                sinks.remove(&session_id);
            }
        }
    }

    pub fn connected(&self) -> usize {
        self.sinks.lock().len()
    }
}

/// Serves one client connection: decodes command frames and forwards them to
/// the controller, and writes every frame produced on this session's sink
/// back out. Inbound handling is serialized with outbound writes, so the
/// bounded sink channel is what stalls a run when the client stops reading.
pub async fn session_task(
    controller: RunController,
    sessions: std::sync::Arc<Sessions>,
    mut connection: Connection,
    channel_buffer_size: usize,
) {
    let (mut frames_tx, mut frames_rx) = task::channel::<Outbound>(channel_buffer_size);
    frames_tx.set_name("session_sink");
    let session_id = sessions.register(frames_tx.clone());
    info!("[session {}] connected from {:?}", session_id, connection.ip_addr());

    loop {
        tokio::select! {
            inbound = connection.recv::<Command>() => match inbound {
                Some(Ok(command)) => controller.handle(command, &frames_tx).await,
                Some(Err(e)) => {
                    // a malformed frame is dropped, the session lives on
                    warn!("[session {}] ignoring malformed frame: {:?}", session_id, e);
                }
                None => break,
            },
            outbound = frames_rx.recv() => {
                // a sender is held locally, so the channel cannot be closed
                if let Some(frame) = outbound {
                    if let Err(e) = connection.send(&frame).await {
                        warn!("[session {}] error writing frame: {:?}", session_id, e);
                        break;
                    }
                }
            }
        }
    }

    sessions.deregister(session_id);
    info!("[session {}] disconnected", session_id);
}
