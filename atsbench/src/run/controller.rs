use crate::config::Config;
use crate::measurement::{ChannelId, DeviceId, RunId, RunStatus};
use crate::protocol::{Command, Outbound};
use crate::run::prelude::FrameSender;
use crate::run::task::{self, batcher, persist, worker};
use crate::scpi::Gateway;
use crate::store::{Store, RECENT_RUNS_LIMIT};
use crate::time::SysTime;
use crate::{info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Pause predicate observed by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Paused,
}

/// Handle to the run currently owning the bench. It exists from the moment a
/// start command is accepted until the terminal persistence frame has been
/// emitted; while it exists, further starts are ignored.
struct ActiveRun {
    phase: watch::Sender<Phase>,
    cancel: CancellationToken,
    epoch: u64,
}

/// Process-wide run state: at most one run is active at any instant, and all
/// run commands are serialized by the internal mutex. Created once at process
/// start and handed to every session.
#[derive(Clone)]
pub struct RunController {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    gateway: Arc<Gateway>,
    store: Arc<dyn Store>,
    time: Arc<dyn SysTime>,
    active: Mutex<Option<ActiveRun>>,
    epochs: AtomicU64,
}

impl RunController {
    pub fn new(
        config: Config,
        gateway: Arc<Gateway>,
        store: Arc<dyn Store>,
        time: Arc<dyn SysTime>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                gateway,
                store,
                time,
                active: Mutex::new(None),
                epochs: AtomicU64::new(0),
            }),
        }
    }

    /// Handles one inbound command frame; outbound frames produced by it (or
    /// by the run it starts) go to `frames`.
    pub async fn handle(&self, command: Command, frames: &FrameSender) {
        match command {
            Command::Start { devices, channels } => self.start(devices, channels, frames.clone()),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Stop => self.stop(),
            Command::GetMeasurementHistory => self.measurement_history(frames).await,
            Command::GetHistoricalData { params } => {
                self.historical_data(params.history_id, frames).await
            }
        }
    }

    fn start(&self, devices: Vec<DeviceId>, channels: Vec<ChannelId>, frames: FrameSender) {
        let mut active = self.inner.active.lock();
        if active.is_some() {
            // a run is live, or still persisting: ignore
            warn!("[controller] start ignored: a run is already active");
            return;
        }

        let (phase_tx, phase_rx) = watch::channel(Phase::Running);
        let cancel = CancellationToken::new();
        let epoch = self.inner.epochs.fetch_add(1, Ordering::SeqCst);
        *active = Some(ActiveRun {
            phase: phase_tx,
            cancel: cancel.clone(),
            epoch,
        });
        drop(active);

        info!(
            "[controller] run started: devices {:?}, channels {:?}",
            devices, channels
        );
        task::spawn(run_task(
            self.clone(),
            devices,
            channels,
            phase_rx,
            cancel,
            frames,
            epoch,
        ));
    }

    fn pause(&self) {
        let active = self.inner.active.lock();
        match active.as_ref() {
            Some(run) if !run.cancel.is_cancelled() && *run.phase.borrow() == Phase::Running => {
                // a send error just means the fleet is already gone
                let _ = run.phase.send(Phase::Paused);
                info!("[controller] run paused");
            }
            _ => warn!("[controller] pause ignored: no running measurement"),
        }
    }

    fn resume(&self) {
        let active = self.inner.active.lock();
        match active.as_ref() {
            Some(run) if !run.cancel.is_cancelled() && *run.phase.borrow() == Phase::Paused => {
                // wakes all paused workers
                let _ = run.phase.send(Phase::Running);
                info!("[controller] run resumed");
            }
            _ => warn!("[controller] resume ignored: no paused measurement"),
        }
    }

    fn stop(&self) {
        let active = self.inner.active.lock();
        match active.as_ref() {
            Some(run) => {
                // set-once: a duplicate stop is a no-op
                run.cancel.cancel();
                // wake any pause-waiter so it can observe the cancellation
                let _ = run.phase.send(Phase::Running);
                info!("[controller] run stopping");
            }
            None => warn!("[controller] stop ignored: no running measurement"),
        }
    }

    async fn measurement_history(&self, frames: &FrameSender) {
        let frame = match self.inner.store.list_recent_runs(RECENT_RUNS_LIMIT).await {
            Ok(history) => Outbound::MeasurementHistory { history },
            Err(e) => {
                warn!("[controller] error querying run history: {}", e);
                Outbound::error(format!("failed to query history: {}", e))
            }
        };
        send_frame(frames, frame).await;
    }

    async fn historical_data(&self, history_id: RunId, frames: &FrameSender) {
        let frame = match self.inner.store.get_samples(history_id).await {
            Ok(results) => Outbound::HistoricalData {
                history_id,
                results,
            },
            Err(e) => {
                warn!("[controller] error querying run {}: {}", history_id, e);
                Outbound::error(format!("failed to query run {}: {}", history_id, e))
            }
        };
        send_frame(frames, frame).await;
    }

    /// Forgets the active run, if it still is the one `epoch` names.
    fn clear(&self, epoch: u64) {
        let mut active = self.inner.active.lock();
        if let Some(run) = active.as_ref() {
            if run.epoch == epoch {
                *active = None;
                info!("[controller] run finished");
            }
        }
    }

    /// Whether a run currently owns the bench.
    pub fn is_active(&self) -> bool {
        self.inner.active.lock().is_some()
    }
}

/// Drives one run end to end: fan out workers, stream batches, then persist.
/// The run stays active (blocking new starts) until the terminal persistence
/// frame is out.
async fn run_task(
    controller: RunController,
    devices: Vec<DeviceId>,
    channels: Vec<ChannelId>,
    phase: watch::Receiver<Phase>,
    cancel: CancellationToken,
    frames: FrameSender,
    epoch: u64,
) {
    let inner = &controller.inner;
    let start_time = inner.time.millis();
    let device_count = devices.len() as u32;
    let channel_count = channels.len() as u32;

    // results channel bounded at one slot per requested channel
    let capacity = (devices.len() * channels.len()).max(1);
    let (mut results_tx, results_rx) = task::channel(capacity);
    results_tx.set_name("results");

    let fleet = task::spawn(worker::fleet(
        inner.gateway.clone(),
        inner.config.pass_band(),
        devices,
        channels,
        phase,
        cancel.clone(),
        results_tx,
    ));

    // stream until the fleet closes the results channel
    let all_results = batcher::batcher_task(results_rx, frames.clone()).await;
    if let Err(e) = fleet.await {
        warn!("[run] fleet ended badly: {:?}", e);
    }

    // streaming is over; persistence outlives it
    let status = if cancel.is_cancelled() {
        RunStatus::Aborted
    } else {
        RunStatus::Completed
    };
    persist::persist_task(
        inner.store.clone(),
        inner.time.clone(),
        start_time,
        device_count,
        channel_count,
        status,
        all_results,
        &frames,
    )
    .await;

    controller.clear(epoch);
}

async fn send_frame(frames: &FrameSender, frame: Outbound) {
    if let Err(e) = frames.send(frame).await {
        warn!("[controller] error writing to session sink: {:?}", e);
    }
}
