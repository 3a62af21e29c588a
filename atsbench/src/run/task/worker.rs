use crate::measurement::{ChannelId, ChannelResult, DeviceId, PassBand};
use crate::run::controller::Phase;
use crate::run::prelude::ResultSender;
use crate::run::task;
use crate::scpi::Gateway;
use crate::{trace, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Spawns one worker per device and waits for all of them; dropping the last
/// sender clone closes the results channel, which is how the batcher learns
/// the fleet is done.
pub async fn fleet(
    gateway: Arc<Gateway>,
    pass_band: PassBand,
    devices: Vec<DeviceId>,
    channels: Vec<ChannelId>,
    phase: watch::Receiver<Phase>,
    cancel: CancellationToken,
    results: ResultSender,
) {
    let handles: Vec<_> = devices
        .into_iter()
        .map(|device| {
            task::spawn(device_worker(
                gateway.clone(),
                pass_band,
                device,
                channels.clone(),
                phase.clone(),
                cancel.clone(),
                results.clone(),
            ))
        })
        .collect();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("[fleet] worker ended badly: {:?}", e);
        }
    }
}

/// Iterates this device's channels in request order. Pauses hold the worker
/// before the next measurement; a stop ends it. A failed measurement skips
/// that channel only.
async fn device_worker(
    gateway: Arc<Gateway>,
    pass_band: PassBand,
    device: DeviceId,
    channels: Vec<ChannelId>,
    mut phase: watch::Receiver<Phase>,
    cancel: CancellationToken,
    results: ResultSender,
) {
    for channel in channels {
        if !wait_while_paused(&mut phase, &cancel).await {
            trace!("[worker {}] stopping before channel {}", device, channel);
            return;
        }

        let voltages = match gateway.measure(device, channel).await {
            Ok(voltages) => voltages,
            Err(e) => {
                // skip this channel; the run continues
                warn!("[worker {}] error measuring channel {}: {}", device, channel, e);
                continue;
            }
        };

        let result = ChannelResult::new(device, channel, voltages, &pass_band);
        tokio::select! {
            _ = cancel.cancelled() => {
                trace!("[worker {}] stopping with channel {} in hand", device, channel);
                return;
            }
            sent = results.send(result) => {
                if let Err(e) = sent {
                    warn!("[worker {}] error emitting result: {:?}", device, e);
                    return;
                }
            }
        }
    }
}

/// Waits until the run is unpaused; `false` means the run was cancelled (or
/// the controller went away) and the worker must return.
async fn wait_while_paused(
    phase: &mut watch::Receiver<Phase>,
    cancel: &CancellationToken,
) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        if *phase.borrow_and_update() == Phase::Running {
            return true;
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            changed = phase.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}
