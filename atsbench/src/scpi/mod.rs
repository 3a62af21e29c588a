// This module contains the instrument gateway: one pooled TCP stream per
// device, serving `MEAS:<channel>` requests. Requests on a given device are
// serialized on its stream; different devices can be measured in parallel.

// Scriptable stand-in for an instrument, used by tests.
#[cfg(test)]
pub mod stub;

use crate::measurement::{ChannelId, DeviceId, RawSample};
use crate::run::prelude::RunResult;
use crate::run::rw::Connection;
use crate::run::task;
use crate::{info, warn, HashMap};
use color_eyre::eyre::WrapErr;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

/// Number of connection attempts made per instrument at bring-up.
const CONNECT_RETRIES: usize = 10;

/// Errors surfaced by a measurement request.
#[derive(Debug, Error)]
pub enum ScpiError {
    /// No stream is pooled for this device.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
    /// The stream failed or closed mid-request.
    #[error("i/o error on device {0}")]
    Io(DeviceId),
    /// The device replied with bad JSON or without the requested channel.
    #[error("protocol error on device {0}: {1}")]
    Protocol(DeviceId, String),
}

/// Pool of line-framed JSON connections to the instruments.
pub struct Gateway {
    /// connected streams; the outer mutex guards open/close, the per-stream
    /// mutex serializes requests on one device
    streams: Mutex<HashMap<DeviceId, Arc<AsyncMutex<Connection>>>>,
    tcp_nodelay: bool,
    tcp_buffer_size: usize,
}

impl Gateway {
    pub fn new(tcp_nodelay: bool, tcp_buffer_size: usize) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            tcp_nodelay,
            tcp_buffer_size,
        }
    }

    /// Opens one stream per device: device i lives at `(host, base_port + i - 1)`.
    /// Fails atomically: on the first failure the streams opened so far are
    /// dropped (which closes them) and the error is surfaced.
    pub async fn connect(&self, host: &str, base_port: u16, devices: u32) -> RunResult<()> {
        let mut streams = HashMap::with_capacity(devices as usize);
        for device in 1..=devices {
            let port = base_port + device as u16 - 1;
            let connection = task::connect(
                (host, port),
                self.tcp_nodelay,
                self.tcp_buffer_size,
                CONNECT_RETRIES,
            )
            .await
            .wrap_err_with(|| {
                format!("error connecting to device {} at {}:{}", device, host, port)
            })?;
            info!("[gateway] connected to device {} at {}:{}", device, host, port);
            streams.insert(device, Arc::new(AsyncMutex::new(connection)));
        }
        *self.streams.lock() = streams;
        Ok(())
    }

    /// Closes all pooled streams.
    pub fn close(&self) {
        // dropping the connections closes them
        self.streams.lock().clear();
        info!("[gateway] closed");
    }

    /// Measures one channel: writes `MEAS:<channel>` on the device's stream
    /// and reads back one JSON line mapping channel to samples.
    pub async fn measure(
        &self,
        device: DeviceId,
        channel: ChannelId,
    ) -> Result<Vec<RawSample>, ScpiError> {
        // clone the handle out of the map so that other devices can keep
        // measuring while this request is in flight
        let stream = self
            .streams
            .lock()
            .get(&device)
            .cloned()
            .ok_or(ScpiError::UnknownDevice(device))?;
        let mut stream = stream.lock().await;

        if let Err(e) = stream.send_raw(&format!("MEAS:{}", channel)).await {
            warn!("[gateway] error writing request to device {}: {:?}", device, e);
            return Err(ScpiError::Io(device));
        }

        match stream.recv::<HashMap<String, Vec<RawSample>>>().await {
            Some(Ok(mut reply)) => reply.remove(&channel.to_string()).ok_or_else(|| {
                ScpiError::Protocol(device, format!("channel {} missing from reply", channel))
            }),
            Some(Err(e)) => Err(ScpiError::Protocol(device, format!("{:#}", e))),
            None => Err(ScpiError::Io(device)),
        }
    }
}
