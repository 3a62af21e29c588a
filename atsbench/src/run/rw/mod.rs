// This module contains the definition of `Connection`.
mod connection;

// Re-exports.
pub use connection::Connection;

use crate::warn;
use color_eyre::eyre::{Report, WrapErr};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, BufStream};
use tokio_util::codec::{Framed, LinesCodec};

/// Delimits JSON frames using newlines.
#[derive(Debug)]
pub struct Rw<S> {
    rw: Framed<BufStream<S>, LinesCodec>,
}

impl<S> Rw<S>
where
    S: AsyncWrite + AsyncRead + Unpin,
{
    pub fn from(reader_capacity: usize, writer_capacity: usize, rw: S) -> Self {
        // buffer rw
        let rw = BufStream::with_capacity(reader_capacity, writer_capacity, rw);
        // frame rw
        let rw = Framed::new(rw, LinesCodec::new());
        Self { rw }
    }

    /// Receives the next frame. `None` means the stream is done (EOF or a
    /// broken transport); `Some(Err)` means one frame failed to decode and the
    /// stream is still usable.
    pub async fn recv<V>(&mut self) -> Option<Result<V, Report>>
    where
        V: DeserializeOwned,
    {
        match self.rw.next().await {
            Some(Ok(line)) => {
                let value = serde_json::from_str(&line)
                    .wrap_err_with(|| format!("error decoding frame: {}", line));
                Some(value)
            }
            Some(Err(e)) => {
                warn!("[rw] error while reading from stream: {:?}", e);
                None
            }
            None => None,
        }
    }

    /// Sends one value as a JSON frame, flushing the socket.
    pub async fn send<V>(&mut self, value: &V) -> Result<(), Report>
    where
        V: Serialize,
    {
        let json = serde_json::to_string(value).wrap_err("error encoding frame")?;
        self.rw
            .send(json)
            .await
            .wrap_err("error while sending to sink")
    }

    /// Sends one raw line, flushing the socket.
    pub async fn send_raw(&mut self, line: &str) -> Result<(), Report> {
        self.rw
            .send(line)
            .await
            .wrap_err("error while sending to sink")
    }
}
