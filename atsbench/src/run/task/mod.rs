// This module contains the channel wrappers used between tasks.
pub mod chan;

// This module contains the stream batcher.
pub mod batcher;

// This module contains the persistence pipeline.
pub mod persist;

// This module contains the client session task.
pub mod session;

// This module contains the worker fleet.
pub mod worker;

// Re-exports.
pub use chan::{ChannelReceiver, ChannelSender};

use crate::run::rw::Connection;
use crate::{info, warn};
use color_eyre::eyre::{Report, WrapErr};
use std::future::Future;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

/// Delay between connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Spawns a single task and returns its handle.
pub fn spawn<F>(task: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(task)
}

/// Creates a new bounded channel.
pub fn channel<M>(buffer_size: usize) -> (ChannelSender<M>, ChannelReceiver<M>) {
    chan::channel(buffer_size)
}

/// Spawns a producer task, returning the receiver end of the channel it feeds.
pub fn spawn_producer<M, F>(
    buffer_size: usize,
    producer: impl FnOnce(ChannelSender<M>) -> F,
) -> ChannelReceiver<M>
where
    M: Send + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = chan::channel(buffer_size);
    spawn(producer(tx));
    rx
}

/// Starts a TCP listener.
pub async fn listen<A>(address: A) -> Result<TcpListener, Report>
where
    A: ToSocketAddrs,
{
    TcpListener::bind(address)
        .await
        .wrap_err("error binding tcp listener")
}

/// Accepts connections on `listener`, forwarding them to `tx`.
pub async fn listener_task(
    listener: TcpListener,
    tcp_nodelay: bool,
    tcp_buffer_size: usize,
    tx: ChannelSender<Connection>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, address)) => {
                info!("[listener] new connection from {}", address);
                let connection = Connection::new(stream, tcp_nodelay, tcp_buffer_size);
                if let Err(e) = tx.send(connection).await {
                    warn!("[listener] error forwarding connection: {:?}", e);
                    return;
                }
            }
            Err(e) => {
                warn!("[listener] error accepting connection: {:?}", e);
            }
        }
    }
}

/// Connects to `address`, retrying up to `connect_retries` times.
pub async fn connect<A>(
    address: A,
    tcp_nodelay: bool,
    tcp_buffer_size: usize,
    connect_retries: usize,
) -> Result<Connection, Report>
where
    A: ToSocketAddrs + Clone,
{
    let mut tries = 0;
    loop {
        match TcpStream::connect(address.clone()).await {
            Ok(stream) => {
                let connection = Connection::new(stream, tcp_nodelay, tcp_buffer_size);
                return Ok(connection);
            }
            Err(e) => {
                tries += 1;
                if tries < connect_retries {
                    time::sleep(CONNECT_RETRY_DELAY).await;
                } else {
                    return Err(e).wrap_err("error connecting");
                }
            }
        }
    }
}
