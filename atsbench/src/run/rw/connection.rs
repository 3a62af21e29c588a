use super::Rw;
use crate::warn;
use color_eyre::Report;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use tokio::net::TcpStream;

/// A line-framed JSON connection over a TCP stream.
pub struct Connection {
    stream: Rw<TcpStream>,
    ip_addr: Option<IpAddr>,
}

impl Connection {
    pub fn new(stream: TcpStream, tcp_nodelay: bool, tcp_buffer_size: usize) -> Self {
        if let Err(e) = stream.set_nodelay(tcp_nodelay) {
            warn!("[connection] error setting tcp nodelay: {:?}", e);
        }
        let ip_addr = stream.peer_addr().ok().map(|address| address.ip());
        let stream = Rw::from(tcp_buffer_size, tcp_buffer_size, stream);
        Self { stream, ip_addr }
    }

    pub fn ip_addr(&self) -> Option<IpAddr> {
        self.ip_addr
    }

    pub async fn recv<V>(&mut self) -> Option<Result<V, Report>>
    where
        V: DeserializeOwned,
    {
        self.stream.recv().await
    }

    pub async fn send<V>(&mut self, value: &V) -> Result<(), Report>
    where
        V: Serialize,
    {
        self.stream.send(value).await
    }

    pub async fn send_raw(&mut self, line: &str) -> Result<(), Report> {
        self.stream.send_raw(line).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection({:?})", self.ip_addr)
    }
}
