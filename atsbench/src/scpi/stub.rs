// Scriptable stand-in for one instrument: listens on a port, answers
// `MEAS:<channel>` lines with a canned JSON reply, and can be told to add
// latency or to answer selected channels with a reply that fails to parse.

use crate::measurement::{ChannelId, RawSample};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;

/// Behavior of one stub instrument.
#[derive(Debug, Clone)]
pub struct StubInstrument {
    /// samples returned for every channel
    voltages: Vec<RawSample>,
    /// artificial per-request latency
    latency: Duration,
    /// channels answered with a reply that is missing the requested key
    faulty_channels: Vec<ChannelId>,
}

impl StubInstrument {
    pub fn new(voltages: Vec<RawSample>) -> Self {
        Self {
            voltages,
            latency: Duration::from_millis(0),
            faulty_channels: Vec::new(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_faulty_channel(mut self, channel: ChannelId) -> Self {
        self.faulty_channels.push(channel);
        self
    }

    /// Binds `port` on localhost and serves requests until the test ends.
    pub async fn spawn(self, port: u16) {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("stub instrument should bind");
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                tokio::spawn(self.clone().serve(stream));
            }
        });
    }

    async fn serve(self, stream: TcpStream) {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let channel = line
                .trim()
                .strip_prefix("MEAS:")
                .and_then(|channel| channel.parse::<ChannelId>().ok());
            tokio::time::sleep(self.latency).await;
            let reply = match channel {
                Some(channel) if self.faulty_channels.contains(&channel) => String::from("{}"),
                Some(channel) => format!(
                    "{{\"{}\":{}}}",
                    channel,
                    serde_json::to_string(&self.voltages).expect("samples should encode")
                ),
                None => String::from("not json"),
            };
            if write.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

/// Finds a base port such that `count` consecutive ports are free.
// adapted from: https://github.com/rust-lang-nursery/rust-cookbook/issues/500
pub fn available_base_port(count: u16) -> u16 {
    use rand::Rng;
    loop {
        let base = rand::thread_rng().gen_range(1025..(65535 - count));
        if (0..count).all(|offset| port_is_available(base + offset)) {
            return base;
        }
    }
}

fn port_is_available(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}
