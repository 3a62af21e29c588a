use crate::measurement::PassBand;
use std::time::Duration;

const DEFAULT_SCPI_HOST: &str = "localhost";
const DEFAULT_SCPI_PORT: u16 = 5025;
const DEFAULT_CLIENT_PORT: u16 = 5177;
const DEFAULT_TCP_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 100;
const DEFAULT_HISTORY_WINDOW: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Static bench configuration, fixed at process start.
#[derive(Debug, Clone)]
pub struct Config {
    /// number of instruments; device i listens on `scpi_port + i - 1`
    devices: u32,
    scpi_host: String,
    scpi_port: u16,
    /// client-facing port
    client_port: u16,
    tcp_nodelay: bool,
    tcp_buffer_size: usize,
    /// buffer size of the channels created between tasks
    channel_buffer_size: usize,
    pass_band: PassBand,
    /// how far back the measurement history query looks
    history_window: Duration,
}

impl Config {
    /// Creates a configuration for `devices` instruments with default
    /// endpoints and tunables.
    pub fn new(devices: u32) -> Self {
        assert!(devices >= 1, "config: at least one device is required");
        Self {
            devices,
            scpi_host: String::from(DEFAULT_SCPI_HOST),
            scpi_port: DEFAULT_SCPI_PORT,
            client_port: DEFAULT_CLIENT_PORT,
            tcp_nodelay: true,
            tcp_buffer_size: DEFAULT_TCP_BUFFER_SIZE,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
            pass_band: PassBand::default(),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn devices(&self) -> u32 {
        self.devices
    }

    pub fn scpi_host(&self) -> &str {
        &self.scpi_host
    }

    pub fn set_scpi_host<S: Into<String>>(&mut self, host: S) {
        self.scpi_host = host.into();
    }

    pub fn scpi_port(&self) -> u16 {
        self.scpi_port
    }

    pub fn set_scpi_port(&mut self, port: u16) {
        self.scpi_port = port;
    }

    pub fn client_port(&self) -> u16 {
        self.client_port
    }

    pub fn set_client_port(&mut self, port: u16) {
        self.client_port = port;
    }

    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }

    pub fn set_tcp_nodelay(&mut self, tcp_nodelay: bool) {
        self.tcp_nodelay = tcp_nodelay;
    }

    pub fn tcp_buffer_size(&self) -> usize {
        self.tcp_buffer_size
    }

    pub fn set_tcp_buffer_size(&mut self, tcp_buffer_size: usize) {
        self.tcp_buffer_size = tcp_buffer_size;
    }

    pub fn channel_buffer_size(&self) -> usize {
        self.channel_buffer_size
    }

    pub fn set_channel_buffer_size(&mut self, channel_buffer_size: usize) {
        self.channel_buffer_size = channel_buffer_size;
    }

    pub fn pass_band(&self) -> PassBand {
        self.pass_band
    }

    pub fn set_pass_band(&mut self, pass_band: PassBand) {
        self.pass_band = pass_band;
    }

    pub fn history_window(&self) -> Duration {
        self.history_window
    }

    pub fn set_history_window(&mut self, history_window: Duration) {
        self.history_window = history_window;
    }
}
