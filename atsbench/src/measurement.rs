use serde::{Deserialize, Serialize};

/// Identifies one instrument endpoint.
pub type DeviceId = u32;

/// Identifies one channel on a device.
pub type ChannelId = u32;

/// Raw ADC reading in the device's native scale.
pub type RawSample = u32;

/// Identifies one run; minted from wall-clock nanoseconds when the run is
/// persisted.
pub type RunId = i64;

/// The open interval whose interior samples must avoid for a channel to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassBand {
    lo: RawSample,
    hi: RawSample,
}

impl PassBand {
    pub const fn new(lo: RawSample, hi: RawSample) -> Self {
        Self { lo, hi }
    }

    /// A channel passes iff no sample falls strictly inside `(lo, hi)`.
    pub fn passes(&self, samples: &[RawSample]) -> bool {
        !samples
            .iter()
            .any(|sample| self.lo < *sample && *sample < self.hi)
    }
}

impl Default for PassBand {
    // nominally 0.5V-3.5V on a 16-bit scale
    fn default() -> Self {
        Self::new(6554, 45875)
    }
}

/// One device/channel's full sample set for a run, plus its pass flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub device: DeviceId,
    pub channel: ChannelId,
    pub voltages: Vec<RawSample>,
    pub passed: bool,
}

impl ChannelResult {
    /// Creates a result for `voltages`, deriving the pass flag from `band`.
    pub fn new(
        device: DeviceId,
        channel: ChannelId,
        voltages: Vec<RawSample>,
        band: &PassBand,
    ) -> Self {
        let passed = band.passes(&voltages);
        Self {
            device,
            channel,
            voltages,
            passed,
        }
    }
}

/// Status a run header is stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The run drained every requested channel.
    Completed,
    /// The run was cut short by a stop command.
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(status: &str) -> Result<Self, Self::Err> {
        match status {
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// Stored header of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHeader {
    pub history_id: RunId,
    pub start_time: u64,
    pub end_time: u64,
    pub status: RunStatus,
    pub device_count: u32,
    pub channel_count: u32,
}

/// One stored sample point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub history_id: RunId,
    pub device_id: DeviceId,
    pub channel_id: ChannelId,
    pub value: RawSample,
    /// Nanoseconds since the epoch; within one channel's samples, timestamps
    /// increase by 1ms from the write base.
    pub timestamp: i64,
}
