// This module contains the closed frame vocabulary spoken with clients. Both
// directions are JSON objects tagged by `action` (inbound) or `status`
// (outbound); anything outside this vocabulary is rejected at decode time.

use crate::measurement::{ChannelId, ChannelResult, DeviceId, RunHeader, RunId, SamplePoint};
use serde::{Deserialize, Serialize};

/// Inbound command frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    /// Starts a run over the given devices and channels.
    Start {
        devices: Vec<DeviceId>,
        channels: Vec<ChannelId>,
    },
    Pause,
    Resume,
    Stop,
    GetMeasurementHistory,
    GetHistoricalData { params: HistoryParams },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryParams {
    #[serde(rename = "historyID")]
    pub history_id: RunId,
}

/// Outbound status frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outbound {
    /// A batch of fresh results from the running measurement.
    #[serde(rename = "in_progress")]
    InProgress { results: Vec<ChannelResult> },
    /// Emitted twice per run with different payloads: the final streaming
    /// batch carries `results`, the persistence terminal frame carries
    /// `message`.
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        results: Option<Vec<ChannelResult>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Writing {
        message: String,
    },
    Error {
        message: String,
    },
    MeasurementHistory {
        history: Vec<RunHeader>,
    },
    HistoricalData {
        #[serde(rename = "historyID")]
        history_id: RunId,
        results: Vec<SamplePoint>,
    },
}

impl Outbound {
    /// The final streaming batch of a run.
    pub fn completed_batch(results: Vec<ChannelResult>) -> Self {
        Self::Completed {
            results: Some(results),
            message: None,
        }
    }

    /// The terminal frame of a run, emitted once persistence is done.
    pub fn completed_message<S: Into<String>>(message: S) -> Self {
        Self::Completed {
            results: None,
            message: Some(message.into()),
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::PassBand;

    #[test]
    fn start_command_decodes() {
        let frame = r#"{"action":"start","devices":[1,2],"channels":[1,2,3]}"#;
        let command: Command = serde_json::from_str(frame).expect("frame should decode");
        assert_eq!(
            command,
            Command::Start {
                devices: vec![1, 2],
                channels: vec![1, 2, 3],
            }
        );
    }

    #[test]
    fn bare_commands_decode() {
        for (frame, expected) in &[
            (r#"{"action":"pause"}"#, Command::Pause),
            (r#"{"action":"resume"}"#, Command::Resume),
            (r#"{"action":"stop"}"#, Command::Stop),
            (
                r#"{"action":"getMeasurementHistory"}"#,
                Command::GetMeasurementHistory,
            ),
        ] {
            let command: Command = serde_json::from_str(frame).expect("frame should decode");
            assert_eq!(command, *expected);
        }
    }

    #[test]
    fn historical_data_command_decodes() {
        let frame = r#"{"action":"getHistoricalData","params":{"historyID":1712345678901234567}}"#;
        let command: Command = serde_json::from_str(frame).expect("frame should decode");
        assert_eq!(
            command,
            Command::GetHistoricalData {
                params: HistoryParams {
                    history_id: 1712345678901234567,
                },
            }
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(serde_json::from_str::<Command>(r#"{"action":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<Command>(r#"{"devices":[1]}"#).is_err());
    }

    #[test]
    fn in_progress_frame_encodes() {
        let band = PassBand::default();
        let frame = Outbound::InProgress {
            results: vec![ChannelResult::new(1, 2, vec![7000], &band)],
        };
        let json = serde_json::to_string(&frame).expect("frame should encode");
        assert_eq!(
            json,
            r#"{"status":"in_progress","results":[{"device":1,"channel":2,"voltages":[7000],"passed":false}]}"#
        );
    }

    #[test]
    fn the_two_completed_shapes_are_distinguishable() {
        let streaming = Outbound::completed_batch(vec![]);
        let json = serde_json::to_string(&streaming).expect("frame should encode");
        assert_eq!(json, r#"{"status":"completed","results":[]}"#);

        let terminal = Outbound::completed_message("run 1 persisted");
        let json = serde_json::to_string(&terminal).expect("frame should encode");
        assert_eq!(json, r#"{"status":"completed","message":"run 1 persisted"}"#);

        // and they survive a decode round trip
        for frame in &[streaming, terminal] {
            let json = serde_json::to_string(frame).expect("frame should encode");
            let back: Outbound = serde_json::from_str(&json).expect("frame should decode");
            assert_eq!(back, *frame);
        }
    }

    #[test]
    fn history_frames_use_the_wire_names() {
        let frame = Outbound::HistoricalData {
            history_id: 42,
            results: vec![],
        };
        let json = serde_json::to_string(&frame).expect("frame should encode");
        assert_eq!(
            json,
            r#"{"status":"historicalData","historyID":42,"results":[]}"#
        );

        let frame = Outbound::MeasurementHistory { history: vec![] };
        let json = serde_json::to_string(&frame).expect("frame should encode");
        assert_eq!(json, r#"{"status":"measurementHistory","history":[]}"#);
    }
}
