use super::task::chan::{ChannelReceiver, ChannelSender};
use crate::measurement::ChannelResult;
use crate::protocol::Outbound;
use color_eyre::Report;

pub type RunResult<T> = Result<T, Report>;

/// Channel carrying fresh results from the worker fleet to the batcher.
pub type ResultSender = ChannelSender<ChannelResult>;
pub type ResultReceiver = ChannelReceiver<ChannelResult>;

/// Channel carrying outbound frames to a session's socket writer.
pub type FrameSender = ChannelSender<Outbound>;
pub type FrameReceiver = ChannelReceiver<Outbound>;
