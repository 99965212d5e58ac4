use std::time::Duration;

use thiserror::Error;

/// Failures originating in the control core. None of them are fatal to the
/// process; the owning session decides what to do.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown flight profile '{0}' (expected eco, standard or performance)")]
    InvalidProfileName(String),

    #[error("command streamer already running")]
    AlreadyRunning,

    #[error("command streamer not running")]
    NotRunning,

    #[error("command streamer did not stop within {0:?}")]
    StopTimeout(Duration),

    #[error("command streamer task failed: {0}")]
    StreamerJoin(String),
}

/// Errors reported by a [`VehicleLink`](crate::link::VehicleLink).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("link transmit failed: {0}")]
    Transmit(String),

    #[error("vehicle link disconnected")]
    Disconnected,

    #[error("command rejected by link: {0}")]
    Rejected(String),
}
