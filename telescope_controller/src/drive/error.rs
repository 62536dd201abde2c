use std::time::Duration;

use ez80::{FrameError, ProtocolError};

use crate::models::Arm;

/// Conditions that latch a drive into its error state until cleared.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriveFault {
    #[error("Controller reported error code {code}")]
    Hardware { code: u8 },

    #[error("Controller socket count {count} exceeds limit {limit}")]
    SocketCountLimit { count: u8, limit: u8 },

    #[error("Lost contact with controller while driving: {message}")]
    Link { message: String },

    #[error("Tracker gave up: {message}")]
    Tracking { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Drive is in error state: {0}")]
    Fault(DriveFault),

    #[error("Requested move is within the {limit} count deadband")]
    Count { limit: u32 },

    #[error("Both arms are disabled")]
    ArmsDisabled,

    #[error("The {arm} arm is disabled")]
    ArmDisabled { arm: Arm },

    #[error("Requested count {count} is outside the encoder range")]
    CountOutOfRange { count: i64 },

    #[error("Previous command still running {0:?} after interrupt")]
    InterruptTimeout(Duration),
}

impl From<FrameError> for DriveError {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::Io(e) => DriveError::Transport(e),
            FrameError::Protocol(e) => DriveError::Protocol(e),
        }
    }
}

impl DriveError {
    /// Failures of the connection itself, as opposed to refusals or faults.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            DriveError::Connect { .. } | DriveError::Transport(_) | DriveError::Protocol(_)
        )
    }
}
