use crate::error::PlayerError;
use std::fmt;

/// Where a load is in its two asynchronous steps
#[derive(Debug, Clone, PartialEq)]
pub enum LoadPhase {
    /// Waiting on the server's start-session response
    AwaitingSession,
    /// Session known, waiting for the first segment's metadata
    AwaitingMedia { track_index: usize, track_time: f64 },
}

/// In-flight move to another segment
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSwitch {
    pub target_track: usize,
    pub target_time: f64,
    /// Resume playback once the new segment is ready
    pub resume: bool,
    /// Global time reported while the new segment loads
    pub stored_time: f64,
}

/// Session manager state
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerState {
    Idle,
    Loading {
        generation: u64,
        phase: LoadPhase,
        autoplay: bool,
    },
    Ready,
    Playing,
    Paused,
    TrackSwitching(TrackSwitch),
    Error(PlayerError),
}

/// A command that makes no sense in the current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCommand {
    pub command: &'static str,
    pub state: &'static str,
}

impl fmt::Display for RejectedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} while {}", self.command, self.state)
    }
}

impl PlayerState {
    pub fn name(&self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Loading { .. } => "loading",
            PlayerState::Ready => "ready",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::TrackSwitching(_) => "switching tracks",
            PlayerState::Error(_) => "in error",
        }
    }

    /// Media element has a settled source and reports meaningful positions
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PlayerState::Ready | PlayerState::Playing | PlayerState::Paused
        )
    }

    pub fn check_seek(&self) -> Result<(), RejectedCommand> {
        match self {
            PlayerState::Ready
            | PlayerState::Playing
            | PlayerState::Paused
            | PlayerState::TrackSwitching(_) => Ok(()),
            _ => Err(self.reject("seek")),
        }
    }

    pub fn check_play(&self) -> Result<(), RejectedCommand> {
        match self {
            PlayerState::Idle | PlayerState::Error(_) => Err(self.reject("play")),
            _ => Ok(()),
        }
    }

    pub fn check_pause(&self) -> Result<(), RejectedCommand> {
        match self {
            PlayerState::Idle | PlayerState::Error(_) => Err(self.reject("pause")),
            _ => Ok(()),
        }
    }

    fn reject(&self, command: &'static str) -> RejectedCommand {
        RejectedCommand {
            command,
            state: self.name(),
        }
    }
}
