//! Session state machine
//!
//! Acquisition, recording and pause are a single value, so recording
//! without acquisition or a pause without a recording cannot be expressed.

use serde::{Deserialize, Serialize};

/// Acquisition/recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// Not acquiring
    #[default]
    Idle,
    /// Acquiring and forwarding, not recording
    Acquiring,
    /// Acquiring and persisting every frame
    Recording,
    /// Recording session held: frames forwarded, not persisted
    RecordingPaused,
}

impl SessionState {
    /// Whether the acquirer may fetch frames
    pub fn is_acquiring(self) -> bool {
        !matches!(self, SessionState::Idle)
    }

    /// Whether a recording session exists, paused or not
    pub fn is_recording(self) -> bool {
        matches!(self, SessionState::Recording | SessionState::RecordingPaused)
    }

    /// Whether the recording is paused
    pub fn is_paused(self) -> bool {
        matches!(self, SessionState::RecordingPaused)
    }

    /// Whether acquired frames go into the arena
    pub fn is_persisting(self) -> bool {
        matches!(self, SessionState::Recording)
    }

    /// State after Start, if legal
    pub fn start(self) -> Option<Self> {
        match self {
            SessionState::Idle => Some(SessionState::Acquiring),
            _ => None,
        }
    }

    /// State after Stop, if legal
    pub fn stop(self) -> Option<Self> {
        match self {
            SessionState::Idle => None,
            _ => Some(SessionState::Idle),
        }
    }

    /// State after StartRecording, if legal (starts acquisition as needed)
    pub fn start_recording(self) -> Option<Self> {
        match self {
            SessionState::Idle | SessionState::Acquiring => Some(SessionState::Recording),
            _ => None,
        }
    }

    /// State after PauseRecording, if legal
    pub fn pause(self) -> Option<Self> {
        match self {
            SessionState::Recording => Some(SessionState::RecordingPaused),
            _ => None,
        }
    }

    /// State after ResumeRecording, if legal
    pub fn resume(self) -> Option<Self> {
        match self {
            SessionState::RecordingPaused => Some(SessionState::Recording),
            _ => None,
        }
    }

    /// State after StopRecording, if legal
    pub fn stop_recording(self) -> Option<Self> {
        match self {
            SessionState::Recording | SessionState::RecordingPaused => {
                Some(SessionState::Acquiring)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Acquiring => "acquiring",
            SessionState::Recording => "recording",
            SessionState::RecordingPaused => "recording (paused)",
        };
        f.write_str(name)
    }
}
