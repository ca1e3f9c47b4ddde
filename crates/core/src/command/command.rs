use marquee_show::{BlendMode, ShowError};
use serde::Serialize;
use thiserror::Error;

/// When a stop request takes effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopWhen {
    Now,
    EndOfStep,
    EndOfLoop,
}

/// Every action the scheduler accepts, with typed parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    StopAll,
    /// Stop whatever is playing. Discards an immediate playlist and empties the queue.
    Stop,
    PlaySelected {
        looped: bool,
    },
    PlayPlaylist {
        playlist: String,
        looped: bool,
    },
    PlayPlaylistTimes {
        playlist: String,
        loops: u32,
    },
    PlayFromStep {
        playlist: String,
        step: String,
        looped: bool,
    },
    PlayStepOnce {
        playlist: String,
        step: String,
    },
    PlayStepTimes {
        playlist: String,
        step: String,
        loops: u32,
    },
    PlayStepLooped {
        playlist: String,
        step: String,
    },
    StopPlaylist {
        playlist: String,
        when: StopWhen,
    },
    StopCurrent(StopWhen),
    JumpToEndSteps,
    Pause,
    NextStep,
    PriorStep,
    RestartStep,
    JumpToStep {
        step: String,
        at_end_of_step: bool,
    },
    JumpToRandomStep {
        playlist: Option<String>,
    },
    ToggleStepLoop,
    ToggleRandom,
    ToggleLoop,
    EnqueueStep {
        playlist: String,
        step: String,
    },
    ClearQueue,
    AddMinutesToSchedule(i64),
    RestartSchedule {
        schedule: Option<String>,
    },
    SetVolume(i32),
    AdjustVolume(i32),
    ToggleMute,
    SetBrightness(i32),
    AdjustBrightness(i32),
    ToggleOutputToLights,
    /// The base64 payload travels separately as the action's data.
    SetPixels {
        start_channel: usize,
        blend: BlendMode,
    },
    RefreshCurrentPlaylist,
    SaveSchedule,
    RunCommandAtEndOfStep {
        command: String,
        parameters: String,
    },
    PressButton(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command.")]
    UnknownCommand(String),
    #[error("Unknown query.")]
    UnknownQuery(String),
    #[error("{command} expects {expected} parameter(s): {parameters}")]
    MissingParameters {
        command: String,
        expected: usize,
        parameters: String,
    },
    #[error("Incorrect parameters. {expected} expected: {parameters}")]
    IncorrectParameters {
        expected: &'static str,
        parameters: String,
    },
    #[error("'{0}' is not a number.")]
    InvalidNumber(String),
    #[error("Playlist '{0}' not found.")]
    UnknownPlaylist(String),
    #[error("Playlist '{playlist}' does not have a schedule '{schedule}'.")]
    UnknownSchedule { playlist: String, schedule: String },
    #[error("Unknown step.")]
    UnknownStep(String),
    #[error("Unknown button.")]
    UnknownButton(String),
    #[error("No playlist currently playing.")]
    NothingPlaying,
    #[error("No playlist selected.")]
    NothingSelected,
    #[error("step is already at the end of the list ... I wont add a duplicate.")]
    DuplicateQueuedStep,
    #[error("Unable to start playlist.")]
    UnableToStart(#[source] ShowError),
    #[error("Unable to loop the current step.")]
    CannotLoopStep,
    #[error("Only scheduled and immediately played playlists can be restarted.")]
    CannotRefresh,
    #[error("Unable to start output to lights.")]
    OutputUnavailable,
    #[error("Invalid pixel data: {0}")]
    InvalidOverlay(String),
    #[error("Unable to save schedule: {0}")]
    SaveFailed(String),
    #[error("Button '{0}' runs itself.")]
    ButtonLoop(String),
}

/// Successful result of a typed command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    /// New frame period the caller should tick at, when the command changed it.
    pub frame_ms: Option<u32>,
}

impl ActionOutcome {
    pub fn rate(frame_ms: u32) -> Self {
        Self {
            frame_ms: Some(frame_ms),
        }
    }
}

/// Result of the string-keyed action surface. Failures are reported, never raised.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    pub frame_ms: Option<u32>,
}

impl ActionResponse {
    pub fn from_result(result: Result<ActionOutcome, CommandError>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                message: String::new(),
                frame_ms: outcome.frame_ms,
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
                frame_ms: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages() {
        let response = ActionResponse::from_result(Err(CommandError::NothingPlaying));
        assert!(!response.success);
        assert_eq!(response.message, "No playlist currently playing.");

        let response = ActionResponse::from_result(Ok(ActionOutcome::rate(25)));
        assert!(response.success);
        assert_eq!(response.frame_ms, Some(25));
    }
}
