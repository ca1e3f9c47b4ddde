use serde::Serialize;
use serde_json::{json, Value};

use super::command::CommandError;

/// Read-only questions the scheduler answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Query {
    PlayLists,
    PlayListSteps { playlist: String },
    QueuedSteps,
    PlayingStatus,
    NextScheduledPlayList,
    PlayListSchedules { playlist: String },
    PlayListSchedule { playlist: String, schedule: String },
    Buttons,
}

impl Query {
    /// Match a query name case-insensitively and attach its parameters.
    pub fn parse(name: &str, parameters: &str) -> Result<Self, CommandError> {
        let query = match name.to_lowercase().as_str() {
            "getplaylists" => Query::PlayLists,
            "getplayliststeps" => Query::PlayListSteps {
                playlist: parameters.to_string(),
            },
            "getqueuedsteps" => Query::QueuedSteps,
            "getplayingstatus" => Query::PlayingStatus,
            "getnextscheduledplaylist" => Query::NextScheduledPlayList,
            "getplaylistschedules" => Query::PlayListSchedules {
                playlist: parameters.to_string(),
            },
            "getplaylistschedule" => {
                let mut parts = parameters.splitn(2, ',');
                match (parts.next(), parts.next()) {
                    (Some(playlist), Some(schedule)) if !playlist.is_empty() => {
                        Query::PlayListSchedule {
                            playlist: playlist.to_string(),
                            schedule: schedule.to_string(),
                        }
                    }
                    _ => {
                        return Err(CommandError::IncorrectParameters {
                            expected: "Playlist and schedule",
                            parameters: parameters.to_string(),
                        })
                    }
                }
            }
            "getbuttons" => Query::Buttons,
            _ => return Err(CommandError::UnknownQuery(name.to_string())),
        };
        Ok(query)
    }
}

/// JSON answer to a query. `data` always carries the caller's reference.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub message: String,
    pub data: Value,
}

impl QueryResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            message: String::new(),
            data,
        }
    }

    pub fn failed(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
        }
    }

    /// Failure with only the reference echoed back.
    pub fn error(error: &CommandError, reference: &str) -> Self {
        Self::failed(error.to_string(), json!({ "reference": reference }))
    }

    /// The reply body as a JSON string.
    pub fn to_json(&self) -> String {
        self.data.to_string()
    }
}
