use thiserror::Error;

/// Errors raised while building or editing show data.
#[derive(Debug, Error, PartialEq)]
pub enum ShowError {
    #[error("schedule priority {0} is outside 0..=19")]
    InvalidPriority(u8),

    #[error("unknown blend mode '{0}'")]
    InvalidBlendMode(String),

    #[error("step '{0}' not found")]
    UnknownStep(String),

    #[error("playlist '{0}' has no steps")]
    EmptyPlaylist(String),
}
