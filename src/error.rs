//! Error types for the assessment engine

use crate::types::GameId;
use thiserror::Error;

/// Errors raised by the persistence collaborator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {0} is already finalized")]
    AlreadyFinalized(String),

    #[error("Duplicate trial {trial_index} for game {game}")]
    DuplicateTrial { game: GameId, trial_index: u32 },

    #[error("Invalid finalize request: {0}")]
    InvalidFinalize(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur while running or scoring an assessment
#[derive(Debug, Error)]
pub enum AssessmentError {
    #[error("Invalid configuration for {game}: {reason}")]
    InvalidConfig { game: String, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Game completed out of order: expected {expected:?}, got {got}")]
    OutOfOrder {
        expected: Option<GameId>,
        got: GameId,
    },

    #[error("Game {0} has not reached DONE")]
    GameIncomplete(GameId),

    #[error("Game {0} stalled with no pending timers")]
    Stalled(GameId),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl AssessmentError {
    pub(crate) fn config(game: impl Into<String>, reason: impl Into<String>) -> Self {
        AssessmentError::InvalidConfig {
            game: game.into(),
            reason: reason.into(),
        }
    }
}
