//! Error kinds raised by game entry points.
//!
//! Illegal stone placement is deliberately absent: the engine ignores such
//! moves and hands back the unchanged game.

use thiserror::Error;

use crate::game::GameStatus;

/// What a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Game,
    Player,
}

/// Failures of the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum GameError {
    #[error("{0:?} not found: {1}")]
    NotFound(NotFoundKind, String),
    #[error("caller is not a player of this game")]
    Unauthorized,
    #[error("not your turn")]
    NotYourTurn,
    #[error("cannot {action} while game is {status}")]
    WrongPhase {
        status: GameStatus,
        action: &'static str,
    },
    #[error("no undo rights left")]
    NoUndoRights,
    #[error("no undo request to answer")]
    NoUndoRequest,
    #[error("illegal selection: {0}")]
    IllegalSelection(String),
    #[error("unsupported board size {0}")]
    InvalidBoardSize(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GameError {
    pub fn game_not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(NotFoundKind::Game, detail.into())
    }

    pub fn player_not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(NotFoundKind::Player, detail.into())
    }

    pub fn wrong_phase(status: GameStatus, action: &'static str) -> Self {
        Self::WrongPhase { status, action }
    }

    /// Message shown to the player whose action failed.
    pub fn user_message(&self) -> String {
        match self {
            GameError::NotFound(NotFoundKind::Game, _) => "That game does not exist.".into(),
            GameError::NotFound(NotFoundKind::Player, _) => "That player does not exist.".into(),
            GameError::Unauthorized => "You are not playing in this game.".into(),
            GameError::NotYourTurn => "It is not your turn.".into(),
            GameError::WrongPhase { action, .. } => format!("You cannot {action} right now."),
            GameError::NoUndoRights => "You have no undo requests left.".into(),
            GameError::NoUndoRequest => "There is no undo request to answer.".into(),
            GameError::IllegalSelection(_) => {
                "That area is not owned by either player and cannot be flipped.".into()
            }
            GameError::InvalidBoardSize(size) => {
                format!("Board size {size} is not supported; use 9, 13 or 19.")
            }
            GameError::Store(_) => "Something went wrong, please try again.".into(),
        }
    }
}
