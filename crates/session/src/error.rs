//! Session error types

use chess_core::{ClockError, HistoryError, MoveError, PgnError};
use engine_session::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error("{source} (round #{round})")]
    Move {
        round: u32,
        #[source]
        source: MoveError,
    },

    #[error(transparent)]
    Position(MoveError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Pgn(#[from] PgnError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid expression: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid macro definition: {0}")]
    Macro(String),

    /// The command is not possible in the current state.
    #[error("{0}")]
    Rejected(&'static str),
}
