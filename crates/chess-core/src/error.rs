//! Error types shared by the clock, history and rules modules

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("Invalid clock specification: {0}")]
    InvalidSpec(String),

    #[error("Maximum number of time controls reached ({0})")]
    TooManyPhases(usize),
}

/// Rejections reported by the rules oracle. The offending text is kept so the
/// caller can show it with the round number.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    #[error("Ambiguous move \"{0}\"")]
    Ambiguous(String),

    #[error("Invalid move \"{0}\"")]
    Invalid(String),

    #[error("Invalid position: {0}")]
    Position(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("No entry at index {0}")]
    NoEntry(usize),

    #[error("Too many annotation glyphs (max {0})")]
    TooManyNags(usize),
}

#[derive(Error, Debug)]
pub enum PgnError {
    #[error("{move_text} in round #{round}: {source}")]
    Move {
        round: u32,
        move_text: String,
        #[source]
        source: MoveError,
    },

    #[error("Invalid starting position in game {game}: {source}")]
    Fen {
        game: usize,
        #[source]
        source: MoveError,
    },

    #[error("Unbalanced variation in game {0}")]
    Unbalanced(usize),

    #[error("No games found")]
    Empty,

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
