//! Engine session error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to spawn engine \"{command}\": {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine command is empty")]
    EmptyCommand,

    #[error("Engine transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Engine closed its output")]
    Closed,
}
