//! Multi-game chess session: games, engines, clocks and the input loop that
//! ties them together.

pub mod config;
pub mod engine;
pub mod error;
pub mod files;
pub mod game;
pub mod input;
pub mod keys;
pub mod macros;
pub mod multiplexer;
pub mod prompt;
pub mod snapshot;
pub mod state;

pub use config::Config;
pub use engine::{EngineFactory, ProcessFactory};
pub use error::SessionError;
pub use game::{Game, Mode};
pub use keys::Key;
pub use multiplexer::run;
pub use snapshot::{Renderer, Snapshot, TextRenderer};
pub use state::SessionState;
