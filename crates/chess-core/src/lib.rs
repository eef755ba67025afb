pub mod clock;
pub mod error;
pub mod game_data;
pub mod history;
pub mod pgn;
pub mod rules;

pub use clock::{Clock, Clocks, TimeControl, TimeForfeit};
pub use error::{ClockError, HistoryError, MoveError, PgnError};
pub use game_data::{round_of, Side, Tags, STANDARD_START_FEN};
pub use history::{Entry, History, LineId, Step};
pub use pgn::{parse_pgn, write_games, PgnGame};
pub use rules::{Applied, BoardMatrix, RulesOracle, ShakmatyOracle};
