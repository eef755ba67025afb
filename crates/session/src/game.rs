//! One loaded game and the operations behind the play, history and edit
//! modes.

use std::time::Duration;

use chess_core::rules::{coords_to_uci, is_promotion, matrix_to_fen};
use chess_core::{
    round_of, Applied, BoardMatrix, Clocks, History, PgnGame, RulesOracle, Side, Tags,
    TimeForfeit, STANDARD_START_FEN,
};
use engine_session::{EngineCommand, EngineEvent, EngineSession, EngineStatus};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::SessionError;

pub type Square = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Mode {
    Play,
    History,
    Edit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Pause {
    #[default]
    Running,
    Paused,
    /// Pause once the engine has answered.
    AfterEngine,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GameFlags {
    /// Human against human, no engine involved.
    pub human: bool,
    /// The engine plays both sides.
    pub engine_loop: bool,
    /// Nothing selected or played yet; clocks stay stopped.
    pub new: bool,
    pub modified: bool,
    /// Marked for deletion.
    pub delete: bool,
}

/// What a completed square selection turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    Move(String),
    /// The piece for a pawn reaching the last rank is still needed.
    Promotion { from: Square, to: Square },
}

/// Whether resuming play needs the future of the history discarded first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    Resumed,
    NeedsConfirm,
}

pub struct Game {
    pub tags: Tags,
    pub history: History,
    pub clocks: Clocks,
    pub engine: Option<EngineSession>,
    pub mode: Mode,
    pub board: BoardMatrix,
    /// Board cursor in matrix coordinates.
    pub cursor: Square,
    pub selected: Option<Square>,
    pub flags: GameFlags,
    pub pause: Pause,
    /// Side the human plays against the engine.
    pub side: Side,
    pub rotate: bool,
    go_moves: u32,
    edit_turn: Side,
}

impl Game {
    pub fn new(tags: Tags, history: History, oracle: &impl RulesOracle) -> Self {
        let side = Side::to_move(history.fen());
        let mut game = Self {
            tags,
            history,
            clocks: Clocks::default(),
            engine: None,
            mode: Mode::Play,
            board: [[None; 8]; 8],
            cursor: (6, 4),
            selected: None,
            flags: GameFlags {
                new: true,
                ..GameFlags::default()
            },
            pause: Pause::Running,
            side,
            rotate: false,
            go_moves: 0,
            edit_turn: side,
        };
        if !game.history.is_empty() || game.history.flags.game_over {
            game.mode = Mode::History;
        }
        game.refresh_board(oracle);
        game
    }

    /// A new game from the standard position with roster tags.
    pub fn fresh(oracle: &impl RulesOracle) -> Self {
        Self::new(Tags::roster(), History::new(STANDARD_START_FEN), oracle)
    }

    pub fn from_pgn(game: PgnGame, oracle: &impl RulesOracle) -> Self {
        Self::new(game.tags, game.history, oracle)
    }

    /// Copy of the tags and move tree. Engine and clocks start afresh.
    pub fn duplicate(&self, oracle: &impl RulesOracle) -> Self {
        let mut copy = Self::new(self.tags.clone(), self.history.clone(), oracle);
        copy.flags.human = self.flags.human;
        copy.mode = Mode::Play;
        copy.history.leave_all();
        copy.history.set_cursor(copy.history.len());
        copy.refresh_board(oracle);
        copy
    }

    pub fn turn(&self) -> Side {
        match self.mode {
            Mode::Edit => self.edit_turn,
            _ => Side::to_move(self.history.fen()),
        }
    }

    pub fn round(&self) -> u32 {
        round_of(self.history.fen())
    }

    pub fn is_game_over(&self) -> bool {
        self.history.flags.game_over
    }

    pub fn engine_status(&self) -> Option<EngineStatus> {
        self.engine.as_ref().map(EngineSession::status)
    }

    pub fn is_thinking(&self) -> bool {
        self.engine_status() == Some(EngineStatus::Thinking)
    }

    /// Whether a live engine is attached.
    pub fn has_engine(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| !e.is_offline())
    }

    /// Rebuild the board matrix from the fingerprint at the cursor.
    pub fn refresh_board(&mut self, oracle: &impl RulesOracle) {
        if self.mode == Mode::Edit {
            return;
        }
        match oracle.board(self.history.fen()) {
            Ok(board) => self.board = board,
            Err(e) => warn!(error = %e, "Unable to rebuild board"),
        }
    }

    pub fn move_cursor(&mut self, (rows, cols): (i32, i32), count: u32) {
        let count = count.max(1) as i32;
        let sign = if self.rotate { -1 } else { 1 };
        let row = self.cursor.0 as i32 + rows * count * sign;
        let col = self.cursor.1 as i32 + cols * count * sign;
        self.cursor = (row.rem_euclid(8) as usize, col.rem_euclid(8) as usize);
    }

    fn end_game(&mut self, result: &str) {
        info!(result, "Game over");
        self.tags.set("Result", result);
        self.history.flags.game_over = true;
        self.mode = Mode::History;
        self.selected = None;
        self.shutdown_engine();
    }

    pub fn shutdown_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown();
        }
    }

    /// Queue a position reset so the engine matches the history again.
    pub fn resync_engine(&mut self, config: &Config) {
        let line = config.setboard_command(self.history.fen());
        if let Some(engine) = self.engine.as_mut() {
            engine.enqueue(line, Some(EngineStatus::Ready));
        }
    }

    /// Forget moves not yet sent to the engine and reset its position once
    /// it is idle.
    fn rewind_engine(&mut self, config: &Config) {
        if let Some(engine) = self.engine.as_mut() {
            engine.discard_held();
        }
        self.resync_engine(config);
    }

    fn send_go(&mut self, config: &Config) {
        if let Some(engine) = self.engine.as_mut() {
            engine.enqueue_command(
                EngineCommand::new(config.engine_go.clone())
                    .requires(EngineStatus::Ready)
                    .enters(EngineStatus::Thinking),
            );
        }
    }

    /// Validate `text` against the position at the cursor and append it.
    fn play_move(&mut self, oracle: &impl RulesOracle, text: &str) -> Result<Applied, SessionError> {
        let round = self.round();
        let turn = self.turn();
        let applied = oracle
            .apply(self.history.fen(), text)
            .map_err(|source| SessionError::Move { round, source })?;

        self.clocks.advance_phase(turn);
        self.history.append(applied.san.clone(), applied.fen.clone());
        self.flags.modified = true;
        self.selected = None;
        self.refresh_board(oracle);

        if let Some(result) = applied.result {
            self.end_game(result);
        }
        Ok(applied)
    }

    /// A move entered by the user. Against an engine the move is forwarded
    /// and the engine starts thinking.
    pub fn human_move(
        &mut self,
        oracle: &impl RulesOracle,
        config: &Config,
        text: &str,
    ) -> Result<Applied, SessionError> {
        if self.mode != Mode::Play {
            return Err(SessionError::Rejected("Moves can only be entered in play mode"));
        }
        if self.is_game_over() {
            return Err(SessionError::Rejected("The game is over"));
        }
        if !self.flags.human && self.is_thinking() {
            return Err(SessionError::Rejected("The engine is thinking"));
        }

        let mover = self.turn();
        let applied = self.play_move(oracle, text)?;
        self.flags.new = false;
        self.pause = Pause::Running;
        self.go_moves = 0;

        if !self.flags.human && !self.is_game_over() {
            self.side = mover;
            let line = if config.engine_san {
                applied.san.clone()
            } else {
                applied.uci.clone()
            };
            if let Some(engine) = self.engine.as_mut() {
                engine.enqueue_command(
                    EngineCommand::new(line)
                        .requires(EngineStatus::Ready)
                        .enters(EngineStatus::Thinking),
                );
            }
        }
        Ok(applied)
    }

    fn engine_move(
        &mut self,
        oracle: &impl RulesOracle,
        config: &Config,
        text: &str,
    ) -> Result<Applied, SessionError> {
        if self.mode != Mode::Play || self.is_game_over() {
            return Err(SessionError::Rejected("Engine moved outside of play"));
        }

        let applied = self.play_move(oracle, text)?;
        if self.flags.engine_loop && !self.is_game_over() {
            self.send_go(config);
        }
        Ok(applied)
    }

    /// React to engine output. Returns a notification for the user, if any.
    pub fn on_engine_event(
        &mut self,
        oracle: &impl RulesOracle,
        config: &Config,
        event: EngineEvent,
    ) -> Option<String> {
        match event {
            EngineEvent::MoveMade(mv) => match self.engine_move(oracle, config, &mv) {
                Ok(applied) => {
                    debug!(san = %applied.san, "Engine moved");
                    None
                }
                Err(e) => {
                    warn!(error = %e, mv, "Engine move rejected");
                    Some(format!("Engine: {e}"))
                }
            },
            EngineEvent::Ready => None,
            EngineEvent::Error(line) => Some(line),
        }
    }

    /// The engine plays the side to move.
    pub fn go(&mut self, config: &Config) -> Result<(), SessionError> {
        if self.flags.human {
            return Err(SessionError::Rejected("No engine in human mode"));
        }
        if self.is_game_over() {
            return Err(SessionError::Rejected("The game is over"));
        }

        self.send_go(config);
        if self.side == self.turn() {
            self.side = self.side.opposite();
        }
        self.go_moves += 1;
        self.flags.new = false;
        Ok(())
    }

    /// Take back `count` rounds (one round when zero). After `go` the
    /// engine's reply is a single ply.
    pub fn undo(
        &mut self,
        oracle: &impl RulesOracle,
        config: &Config,
        count: u32,
    ) -> Result<(), SessionError> {
        if self.history.is_empty() {
            return Ok(());
        }
        if self.is_thinking() {
            return Err(SessionError::Rejected("The engine is thinking"));
        }

        let count = count.max(1) as usize;
        let plies = if self.go_moves > 0 { count * 2 - 1 } else { count * 2 };
        let was_over = self.is_game_over();

        self.history.set_cursor(self.history.len());
        if self.history.undo(plies) > 0 && was_over {
            self.tags.set("Result", "*");
        }
        self.refresh_board(oracle);
        self.rewind_engine(config);

        if self.go_moves > 0 {
            self.side = self.side.opposite();
            self.go_moves -= 1;
        }
        self.selected = None;
        self.flags.modified = true;
        Ok(())
    }

    pub fn toggle_pause(&mut self) {
        if !self.flags.human && self.turn() != self.side {
            self.pause = Pause::AfterEngine;
            return;
        }
        self.pause = match self.pause {
            Pause::Running => Pause::Paused,
            _ => Pause::Running,
        };
    }

    /// Switch between human/human and human/engine play. Returns whether an
    /// engine is now wanted for a game already under way.
    pub fn toggle_human(&mut self) -> bool {
        self.flags.human = !self.flags.human;
        self.flags.engine_loop = false;
        if let Some(engine) = self.engine.as_mut() {
            engine.set_status(EngineStatus::Ready);
        }
        !self.flags.human && !self.history.is_empty()
    }

    /// Let the engine play both sides, or stop it doing so.
    pub fn toggle_engine_loop(&mut self, config: &Config) -> bool {
        self.flags.engine_loop = !self.flags.engine_loop;
        self.flags.human = false;
        if self.flags.engine_loop {
            self.resync_engine(config);
            self.send_go(config);
            self.flags.new = false;
        }
        self.flags.engine_loop
    }

    /// Swap the side the human plays. Only possible before the first move.
    pub fn switch_sides(&mut self) -> Result<Option<&'static str>, SessionError> {
        if self.flags.human {
            return Ok(None);
        }
        if !self.history.is_empty() {
            return Err(SessionError::Rejected(
                "You may only switch sides at the start of the game",
            ));
        }

        self.side = self.side.opposite();
        self.rotate = !self.rotate;
        Ok((self.side != self.turn()).then_some("Press 'g' to start the game"))
    }

    /// Pick up the piece under the cursor for a move.
    pub fn select(&mut self) -> Result<(), SessionError> {
        if self.is_thinking() {
            return Err(SessionError::Rejected("The engine is thinking"));
        }

        self.selected = None;
        let (row, col) = self.cursor;
        let Some(piece) = self.board[row][col] else {
            return Ok(());
        };

        let owner = if piece.is_ascii_uppercase() {
            Side::White
        } else {
            Side::Black
        };
        if owner != self.turn() {
            return Err(SessionError::Rejected("It is not your turn to move"));
        }

        self.selected = Some(self.cursor);
        self.flags.new = false;
        Ok(())
    }

    /// Finish a selection at the cursor.
    pub fn commit(&mut self) -> Result<Option<Commit>, SessionError> {
        if !self.flags.human && self.is_thinking() {
            return Err(SessionError::Rejected("The engine is thinking"));
        }
        let Some(from) = self.selected.take() else {
            return Ok(None);
        };

        let to = self.cursor;
        if from == to {
            return Ok(None);
        }
        if is_promotion(&self.board, from, to) {
            return Ok(Some(Commit::Promotion { from, to }));
        }
        Ok(Some(Commit::Move(coords_to_uci(from, to, None))))
    }

    pub fn enter_history(&mut self, oracle: &impl RulesOracle) -> Result<(), SessionError> {
        if self.history.is_empty() {
            return Err(SessionError::Rejected("No moves to browse"));
        }
        if self.is_thinking() {
            return Err(SessionError::Rejected("The engine is thinking"));
        }

        self.mode = Mode::History;
        self.selected = None;
        self.history.set_cursor(self.history.len());
        self.refresh_board(oracle);
        Ok(())
    }

    /// Go back to play from history mode.
    pub fn resume(&mut self) -> Result<Resume, SessionError> {
        if !self.history.is_at_end() {
            return Ok(Resume::NeedsConfirm);
        }
        if self.is_game_over() {
            return Err(SessionError::Rejected("The game is over"));
        }
        self.mode = Mode::Play;
        Ok(Resume::Resumed)
    }

    /// Resume play from the cursor, dropping every later move.
    pub fn resume_here(&mut self, oracle: &impl RulesOracle, config: &Config) {
        self.history.truncate_future();
        if self.is_game_over() {
            self.history.flags.game_over = false;
            self.tags.set("Result", "*");
        }
        self.refresh_board(oracle);
        self.rewind_engine(config);
        self.mode = Mode::Play;
    }

    pub fn enter_edit(&mut self) -> Result<(), SessionError> {
        if !self.history.is_empty() {
            return Err(SessionError::Rejected(
                "The position can only be edited before the first move",
            ));
        }
        self.edit_turn = self.turn();
        self.mode = Mode::Edit;
        self.selected = None;
        Ok(())
    }

    pub fn edit_select(&mut self) {
        if self.selected.is_some() {
            return;
        }
        let (row, col) = self.cursor;
        if self.board[row][col].is_some() {
            self.selected = Some(self.cursor);
        }
    }

    pub fn edit_commit(&mut self) {
        let Some((from_row, from_col)) = self.selected.take() else {
            return;
        };
        let (row, col) = self.cursor;
        if (from_row, from_col) == (row, col) {
            return;
        }
        self.board[row][col] = self.board[from_row][from_col].take();
    }

    pub fn edit_delete(&mut self) {
        let (row, col) = self.selected.take().unwrap_or(self.cursor);
        self.board[row][col] = None;
    }

    pub fn edit_insert(&mut self, piece: char) -> Result<(), SessionError> {
        if !"PRNBQKprnbqk".contains(piece) {
            return Err(SessionError::Rejected("Not a piece letter"));
        }
        let (row, col) = self.cursor;
        self.board[row][col] = Some(piece);
        Ok(())
    }

    pub fn edit_switch_turn(&mut self) {
        self.edit_turn = self.edit_turn.opposite();
    }

    /// Make the edited board the starting position. An illegal setup keeps
    /// the game in edit mode.
    pub fn exit_edit(
        &mut self,
        oracle: &impl RulesOracle,
        config: &Config,
    ) -> Result<(), SessionError> {
        let fen = oracle
            .validate_fen(&matrix_to_fen(&self.board, self.edit_turn == Side::White))
            .map_err(SessionError::Position)?;

        self.tags.set("FEN", &fen);
        self.tags.set("SetUp", "1");
        self.history = History::new(&fen);
        self.mode = Mode::Play;
        self.selected = None;
        self.side = self.edit_turn;
        self.refresh_board(oracle);
        self.resync_engine(config);
        Ok(())
    }

    /// FEN of the edited board, for saving a game still in edit mode.
    pub fn edit_fen(&self) -> String {
        matrix_to_fen(&self.board, self.edit_turn == Side::White)
    }

    /// Charge elapsed time to the side on move.
    pub fn tick(&mut self, delta: Duration) -> Option<TimeForfeit> {
        if self.mode != Mode::Play || self.flags.new || self.is_game_over() {
            return None;
        }

        match self.pause {
            Pause::Paused => return None,
            Pause::AfterEngine if self.side == self.turn() => {
                self.pause = Pause::Paused;
                return None;
            }
            _ => {}
        }

        let forfeit = self.clocks.tick(self.turn(), delta)?;
        self.end_game(forfeit.result());
        Some(forfeit)
    }
}
