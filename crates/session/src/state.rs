//! Session state and key dispatch.
//!
//! Keys are resolved in this order: an open text request, a pending prompt,
//! escape, repeat-count digits, board cursor arrows, global commands and
//! finally the current game's mode table.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chess_core::rules::coords_to_uci;
use chess_core::{parse_pgn, ShakmatyOracle, Side, Step, STANDARD_START_FEN};
use engine_session::EngineSession;
use regex::{Regex, RegexBuilder};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::EngineFactory;
use crate::error::SessionError;
use crate::files::{render_games, resolve_save_path, signal_save_path, write_pgn, WriteMode};
use crate::game::{Commit, Game, Mode, Resume};
use crate::input::{parse_annotation, parse_intent, Intent};
use crate::keys::{
    edit_command, global_command, history_command, parse_keys, play_command, EditCommand,
    GlobalCommand, HistoryCommand, Key, PlayCommand,
};
use crate::macros::MacroPlayer;
use crate::prompt::{Prompt, SaveRange, TextRequest};
use crate::snapshot::{HistoryRow, Snapshot};

const MAX_REPEAT: u32 = 9999;

pub struct SessionState {
    pub config: Config,
    pub games: Vec<Game>,
    pub current: usize,
    pub repeat: u32,
    pub quit: bool,
    pub notify: Option<String>,
    pub prompt: Option<Prompt>,
    /// Open text request and the text typed into it so far.
    pub request: Option<(TextRequest, String)>,
    pub movestep: Step,
    pub show_engine: bool,
    pub loadfile: Option<PathBuf>,
    move_exp: Option<Regex>,
    game_exp: Option<String>,
    macros: MacroPlayer,
    pending: VecDeque<Key>,
    oracle: ShakmatyOracle,
    engines: Box<dyn EngineFactory>,
    engine_notify: Arc<Notify>,
}

impl SessionState {
    /// One fresh game. Fails only on bad macro definitions.
    pub fn new(config: Config, engines: Box<dyn EngineFactory>) -> Result<Self, SessionError> {
        let macros = MacroPlayer::parse(&config.macros)?;
        let oracle = ShakmatyOracle;
        Ok(Self {
            games: vec![Game::fresh(&oracle)],
            config,
            current: 0,
            repeat: 0,
            quit: false,
            notify: None,
            prompt: None,
            request: None,
            movestep: Step::default(),
            show_engine: false,
            loadfile: None,
            move_exp: None,
            game_exp: None,
            macros,
            pending: VecDeque::new(),
            oracle,
            engines,
            engine_notify: Arc::new(Notify::new()),
        })
    }

    /// Poked by engine transports when output arrives.
    pub fn engine_notify(&self) -> Arc<Notify> {
        self.engine_notify.clone()
    }

    pub fn game(&self) -> &Game {
        &self.games[self.current]
    }

    pub fn game_mut(&mut self) -> &mut Game {
        &mut self.games[self.current]
    }

    fn set_notify(&mut self, text: impl Into<String>) {
        self.notify = Some(text.into());
    }

    fn report(&mut self, result: Result<(), SessionError>) {
        if let Err(e) = result {
            debug!(error = %e, "Command rejected");
            self.set_notify(e.to_string());
        }
    }

    fn take_repeat(&mut self) -> u32 {
        std::mem::take(&mut self.repeat)
    }

    /// Mode used for macro matching; `None` while a prompt or text request
    /// is open.
    fn matching_mode(&self) -> Option<Mode> {
        if self.prompt.is_some() || self.request.is_some() {
            None
        } else {
            Some(self.game().mode)
        }
    }

    // Input

    /// One line from the input source.
    pub fn handle_line(&mut self, line: &str) {
        if let Some((request, typed)) = self.request.take() {
            let text = if line.is_empty() { typed.as_str() } else { line };
            self.answer_request(request, text);
            return;
        }
        if let Some(command) = line.strip_prefix(':') {
            let result = parse_intent(command).map(|intent| self.handle_intent(intent));
            self.report(result);
            return;
        }
        if line.is_empty() {
            self.pending.push_back(Key::Enter);
            return;
        }
        match parse_keys(line) {
            Ok(keys) => self.pending.extend(keys),
            Err(e) => self.set_notify(e.to_string()),
        }
    }

    pub fn handle_intent(&mut self, intent: Intent) {
        let result = match intent {
            Intent::Key(key) => {
                self.pending.push_back(key);
                Ok(())
            }
            Intent::Move(text) => self.enter_move(&text),
            Intent::ClockSpec(text) => {
                let idx = self.current;
                self.games[idx].clocks.set_spec(&text).map_err(SessionError::from)
            }
            Intent::EngineCommand(text) => self.engine_command(&text),
            Intent::Annotate(text) => self.annotate(&text),
            Intent::FindMove(expr) => Regex::new(&expr)
                .map_err(SessionError::from)
                .and_then(|re| {
                    self.move_exp = Some(re);
                    self.find_move(true, 1)
                }),
            Intent::FindGame(expr) => {
                self.game_exp = Some(expr);
                self.find_game(true, 1)
            }
            Intent::JumpMove(n) => self.jump_move(n),
            Intent::JumpGame(n) => self.jump_game(n),
            Intent::Load(path) => self.load_file(&path),
            Intent::Save { path, all } => {
                let range = if all { SaveRange::All } else { SaveRange::Current };
                self.request_save(&path, range)
            }
            Intent::Resize => Ok(()),
        };
        self.report(result);
    }

    fn answer_request(&mut self, request: TextRequest, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let number = || {
            text.parse::<usize>()
                .map_err(|_| SessionError::Rejected("Expected a number"))
        };

        let result = match request {
            TextRequest::MoveText => self.enter_move(text),
            TextRequest::ClockSpec => {
                self.handle_intent(Intent::ClockSpec(text.to_string()));
                Ok(())
            }
            TextRequest::EngineCommand => self.engine_command(text),
            TextRequest::Annotate => self.annotate(text),
            TextRequest::FindMove => {
                self.handle_intent(Intent::FindMove(text.to_string()));
                Ok(())
            }
            TextRequest::FindGame => {
                self.game_exp = Some(text.to_string());
                self.find_game(true, 1)
            }
            TextRequest::JumpMove => number().and_then(|n| self.jump_move(n)),
            TextRequest::JumpGame => number().and_then(|n| self.jump_game(n)),
            TextRequest::Load => self.load_file(Path::new(text)),
            TextRequest::Save(range) => self.request_save(text, range),
        };
        self.report(result);
    }

    /// Next key to dispatch: the running macro first, then queued input.
    pub fn next_key(&mut self) -> Option<Key> {
        let mode = self.matching_mode();
        if let Some(key) = self.macros.next_key(mode) {
            return Some(key);
        }
        let key = self.pending.pop_front()?;
        Some(self.macros.feed(key, mode))
    }

    pub fn dispatch_key(&mut self, key: Key) {
        if let Some((request, mut text)) = self.request.take() {
            match key {
                Key::Enter => self.answer_request(request, &text),
                Key::Escape => {
                    self.macros.reset();
                    self.game_mut().selected = None;
                }
                Key::Backspace => {
                    text.pop();
                    self.request = Some((request, text));
                }
                Key::Char(c) => {
                    text.push(c);
                    self.request = Some((request, text));
                }
                _ => self.request = Some((request, text)),
            }
            return;
        }

        if let Some(prompt) = self.prompt.take() {
            self.answer_prompt(prompt, key);
            return;
        }

        if key == Key::Escape {
            self.macros.reset();
            self.repeat = 0;
            self.notify = None;
            self.game_mut().selected = None;
            return;
        }

        if let Some(d) = key.digit() {
            self.repeat = (self.repeat * 10 + d).min(MAX_REPEAT);
            self.set_notify(format!("Repeat {}", self.repeat));
            return;
        }

        let mode = self.game().mode;
        if mode != Mode::History {
            if let Some(delta) = key.arrow() {
                let count = self.take_repeat();
                self.game_mut().move_cursor(delta, count);
                return;
            }
        }

        if self.repeat == 0 {
            self.notify = None;
        }

        let result = if let Some(cmd) = global_command(key) {
            self.global(cmd)
        } else {
            match mode {
                Mode::Play => play_command(key).map(|cmd| self.play(cmd)),
                Mode::History => history_command(key).map(|cmd| self.history(cmd)),
                Mode::Edit => edit_command(key).map(|cmd| self.edit(cmd)),
            }
            .unwrap_or_else(|| {
                debug!(?key, "Unbound key");
                Ok(())
            })
        };
        self.report(result);

        if !self.macros.is_active() {
            self.repeat = 0;
        }
    }

    fn answer_prompt(&mut self, prompt: Prompt, key: Key) {
        let answer = match key {
            Key::Char(c) => Some(c),
            _ => None,
        };
        let lower = answer.map(|c| c.to_ascii_lowercase());

        let result = match (prompt, lower) {
            (Prompt::Quit, Some('y')) => {
                self.quit = true;
                Ok(())
            }
            (Prompt::NewAll, Some('y')) => {
                self.new_all();
                Ok(())
            }
            (Prompt::Delete { marked }, Some('y')) => {
                self.delete_games(marked);
                Ok(())
            }
            (Prompt::SaveWhich, Some('c')) => {
                self.open_request(TextRequest::Save(SaveRange::Current));
                Ok(())
            }
            (Prompt::SaveWhich, Some('a')) => {
                self.open_request(TextRequest::Save(SaveRange::All));
                Ok(())
            }
            (Prompt::SaveWhich, _) => Err(SessionError::Rejected("Save game aborted.")),
            (Prompt::Overwrite { path, range }, Some('a')) => {
                self.save(&path, range, WriteMode::Append)
            }
            (Prompt::Overwrite { path, range }, Some('o')) => {
                self.save(&path, range, WriteMode::Overwrite)
            }
            (Prompt::Resume, Some('r')) => {
                let idx = self.current;
                self.games[idx].resume_here(&self.oracle, &self.config);
                Ok(())
            }
            (Prompt::Promotion { from, to }, Some(piece)) if "qrbn".contains(piece) => {
                self.enter_move(&coords_to_uci(from, to, Some(piece)))
            }
            (Prompt::InsertPiece, _) => match answer {
                Some(piece) => self.game_mut().edit_insert(piece),
                None => Ok(()),
            },
            _ => Ok(()),
        };
        self.report(result);
    }

    fn open_request(&mut self, request: TextRequest) {
        self.request = Some((request, String::new()));
    }

    // Engines

    /// Make sure game `idx` has a live engine. A failed spawn is reported and
    /// switches the game to human play.
    fn ensure_engine(&mut self, idx: usize) -> bool {
        let game = &mut self.games[idx];
        if game.has_engine() {
            return true;
        }

        match self.engines.spawn(self.engine_notify.clone()) {
            Ok(transport) => {
                let mut engine = EngineSession::new(transport, self.config.engine_quit.clone());
                for line in &self.config.engine_init {
                    engine.enqueue(line.clone(), None);
                }
                game.engine = Some(engine);
                if !game.history.is_empty() || game.history.base_fen() != STANDARD_START_FEN {
                    game.resync_engine(&self.config);
                }
                info!(game = idx + 1, "Engine started");
                true
            }
            Err(e) => {
                warn!(error = %e, "Engine unavailable");
                game.engine = None;
                game.flags.human = true;
                game.flags.engine_loop = false;
                self.notify = Some(e.to_string());
                false
            }
        }
    }

    /// Read engine output and write queued commands for every game.
    pub fn service_engines(&mut self) {
        for idx in 0..self.games.len() {
            let game = &mut self.games[idx];
            let Some(engine) = game.engine.as_mut() else {
                continue;
            };

            let events = match engine.poll_readable() {
                Ok(events) => events,
                Err(e) => {
                    self.lose_engine(idx, e.to_string());
                    continue;
                }
            };
            for event in events {
                if let Some(note) = game.on_engine_event(&self.oracle, &self.config, event) {
                    self.notify = Some(note);
                }
            }

            let drained = match game.engine.as_mut() {
                Some(engine) => engine.drain_writable(),
                None => Ok(0),
            };
            if let Err(e) = drained {
                self.lose_engine(idx, e.to_string());
            }
        }
    }

    /// The engine of game `idx` went away; the game continues human/human.
    fn lose_engine(&mut self, idx: usize, reason: String) {
        warn!(game = idx + 1, error = %reason, "Engine lost");
        let game = &mut self.games[idx];
        game.engine = None;
        game.flags.human = true;
        game.flags.engine_loop = false;
        self.notify = Some(format!("Game {}: {reason}", idx + 1));
    }

    fn engine_command(&mut self, text: &str) -> Result<(), SessionError> {
        let idx = self.current;
        if !self.ensure_engine(idx) {
            return Ok(());
        }
        if let Some(engine) = self.games[idx].engine.as_mut() {
            engine.enqueue(text, None);
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        for game in &mut self.games {
            game.shutdown_engine();
        }
    }

    // Clock

    /// Charge elapsed time to every game in play.
    pub fn tick(&mut self, delta: Duration) {
        for (idx, game) in self.games.iter_mut().enumerate() {
            if let Some(forfeit) = game.tick(delta) {
                let who = match forfeit.loser {
                    Side::White => "White",
                    Side::Black => "Black",
                };
                info!(game = idx + 1, loser = who, "Time forfeit");
                self.notify = Some(format!("{who} forfeits on time ({})", forfeit.result()));
            }
        }
    }

    // Global commands

    fn global(&mut self, cmd: GlobalCommand) -> Result<(), SessionError> {
        match cmd {
            GlobalCommand::NextGame => {
                let count = self.take_repeat();
                self.next_prev_game(true, count);
            }
            GlobalCommand::PrevGame => {
                let count = self.take_repeat();
                self.next_prev_game(false, count);
            }
            GlobalCommand::NewGame => {
                self.games.push(Game::fresh(&self.oracle));
                self.current = self.games.len() - 1;
            }
            GlobalCommand::NewAll => self.prompt = Some(Prompt::NewAll),
            GlobalCommand::CopyGame => {
                let copy = self.game().duplicate(&self.oracle);
                self.games.push(copy);
                self.current = self.games.len() - 1;
            }
            GlobalCommand::DeleteGame => return self.request_delete(),
            GlobalCommand::ToggleDelete => {
                let count = self.take_repeat();
                return self.toggle_delete(count);
            }
            GlobalCommand::FindGame => {
                if self.games.len() > 1 {
                    self.open_request(TextRequest::FindGame);
                }
            }
            GlobalCommand::FindGameNext | GlobalCommand::FindGamePrev => {
                if self.games.len() < 2 {
                    return Ok(());
                }
                if self.game_exp.is_none() {
                    self.open_request(TextRequest::FindGame);
                    return Ok(());
                }
                let count = self.take_repeat().max(1) as usize;
                return self.find_game(cmd == GlobalCommand::FindGameNext, count);
            }
            GlobalCommand::JumpGame => {
                if self.games.len() < 2 {
                    return Ok(());
                }
                match self.take_repeat() {
                    0 => self.open_request(TextRequest::JumpGame),
                    n => return self.jump_game(n as usize),
                }
            }
            GlobalCommand::LoadFile => self.open_request(TextRequest::Load),
            GlobalCommand::SaveGame => {
                if self.games.len() > 1 {
                    self.prompt = Some(Prompt::SaveWhich);
                } else {
                    self.open_request(TextRequest::Save(SaveRange::Current));
                }
            }
            GlobalCommand::Quit => {
                if self.config.exit_prompt {
                    self.prompt = Some(Prompt::Quit);
                } else {
                    self.quit = true;
                }
            }
            GlobalCommand::EngineWindow => self.show_engine = !self.show_engine,
            GlobalCommand::Redraw => {}
        }
        Ok(())
    }

    /// Step through games. A single step wraps around, a counted one stops at
    /// the first or last game.
    fn next_prev_game(&mut self, forward: bool, count: u32) {
        let total = self.games.len();
        if total < 2 {
            return;
        }
        let count = count.max(1) as usize;
        let wrap = count == 1;

        self.current = if forward {
            match self.current + count {
                n if n < total => n,
                _ if wrap => 0,
                _ => total - 1,
            }
        } else {
            match self.current.checked_sub(count) {
                Some(n) => n,
                None if wrap => total - 1,
                None => 0,
            }
        };
        self.refresh_current();
    }

    fn refresh_current(&mut self) {
        let idx = self.current;
        self.games[idx].refresh_board(&self.oracle);
    }

    fn new_all(&mut self) {
        self.shutdown();
        self.games = vec![Game::fresh(&self.oracle)];
        self.current = 0;
        self.loadfile = None;
    }

    fn marked(&self) -> usize {
        self.games.iter().filter(|g| g.flags.delete).count()
    }

    fn request_delete(&mut self) -> Result<(), SessionError> {
        if self.games.len() < 2 {
            return Err(SessionError::Rejected("Cannot delete last game."));
        }
        let marked = self.marked();
        if marked == self.games.len() {
            return Err(SessionError::Rejected("Cannot delete last game."));
        }

        if self.config.delete_prompt {
            self.prompt = Some(Prompt::Delete { marked: marked > 0 });
        } else {
            self.delete_games(marked > 0);
        }
        Ok(())
    }

    /// Delete the marked games, or the current one when none are marked.
    fn delete_games(&mut self, marked: bool) {
        let which = self.current;
        let before = self.games.len();
        let mut kept = Vec::with_capacity(self.games.len());
        for (idx, mut game) in std::mem::take(&mut self.games).into_iter().enumerate() {
            if game.flags.delete || (!marked && idx == which) {
                game.shutdown_engine();
            } else {
                kept.push(game);
            }
        }
        info!(deleted = before - kept.len(), "Games deleted");
        self.games = kept;

        let total = self.games.len();
        self.current = if marked || which + 1 >= total {
            total - 1
        } else {
            which
        };
        self.refresh_current();
    }

    /// Toggle the delete mark of `count` games starting at the current one.
    /// Marking every game is refused.
    fn toggle_delete(&mut self, count: u32) -> Result<(), SessionError> {
        let total = self.games.len();
        if total < 2 {
            return Ok(());
        }

        let end = (self.current + count.max(1) as usize).min(total);
        for idx in self.current..end {
            let flag = &mut self.games[idx].flags.delete;
            *flag = !*flag;
            if self.marked() == total {
                self.games[idx].flags.delete = false;
                self.current = idx;
                return Err(SessionError::Rejected("Cannot delete last game."));
            }
        }
        self.current = end - 1;
        Ok(())
    }

    fn find_game(&mut self, forward: bool, count: usize) -> Result<(), SessionError> {
        let Some(expr) = self.game_exp.clone() else {
            return Ok(());
        };
        let (name, value) = match expr.split_once(':') {
            Some((name, value)) => (
                Some(RegexBuilder::new(name.trim()).case_insensitive(true).build()?),
                value.trim_start(),
            ),
            None => (None, expr.as_str()),
        };
        let value = Regex::new(value)?;

        let total = self.games.len();
        let mut found = 0;
        for step in 1..total {
            let idx = if forward {
                (self.current + step) % total
            } else {
                (self.current + total - step) % total
            };
            let matches = self.games[idx].tags.iter().any(|(n, v)| {
                name.as_ref().map_or(true, |re| re.is_match(n)) && value.is_match(v)
            });
            if matches {
                found += 1;
                if found == count {
                    self.current = idx;
                    self.refresh_current();
                    return Ok(());
                }
            }
        }
        Err(SessionError::Rejected("No matches found."))
    }

    fn jump_game(&mut self, n: usize) -> Result<(), SessionError> {
        if n == 0 || n > self.games.len() {
            return Err(SessionError::Rejected("Out of range."));
        }
        self.current = n - 1;
        self.refresh_current();
        Ok(())
    }

    // Play mode

    fn play(&mut self, cmd: PlayCommand) -> Result<(), SessionError> {
        let idx = self.current;
        match cmd {
            PlayCommand::Select => {
                if !self.games[idx].flags.human {
                    self.ensure_engine(idx);
                }
                self.games[idx].select()?;
            }
            PlayCommand::Commit => match self.games[idx].commit()? {
                Some(Commit::Move(text)) => return self.enter_move(&text),
                Some(Commit::Promotion { from, to }) => {
                    self.prompt = Some(Prompt::Promotion { from, to })
                }
                None => {}
            },
            PlayCommand::MoveText => self.open_request(TextRequest::MoveText),
            PlayCommand::Undo => {
                let count = self.take_repeat();
                self.games[idx].undo(&self.oracle, &self.config, count)?;
            }
            PlayCommand::Pause => self.games[idx].toggle_pause(),
            PlayCommand::Go => {
                if !self.games[idx].flags.human && !self.ensure_engine(idx) {
                    return Ok(());
                }
                self.games[idx].go(&self.config)?;
            }
            PlayCommand::ToggleHuman => {
                if self.games[idx].toggle_human() && self.ensure_engine(idx) {
                    self.games[idx].resync_engine(&self.config);
                }
            }
            PlayCommand::EngineLoop => {
                if !self.games[idx].flags.engine_loop && !self.ensure_engine(idx) {
                    return Ok(());
                }
                self.games[idx].toggle_engine_loop(&self.config);
            }
            PlayCommand::EngineCommand => {
                if self.ensure_engine(idx) {
                    self.open_request(TextRequest::EngineCommand);
                }
            }
            PlayCommand::SetClock => self.open_request(TextRequest::ClockSpec),
            PlayCommand::SwitchSides => {
                if let Some(note) = self.games[idx].switch_sides()? {
                    self.set_notify(note);
                }
            }
            PlayCommand::HistoryMode => self.games[idx].enter_history(&self.oracle)?,
            PlayCommand::EditMode => self.games[idx].enter_edit()?,
        }
        Ok(())
    }

    /// Play a move typed or selected by the user in the current game.
    fn enter_move(&mut self, text: &str) -> Result<(), SessionError> {
        let idx = self.current;
        if self.games[idx].mode != Mode::Play {
            return Err(SessionError::Rejected("Moves can only be entered in play mode"));
        }
        if !self.games[idx].flags.human {
            self.ensure_engine(idx);
        }
        self.games[idx].human_move(&self.oracle, &self.config, text)?;
        Ok(())
    }

    // History mode

    fn in_history(&self) -> Result<usize, SessionError> {
        if self.game().mode != Mode::History {
            return Err(SessionError::Rejected("Only available in history mode"));
        }
        Ok(self.current)
    }

    fn history(&mut self, cmd: HistoryCommand) -> Result<(), SessionError> {
        let idx = self.current;
        let step = self.movestep;
        let jump = self.config.jump_count as i64;

        match cmd {
            HistoryCommand::Next | HistoryCommand::Prev => {
                let count = self.take_repeat().max(1) as i64;
                let delta = if cmd == HistoryCommand::Next { count } else { -count };
                self.games[idx].history.navigate(delta, step);
            }
            HistoryCommand::JumpNext | HistoryCommand::JumpPrev => {
                let count = self.take_repeat().max(1) as i64 * jump;
                let delta = if cmd == HistoryCommand::JumpNext { count } else { -count };
                self.games[idx].history.navigate(delta, step);
            }
            HistoryCommand::ToggleStep => self.movestep = self.movestep.toggled(),
            HistoryCommand::EnterVariation => {
                if !self.games[idx].history.enter_variation() {
                    return Err(SessionError::Rejected("No variation at this move"));
                }
            }
            HistoryCommand::LeaveVariation => {
                self.games[idx].history.leave_variation();
            }
            HistoryCommand::Annotate => {
                if self.games[idx].history.cursor() == 0 {
                    return Err(SessionError::Rejected("No move to annotate"));
                }
                self.open_request(TextRequest::Annotate);
            }
            HistoryCommand::FindMove => {
                if self.games[idx].history.len() >= 2 {
                    self.open_request(TextRequest::FindMove);
                }
            }
            HistoryCommand::FindNext | HistoryCommand::FindPrev => {
                if self.games[idx].history.len() < 2 {
                    return Ok(());
                }
                if self.move_exp.is_none() {
                    self.open_request(TextRequest::FindMove);
                    return Ok(());
                }
                let count = self.take_repeat().max(1) as usize;
                return self.find_move(cmd == HistoryCommand::FindNext, count);
            }
            HistoryCommand::JumpMove => {
                if self.games[idx].history.len() < 2 {
                    return Ok(());
                }
                match self.take_repeat() {
                    0 => self.open_request(TextRequest::JumpMove),
                    n => return self.jump_move(n as usize),
                }
            }
            HistoryCommand::Resume => {
                if self.games[idx].resume()? == Resume::NeedsConfirm {
                    self.prompt = Some(Prompt::Resume);
                }
            }
            HistoryCommand::Rotate => {
                let game = &mut self.games[idx];
                game.rotate = !game.rotate;
            }
        }

        self.refresh_current();
        Ok(())
    }

    fn annotate(&mut self, text: &str) -> Result<(), SessionError> {
        let idx = self.in_history()?;
        let (comment, nags) = parse_annotation(text)?;
        let game = &mut self.games[idx];
        let entry = game
            .history
            .cursor()
            .checked_sub(1)
            .ok_or(SessionError::Rejected("No move to annotate"))?;
        game.history.annotate(entry, comment, &nags)?;
        game.flags.modified = true;
        Ok(())
    }

    fn find_move(&mut self, forward: bool, count: usize) -> Result<(), SessionError> {
        let idx = self.in_history()?;
        let Some(re) = self.move_exp.as_ref() else {
            return Ok(());
        };
        let game = &mut self.games[idx];
        let cursor = game
            .history
            .find_move(re, forward, count)
            .ok_or(SessionError::Rejected("No matches found."))?;
        game.history.set_cursor(cursor);
        game.refresh_board(&self.oracle);
        Ok(())
    }

    fn jump_move(&mut self, n: usize) -> Result<(), SessionError> {
        let idx = self.in_history()?;
        if !self.games[idx].history.jump_to_move(n) {
            return Err(SessionError::Rejected("Out of range."));
        }
        self.refresh_current();
        Ok(())
    }

    // Edit mode

    fn edit(&mut self, cmd: EditCommand) -> Result<(), SessionError> {
        let idx = self.current;
        let game = &mut self.games[idx];
        match cmd {
            EditCommand::Select => game.edit_select(),
            EditCommand::Commit => game.edit_commit(),
            EditCommand::Delete => game.edit_delete(),
            EditCommand::Insert => self.prompt = Some(Prompt::InsertPiece),
            EditCommand::SwitchTurn => game.edit_switch_turn(),
            EditCommand::Exit => game.exit_edit(&self.oracle, &self.config)?,
        }
        Ok(())
    }

    // Files

    /// Replace every game with the games in `path`. Nothing changes when the
    /// file can't be read or parsed.
    pub fn load_file(&mut self, path: &Path) -> Result<(), SessionError> {
        let text = std::fs::read_to_string(path)?;
        let parsed = parse_pgn(&text, &self.oracle)?;

        self.shutdown();
        self.games = parsed
            .into_iter()
            .map(|game| Game::from_pgn(game, &self.oracle))
            .collect();
        self.current = self.games.len() - 1;
        self.loadfile = Some(path.to_path_buf());
        info!(path = %path.display(), games = self.games.len(), "Loaded games");
        Ok(())
    }

    fn request_save(&mut self, name: &str, range: SaveRange) -> Result<(), SessionError> {
        let path = resolve_save_path(&self.config, name)?;
        if path.exists() {
            self.prompt = Some(Prompt::Overwrite { path, range });
            return Ok(());
        }
        self.save(&path, range, WriteMode::Append)
    }

    fn save(&mut self, path: &Path, range: SaveRange, mode: WriteMode) -> Result<(), SessionError> {
        let indexes = match range {
            SaveRange::Current => self.current..self.current + 1,
            SaveRange::All => 0..self.games.len(),
        };
        let text = render_games(&self.games[indexes.clone()]);

        if let Err(e) = write_pgn(path, &text, mode) {
            warn!(path = %path.display(), error = %e, "Save failed");
            self.set_notify("Save game failed.");
            return Err(e.into());
        }

        for game in &mut self.games[indexes] {
            game.flags.modified = false;
        }
        if range == SaveRange::All {
            self.loadfile = Some(path.to_path_buf());
        }
        info!(path = %path.display(), "Games saved");
        self.set_notify("Game saved.");
        Ok(())
    }

    /// Best-effort save of every game after a termination signal, then quit.
    pub fn signal_save(&mut self, signal: &str) {
        let now = chrono::Utc::now().timestamp();
        let path = signal_save_path(&self.config, signal, now);

        let result = std::fs::create_dir_all(self.config.save_root())
            .and_then(|_| write_pgn(&path, &render_games(&self.games), WriteMode::Overwrite));
        match result {
            Ok(()) => info!(path = %path.display(), "Saved games on signal"),
            Err(e) => warn!(path = %path.display(), error = %e, "Signal save failed"),
        }
        self.quit = true;
    }

    /// Number of games with unsaved changes.
    pub fn modified(&self) -> usize {
        self.games.iter().filter(|g| g.flags.modified).count()
    }

    // Snapshot

    pub fn snapshot(&self) -> Snapshot {
        let game = self.game();
        let history = &game.history;
        let base = history
            .line_base_fen(history.active())
            .unwrap_or(STANDARD_START_FEN);
        let clock = |side| {
            let clock = game.clocks.get(side);
            format!("{}{}", clock.display(), clock.status())
        };

        Snapshot {
            game: self.current + 1,
            total: self.games.len(),
            mode: game.mode,
            board: game.board,
            rotate: game.rotate,
            cursor: game.cursor,
            selected: game.selected,
            turn: game.turn(),
            side: game.side,
            first_round: chess_core::round_of(base),
            first_turn: Side::to_move(base),
            history: history
                .entries()
                .iter()
                .map(|e| HistoryRow {
                    move_text: e.move_text.clone(),
                    comment: e.comment.clone(),
                    nags: e.nags.clone(),
                    has_variation: e.variation.is_some(),
                })
                .collect(),
            history_cursor: history.cursor(),
            variation_depth: history.depth(),
            movestep: self.movestep,
            white_clock: clock(Side::White),
            black_clock: clock(Side::Black),
            engine: game.engine_status(),
            engine_log: match (&game.engine, self.show_engine) {
                (Some(engine), true) => engine.log().map(String::from).collect(),
                _ => Vec::new(),
            },
            tags: game
                .tags
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            flags: game.flags,
            pause: game.pause,
            game_over: game.is_game_over(),
            repeat: self.repeat,
            notify: self.notify.clone(),
            prompt: self.prompt.as_ref().map(Prompt::text),
            input: self
                .request
                .as_ref()
                .map(|(request, text)| (request.title().to_string(), text.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use engine_session::testing::FakeTransport;
    use engine_session::{EngineError, EngineStatus, Transport};

    use super::*;

    /// Hands out fake transports and keeps a handle to each.
    #[derive(Clone, Default)]
    struct FakeFactory {
        spawned: Arc<Mutex<Vec<FakeTransport>>>,
        fail: bool,
    }

    impl FakeFactory {
        fn last(&self) -> FakeTransport {
            self.spawned.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl EngineFactory for FakeFactory {
        fn spawn(&mut self, _notify: Arc<Notify>) -> Result<Box<dyn Transport>, EngineError> {
            if self.fail {
                return Err(EngineError::EmptyCommand);
            }
            let fake = FakeTransport::new();
            self.spawned.lock().unwrap().push(fake.clone());
            Ok(Box::new(fake))
        }
    }

    fn state_with(config: Config) -> (SessionState, FakeFactory) {
        let factory = FakeFactory::default();
        let state = SessionState::new(config, Box::new(factory.clone())).unwrap();
        (state, factory)
    }

    fn state() -> SessionState {
        state_with(Config::default()).0
    }

    fn feed(state: &mut SessionState, line: &str) {
        state.handle_line(line);
        while let Some(key) = state.next_key() {
            state.dispatch_key(key);
        }
    }

    fn human(state: &mut SessionState) {
        feed(state, "h");
        assert!(state.game().flags.human);
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chess-state-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_game_navigation_wraps_single_steps() {
        let mut s = state();
        feed(&mut s, "^n^n");
        assert_eq!((s.games.len(), s.current), (3, 2));

        feed(&mut s, ">");
        assert_eq!(s.current, 0);
        feed(&mut s, "<");
        assert_eq!(s.current, 2);

        feed(&mut s, "5<");
        assert_eq!(s.current, 0);
        feed(&mut s, "2>");
        assert_eq!(s.current, 2);
        assert_eq!(s.repeat, 0);
    }

    #[test]
    fn test_delete_asks_and_keeps_last_game() {
        let mut s = state();
        feed(&mut s, "^d");
        assert_eq!(s.notify.as_deref(), Some("Cannot delete last game."));

        feed(&mut s, "^n^n<");
        assert_eq!(s.current, 1);
        feed(&mut s, "^d");
        assert_eq!(s.prompt, Some(Prompt::Delete { marked: false }));
        feed(&mut s, "n");
        assert_eq!(s.games.len(), 3);

        feed(&mut s, "^dY");
        assert_eq!((s.games.len(), s.current), (2, 1));
    }

    #[test]
    fn test_marked_games_are_deleted_together() {
        let (mut s, _) = state_with(Config {
            delete_prompt: false,
            ..Config::default()
        });
        feed(&mut s, "^n^n^n");
        feed(&mut s, "J");
        feed(&mut s, "1");
        assert_eq!(s.current, 0);

        feed(&mut s, "3^x");
        assert_eq!(s.current, 2);
        assert_eq!(s.games.iter().filter(|g| g.flags.delete).count(), 3);

        feed(&mut s, ">^x");
        assert_eq!(s.notify.as_deref(), Some("Cannot delete last game."));
        assert!(!s.games[3].flags.delete);

        feed(&mut s, "^d");
        assert_eq!((s.games.len(), s.current), (1, 0));
        assert!(!s.game().flags.delete);
    }

    #[test]
    fn test_moves_from_command_line_and_typed_request() {
        let mut s = state();
        human(&mut s);

        feed(&mut s, ":move e4");
        feed(&mut s, "me5<enter>");
        feed(&mut s, "m");
        assert!(s.request.is_some());
        feed(&mut s, "Nf3");
        assert!(s.request.is_none());

        let moves: Vec<&str> = s
            .game()
            .history
            .entries()
            .iter()
            .map(|e| e.move_text.as_str())
            .collect();
        assert_eq!(moves, ["e4", "e5", "Nf3"]);
    }

    #[test]
    fn test_escape_in_request_clears_selection() {
        let mut s = state();
        human(&mut s);
        feed(&mut s, " ");
        assert!(s.game().selected.is_some());

        feed(&mut s, "m");
        assert!(s.request.is_some());
        s.dispatch_key(Key::Escape);
        assert!(s.request.is_none());
        assert_eq!(s.game().selected, None);
    }

    #[test]
    fn test_invalid_move_is_reported() {
        let mut s = state();
        human(&mut s);
        feed(&mut s, ":move e5");
        assert_eq!(s.notify.as_deref(), Some("Invalid move \"e5\" (round #1)"));
        assert!(s.game().history.is_empty());
    }

    #[test]
    fn test_select_and_commit_with_cursor_keys() {
        let mut s = state();
        human(&mut s);
        // Cursor starts on e2.
        feed(&mut s, " <up><up><enter>");
        assert_eq!(s.game().history.entries()[0].move_text, "e4");
    }

    #[test]
    fn test_engine_plays_reply() {
        let (mut s, factory) = state_with(Config::default());
        feed(&mut s, ":move e4");

        let fake = factory.last();
        s.service_engines();
        assert_eq!(fake.written(), ["xboard", "protover 2"]);
        assert_eq!(s.game().engine_status(), Some(EngineStatus::Initializing));

        fake.push_output("feature done=1\n");
        s.service_engines();
        assert_eq!(fake.written(), ["xboard", "protover 2", "e2e4"]);
        assert!(s.game().is_thinking());

        fake.push_output("move e7e5\n");
        s.service_engines();
        assert_eq!(s.game().history.len(), 2);
        assert_eq!(s.game().engine_status(), Some(EngineStatus::Ready));
    }

    #[test]
    fn test_engine_spawn_failure_falls_back_to_human() {
        let factory = FakeFactory {
            fail: true,
            ..FakeFactory::default()
        };
        let mut s = SessionState::new(Config::default(), Box::new(factory)).unwrap();
        feed(&mut s, ":move d4");

        assert!(s.game().flags.human);
        assert_eq!(s.game().history.len(), 1);
        assert_eq!(s.notify.as_deref(), Some("Engine command is empty"));
    }

    #[test]
    fn test_lost_engine_reports_and_continues() {
        let (mut s, factory) = state_with(Config::default());
        feed(&mut s, ":move e4");
        factory.last().hang_up();
        s.service_engines();

        assert!(s.game().engine.is_none());
        assert!(s.game().flags.human);
        assert_eq!(s.notify.as_deref(), Some("Game 1: Engine closed its output"));
    }

    #[test]
    fn test_macro_expands_keys() {
        let (mut s, _) = state_with(Config {
            macros: "z=^n^n|play:x=Q".to_string(),
            ..Config::default()
        });
        feed(&mut s, "z");
        assert_eq!(s.games.len(), 3);

        feed(&mut s, "x");
        assert_eq!(s.prompt, Some(Prompt::Quit));
        feed(&mut s, "y");
        assert!(s.quit);
    }

    #[test]
    fn test_new_all_replaces_every_game() {
        let mut s = state();
        feed(&mut s, "^n^n^k");
        assert_eq!(s.prompt, Some(Prompt::NewAll));
        feed(&mut s, "y");
        assert_eq!((s.games.len(), s.current), (1, 0));
    }

    #[test]
    fn test_save_then_load() {
        let dir = temp_dir("save");
        let (mut s, _) = state_with(Config {
            save_dir: Some(dir.clone()),
            ..Config::default()
        });
        human(&mut s);
        feed(&mut s, ":move e4");
        feed(&mut s, ":move c5");
        feed(&mut s, "^y");
        assert_eq!(s.games.len(), 2);

        feed(&mut s, "^s");
        assert_eq!(s.prompt, Some(Prompt::SaveWhich));
        feed(&mut s, "a");
        feed(&mut s, "sicilian");
        assert_eq!(s.notify.as_deref(), Some("Game saved."));
        let path = dir.join("sicilian.pgn");
        assert_eq!(s.loadfile.as_deref(), Some(path.as_path()));
        assert_eq!(s.modified(), 0);

        feed(&mut s, ":save sicilian");
        assert!(matches!(s.prompt, Some(Prompt::Overwrite { .. })));
        feed(&mut s, "o");

        let (mut fresh, _) = state_with(Config::default());
        fresh.load_file(&path).unwrap();
        assert_eq!(fresh.games.len(), 1);
        assert_eq!(fresh.game().mode, Mode::History);
        assert_eq!(fresh.game().history.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failed_load_keeps_games() {
        let mut s = state();
        feed(&mut s, "^n");
        feed(&mut s, ":load /nonexistent/games.pgn");
        assert_eq!(s.games.len(), 2);
        assert!(s.notify.is_some());
    }

    #[test]
    fn test_find_game_by_tag() {
        let mut s = state();
        feed(&mut s, "^n^n");
        s.games[1].tags.set("White", "Capablanca");
        s.games[2].tags.set("White", "Alekhine");

        feed(&mut s, ":game white: Capa");
        assert_eq!(s.current, 1);

        feed(&mut s, "}");
        assert_eq!(s.notify.as_deref(), Some("No matches found."));
        assert_eq!(s.current, 1);

        s.game_exp = Some("Alekhine".to_string());
        feed(&mut s, "{");
        assert_eq!(s.current, 2);
    }

    #[test]
    fn test_history_browsing_and_annotation() {
        let mut s = state();
        human(&mut s);
        for mv in ["e4", "e5", "Nf3", "Nc6", "Bb5"] {
            feed(&mut s, &format!(":move {mv}"));
        }

        feed(&mut s, "H");
        assert_eq!(s.game().mode, Mode::History);
        feed(&mut s, "t<left><left>");
        assert_eq!(s.game().history.cursor(), 3);

        feed(&mut s, ":annotate $1 strong");
        let entry = &s.game().history.entries()[2];
        assert_eq!(entry.comment.as_deref(), Some("strong"));
        assert_eq!(entry.nags, [1]);

        feed(&mut s, ":find ^N");
        assert_eq!(s.game().history.cursor(), 4);

        feed(&mut s, ":jump 1");
        assert_eq!(s.game().history.cursor(), 1);

        feed(&mut s, "H");
        assert_eq!(s.prompt, Some(Prompt::Resume));
        feed(&mut s, "r");
        assert_eq!(s.game().mode, Mode::Play);
        assert_eq!(s.game().history.len(), 1);
    }

    #[test]
    fn test_clock_forfeit_ends_game() {
        let mut s = state();
        human(&mut s);
        feed(&mut s, ":clock 5s");
        feed(&mut s, ":move e4");

        s.tick(Duration::from_secs(6));
        assert!(s.game().is_game_over());
        assert_eq!(s.game().tags.get("Result"), Some("1-0"));
        assert!(s.notify.as_deref().unwrap().starts_with("Black forfeits"));
    }

    #[test]
    fn test_signal_save_writes_all_games() {
        let dir = temp_dir("signal");
        let (mut s, _) = state_with(Config {
            save_dir: Some(dir.clone()),
            ..Config::default()
        });
        feed(&mut s, "^n");
        s.signal_save("TERM");

        assert!(s.quit);
        let files: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(files.len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_snapshot_reflects_request() {
        let mut s = state();
        feed(&mut s, "^n");
        feed(&mut s, "?");
        s.dispatch_key(Key::Char('^'));

        let snap = s.snapshot();
        assert_eq!((snap.game, snap.total), (2, 2));
        let (title, text) = snap.input.unwrap();
        assert_eq!(title, TextRequest::FindGame.title());
        assert_eq!(text, "^");
    }
}
