//! Read-only view of the session handed to the renderer.

use std::io::Write;

use chess_core::{BoardMatrix, Side, Step};
use engine_session::EngineStatus;
use serde::Serialize;
use tracing::{trace, warn};

use crate::game::{GameFlags, Mode, Pause, Square};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRow {
    pub move_text: String,
    pub comment: Option<String>,
    pub nags: Vec<u8>,
    pub has_variation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// 1-based index of the current game.
    pub game: usize,
    pub total: usize,
    pub mode: Mode,
    pub board: BoardMatrix,
    pub rotate: bool,
    pub cursor: Square,
    pub selected: Option<Square>,
    pub turn: Side,
    pub side: Side,
    /// Fullmove number and side to move before the first row.
    pub first_round: u32,
    pub first_turn: Side,
    pub history: Vec<HistoryRow>,
    pub history_cursor: usize,
    pub variation_depth: usize,
    pub movestep: Step,
    pub white_clock: String,
    pub black_clock: String,
    pub engine: Option<EngineStatus>,
    /// Engine I/O, only while the engine window is shown.
    pub engine_log: Vec<String>,
    pub tags: Vec<(String, String)>,
    pub flags: GameFlags,
    pub pause: Pause,
    pub game_over: bool,
    pub repeat: u32,
    pub notify: Option<String>,
    pub prompt: Option<String>,
    /// Title and text typed so far of a pending text request.
    pub input: Option<(String, String)>,
}

pub trait Renderer {
    fn refresh(&mut self, snapshot: &Snapshot);
}

/// Plain text output, written only when the snapshot changed.
pub struct TextRenderer<W: Write> {
    out: W,
    last: Option<Snapshot>,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, last: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn draw(&mut self, s: &Snapshot) -> std::io::Result<()> {
        let mode = match s.mode {
            Mode::Play => "play",
            Mode::History => "history",
            Mode::Edit => "edit",
        };
        let engine = s.engine.map_or_else(|| "none".to_string(), |e| e.to_string());
        let mut marks = String::new();
        if s.flags.human {
            marks.push_str(" human");
        }
        if s.flags.engine_loop {
            marks.push_str(" loop");
        }
        if s.pause != Pause::Running {
            marks.push_str(" paused");
        }
        if s.flags.delete {
            marks.push_str(" (delete)");
        }
        writeln!(
            self.out,
            "Game {}/{} [{mode}] {:?} to move, engine: {engine}{marks}",
            s.game, s.total, s.turn
        )?;

        let rows: Vec<usize> = if s.rotate { (0..8).rev().collect() } else { (0..8).collect() };
        let cols: Vec<usize> = if s.rotate { (0..8).rev().collect() } else { (0..8).collect() };
        for &row in &rows {
            write!(self.out, "{} ", 8 - row)?;
            for &col in &cols {
                let piece = s.board[row][col].unwrap_or('.');
                let (open, close) = if s.selected == Some((row, col)) {
                    ('[', ']')
                } else if s.cursor == (row, col) {
                    ('(', ')')
                } else {
                    (' ', ' ')
                };
                write!(self.out, "{open}{piece}{close}")?;
            }
            writeln!(self.out)?;
        }
        let files: String = cols
            .iter()
            .map(|&c| format!(" {} ", (b'a' + c as u8) as char))
            .collect();
        writeln!(self.out, "  {files}")?;

        writeln!(self.out, "White {}  Black {}", s.white_clock, s.black_clock)?;

        let mut moves = String::new();
        let black_first = s.first_turn == Side::Black;
        for (i, row) in s.history.iter().enumerate() {
            let ply = i + usize::from(black_first);
            let round = s.first_round as usize + ply / 2;
            if i == s.history_cursor {
                moves.push_str("| ");
            }
            if ply % 2 == 0 {
                moves.push_str(&format!("{round}. "));
            } else if i == 0 {
                moves.push_str(&format!("{round}... "));
            }
            moves.push_str(&row.move_text);
            for nag in &row.nags {
                moves.push_str(&format!(" ${nag}"));
            }
            if row.has_variation {
                moves.push_str(" (+)");
            }
            moves.push(' ');
        }
        if !moves.is_empty() {
            writeln!(self.out, "{}", moves.trim_end())?;
        }

        for line in &s.engine_log {
            writeln!(self.out, "  {line}")?;
        }
        if let Some(note) = &s.notify {
            writeln!(self.out, "> {note}")?;
        }
        if let Some(prompt) = &s.prompt {
            writeln!(self.out, "? {prompt}")?;
        }
        if let Some((title, text)) = &s.input {
            writeln!(self.out, "{title}: {text}")?;
        }
        self.out.flush()
    }
}

impl<W: Write> Renderer for TextRenderer<W> {
    fn refresh(&mut self, snapshot: &Snapshot) {
        if self.last.as_ref() == Some(snapshot) {
            return;
        }
        if let Ok(json) = serde_json::to_string(snapshot) {
            trace!(snapshot = %json, "Refresh");
        }
        if let Err(e) = self.draw(snapshot) {
            warn!(error = %e, "Failed to draw");
        }
        self.last = Some(snapshot.clone());
    }
}
