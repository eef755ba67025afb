//! Move history with recursive annotated variations.
//!
//! Lines are kept in an arena and addressed by [`LineId`]. An entry's
//! `variation` is an alternative to that entry: the variation line starts from
//! the position *before* the entry was played. The RAV stack remembers which
//! line, cursor and fingerprint were active when a variation was entered.

use regex::Regex;
use serde::Serialize;

use crate::error::HistoryError;

/// Maximum annotation glyphs per entry.
pub const MAX_NAGS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LineId(usize);

impl LineId {
    /// The main line of every history.
    pub const MAIN: LineId = LineId(0);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub move_text: String,
    pub comment: Option<String>,
    pub nags: Vec<u8>,
    /// Position after this move.
    pub fen: String,
    pub variation: Option<LineId>,
}

impl Entry {
    pub fn new(move_text: impl Into<String>, fen: impl Into<String>) -> Self {
        Self {
            move_text: move_text.into(),
            comment: None,
            nags: Vec::new(),
            fen: fen.into(),
            variation: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Line {
    base_fen: String,
    entries: Vec<Entry>,
    parent: Option<LineId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryFlags {
    pub game_over: bool,
}

#[derive(Debug, Clone)]
struct Frame {
    line: LineId,
    cursor: usize,
    fen: String,
    flags: HistoryFlags,
}

/// Cursor step unit for [`History::navigate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Step {
    HalfMove,
    #[default]
    FullMove,
}

impl Step {
    pub fn plies(self) -> i64 {
        match self {
            Step::HalfMove => 1,
            Step::FullMove => 2,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Step::HalfMove => Step::FullMove,
            Step::FullMove => Step::HalfMove,
        }
    }
}

#[derive(Debug, Clone)]
pub struct History {
    lines: Vec<Option<Line>>,
    active: LineId,
    cursor: usize,
    stack: Vec<Frame>,
    pub flags: HistoryFlags,
}

impl History {
    pub fn new(start_fen: &str) -> Self {
        Self {
            lines: vec![Some(Line {
                base_fen: start_fen.to_string(),
                entries: Vec::new(),
                parent: None,
            })],
            active: LineId::MAIN,
            cursor: 0,
            stack: Vec::new(),
            flags: HistoryFlags::default(),
        }
    }

    fn line(&self, id: LineId) -> Option<&Line> {
        self.lines.get(id.0).and_then(Option::as_ref)
    }

    fn line_mut(&mut self, id: LineId) -> Option<&mut Line> {
        self.lines.get_mut(id.0).and_then(Option::as_mut)
    }

    fn active_line(&self) -> &Line {
        match self.line(self.active) {
            Some(line) => line,
            None => unreachable!("active line is never freed"),
        }
    }

    fn active_line_mut(&mut self) -> &mut Line {
        let id = self.active;
        match self.line_mut(id) {
            Some(line) => line,
            None => unreachable!("active line is never freed"),
        }
    }

    pub fn active(&self) -> LineId {
        self.active
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of entries in the active line.
    pub fn len(&self) -> usize {
        self.active_line().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Variation nesting depth.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.active_line().entries
    }

    pub fn line_entries(&self, id: LineId) -> &[Entry] {
        self.line(id).map_or(&[], |l| l.entries.as_slice())
    }

    pub fn line_base_fen(&self, id: LineId) -> Option<&str> {
        self.line(id).map(|l| l.base_fen.as_str())
    }

    pub fn line_parent(&self, id: LineId) -> Option<LineId> {
        self.line(id).and_then(|l| l.parent)
    }

    pub fn base_fen(&self) -> &str {
        &self.active_line().base_fen
    }

    /// Fingerprint of the board at cursor `c` in the active line.
    pub fn fen_at(&self, c: usize) -> &str {
        let line = self.active_line();
        match c.min(line.entries.len()) {
            0 => &line.base_fen,
            n => &line.entries[n - 1].fen,
        }
    }

    /// Fingerprint of the board currently displayed.
    pub fn fen(&self) -> &str {
        self.fen_at(self.cursor)
    }

    /// The entry that produced the displayed board.
    pub fn last_played(&self) -> Option<&Entry> {
        self.cursor.checked_sub(1).and_then(|i| self.entries().get(i))
    }

    pub fn is_at_end(&self) -> bool {
        self.cursor == self.len()
    }

    /// Record a move at the cursor, dropping any future entries first.
    pub fn append(&mut self, move_text: impl Into<String>, fen: impl Into<String>) {
        self.truncate_future();
        let entry = Entry::new(move_text, fen);
        self.active_line_mut().entries.push(entry);
        self.cursor += 1;
    }

    /// Drop every entry at or after the cursor.
    pub fn truncate_future(&mut self) {
        let active = self.active;
        let cursor = self.cursor;
        self.truncate_line(active, cursor);
    }

    fn truncate_line(&mut self, id: LineId, len: usize) {
        let Some(line) = self.line_mut(id) else {
            return;
        };
        if line.entries.len() <= len {
            return;
        }

        let orphans: Vec<LineId> = line
            .entries
            .drain(len..)
            .filter_map(|e| e.variation)
            .collect();
        for orphan in orphans {
            self.free_line(orphan);
        }
    }

    fn free_line(&mut self, id: LineId) {
        if id == LineId::MAIN {
            return;
        }
        if let Some(line) = self.lines.get_mut(id.0).and_then(Option::take) {
            for nested in line.entries.into_iter().filter_map(|e| e.variation) {
                self.free_line(nested);
            }
        }
    }

    /// Move the cursor by `delta` units, clamped to the active line. Returns
    /// whether the cursor changed.
    pub fn navigate(&mut self, delta: i64, step: Step) -> bool {
        let target = self.cursor as i64 + delta * step.plies();
        self.set_cursor(target.clamp(0, self.len() as i64) as usize)
    }

    pub fn set_cursor(&mut self, cursor: usize) -> bool {
        let cursor = cursor.min(self.len());
        let changed = cursor != self.cursor;
        self.cursor = cursor;
        changed
    }

    /// Discard `n` plies ending at the cursor. Returns the number removed.
    pub fn undo(&mut self, n: usize) -> usize {
        let keep = self.cursor.saturating_sub(n);
        let removed = self.len() - keep;
        let active = self.active;
        self.truncate_line(active, keep);
        self.cursor = keep;
        if removed > 0 {
            self.flags.game_over = false;
        }
        removed
    }

    /// Replace the comment and glyph set of one active-line entry. Glyph `0`
    /// ends the set.
    pub fn annotate(
        &mut self,
        idx: usize,
        comment: Option<String>,
        nags: &[u8],
    ) -> Result<(), HistoryError> {
        let active = self.active;
        self.annotate_in(active, idx, comment, nags)
    }

    pub fn annotate_in(
        &mut self,
        line: LineId,
        idx: usize,
        comment: Option<String>,
        nags: &[u8],
    ) -> Result<(), HistoryError> {
        let nags: Vec<u8> = nags.iter().copied().take_while(|&n| n != 0).collect();
        if nags.len() > MAX_NAGS {
            return Err(HistoryError::TooManyNags(MAX_NAGS));
        }

        let entry = self
            .line_mut(line)
            .and_then(|l| l.entries.get_mut(idx))
            .ok_or(HistoryError::NoEntry(idx))?;

        entry.comment = comment.filter(|c| !c.trim().is_empty());
        entry.nags = nags;
        Ok(())
    }

    /// Append an entry to any line without moving the cursor. Used when
    /// building a history from a file.
    pub fn push_to(&mut self, line: LineId, entry: Entry) -> Result<usize, HistoryError> {
        let line = self.line_mut(line).ok_or(HistoryError::NoEntry(0))?;
        line.entries.push(entry);
        Ok(line.entries.len() - 1)
    }

    /// Open an alternative to entry `idx` of `line`. When that entry already
    /// has one, the new line hangs off the first move of the existing
    /// alternative, so sibling variations form a chain.
    pub fn add_variation(&mut self, line: LineId, idx: usize) -> Result<LineId, HistoryError> {
        let mut owner = line;
        let mut idx = idx;

        loop {
            let entry = self
                .line(owner)
                .and_then(|l| l.entries.get(idx))
                .ok_or(HistoryError::NoEntry(idx))?;

            match entry.variation {
                Some(existing) if !self.line_entries(existing).is_empty() => {
                    owner = existing;
                    idx = 0;
                }
                Some(existing) => return Ok(existing),
                None => break,
            }
        }

        let base_fen = match idx {
            0 => self.line(owner).map(|l| l.base_fen.clone()),
            n => self.line(owner).map(|l| l.entries[n - 1].fen.clone()),
        }
        .ok_or(HistoryError::NoEntry(idx))?;

        let line = Line {
            base_fen,
            entries: Vec::new(),
            parent: Some(owner),
        };
        // Slots freed by truncation are reused.
        let id = match self.lines.iter().position(Option::is_none) {
            Some(slot) => {
                self.lines[slot] = Some(line);
                LineId(slot)
            }
            None => {
                self.lines.push(Some(line));
                LineId(self.lines.len() - 1)
            }
        };

        if let Some(entry) = self.line_mut(owner).and_then(|l| l.entries.get_mut(idx)) {
            entry.variation = Some(id);
        }
        Ok(id)
    }

    /// Step into the alternative to the last played move. Returns `false`
    /// when there is none.
    pub fn enter_variation(&mut self) -> bool {
        let Some(target) = self.last_played().and_then(|e| e.variation) else {
            return false;
        };
        if self.line(target).is_none() {
            return false;
        }

        self.stack.push(Frame {
            line: self.active,
            cursor: self.cursor,
            fen: self.fen().to_string(),
            flags: self.flags,
        });

        self.active = target;
        self.cursor = self.len().min(1);
        self.flags.game_over = false;
        true
    }

    /// Return to the line the current variation was entered from. Yields the
    /// fingerprint recorded on entry, which the caller rebuilds its board
    /// from; `None` when already on the main line.
    pub fn leave_variation(&mut self) -> Option<String> {
        let frame = self.stack.pop()?;
        self.active = frame.line;
        self.cursor = frame.cursor;
        self.flags = frame.flags;
        Some(frame.fen)
    }

    /// Leave every variation and land on the main line.
    pub fn leave_all(&mut self) {
        while self.leave_variation().is_some() {}
    }

    /// Position the cursor after white's move `n` of the active line (`0` is
    /// the start). Out-of-range numbers are ignored.
    pub fn jump_to_move(&mut self, n: usize) -> bool {
        if n > self.len() / 2 {
            return false;
        }
        self.cursor = if n == 0 { 0 } else { n * 2 - 1 };
        true
    }

    /// Cursor after the `count`-th entry whose move text matches `re`,
    /// searching from the cursor in the given direction and wrapping around.
    pub fn find_move(&self, re: &Regex, forward: bool, count: usize) -> Option<usize> {
        let total = self.len() as i64;
        if total == 0 || count == 0 {
            return None;
        }

        let incr = if forward { 1 } else { -1 };
        let start = self.cursor as i64 - 1;
        let mut found = 0;

        for step in 1..=total {
            let i = (start + step * incr).rem_euclid(total) as usize;
            if re.is_match(&self.entries()[i].move_text) {
                found += 1;
                if found == count {
                    return Some(i + 1);
                }
            }
        }

        None
    }
}
