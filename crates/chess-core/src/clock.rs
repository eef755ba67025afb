//! Per-player chess clocks with multi-phase time controls.
//!
//! Time control grammar:
//!
//! ```text
//! [W|B] [+]T[+I] | ++I | M/T [M/T ...] [SD/T] [+I]
//! ```
//!
//! `T` is a duration built from `h`/`m`/`s` suffixed integers (a trailing
//! bare number is seconds), `M` a move count, `SD` sudden death and `I` a
//! per-move increment. A leading `+` adjusts the running budget instead of
//! replacing the schedule; `++I` only sets the increment.

use std::time::Duration;

use serde::Serialize;

use crate::error::ClockError;
use crate::game_data::Side;

/// Maximum number of phases in one schedule.
pub const MAX_PHASES: usize = 8;

const MICROS_PER_SEC: u64 = 1_000_000;

/// Accumulated thinking time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Elapsed {
    pub secs: u64,
    pub micros: u32,
}

impl Elapsed {
    fn add(&mut self, delta: Duration) {
        let micros = u64::from(self.micros) + u64::from(delta.subsec_micros());
        self.secs += delta.as_secs() + micros / MICROS_PER_SEC;
        self.micros = (micros % MICROS_PER_SEC) as u32;
    }
}

/// One time-control phase. A zero `moves` limit is sudden death; a zero
/// `budget` means the phase is untimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub moves: u32,
    pub budget: i64,
}

/// A parsed clock specification, not yet applied to any clock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeControl {
    /// `W`/`B` prefix. `None` applies to both clocks.
    pub side: Option<Side>,
    /// Replace the whole clock state (and `phases`) rather than adjust it.
    pub reset: bool,
    pub phases: Vec<Phase>,
    /// Seconds added to the current phase budget.
    pub adjust: i64,
    pub increment: Option<i64>,
}

/// Raised once when a clock's flag falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeForfeit {
    pub loser: Side,
}

impl TimeForfeit {
    pub fn result(&self) -> &'static str {
        self.loser.losing_result()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clock {
    elapsed: Elapsed,
    phases: Vec<Phase>,
    tcn: usize,
    moves: u32,
    increment: i64,
    flagged: bool,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            elapsed: Elapsed::default(),
            phases: vec![Phase::default()],
            tcn: 0,
            moves: 0,
            increment: 0,
            flagged: false,
        }
    }
}

impl Clock {
    pub fn elapsed(&self) -> Elapsed {
        self.elapsed
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Index of the current phase.
    pub fn tcn(&self) -> usize {
        self.tcn
    }

    pub fn current_phase(&self) -> Phase {
        self.phases[self.tcn]
    }

    pub fn increment(&self) -> i64 {
        self.increment
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged
    }

    /// Commit a parsed specification. Cannot fail: all validation happened in
    /// [`parse_spec`].
    pub fn apply(&mut self, tc: &TimeControl) {
        if tc.reset {
            *self = Clock::default();
            if !tc.phases.is_empty() {
                self.phases = tc.phases.clone();
            }
        }

        if let Some(increment) = tc.increment {
            self.increment = increment;
        }

        self.phases[self.tcn].budget += tc.adjust;
    }

    /// Accumulate thinking time. Returns `true` exactly once, on the tick that
    /// exhausts a timed phase; a flagged clock no longer accumulates.
    pub fn tick(&mut self, delta: Duration) -> bool {
        if self.flagged {
            return false;
        }

        self.elapsed.add(delta);

        let budget = self.phases[self.tcn].budget;
        if budget != 0 && self.elapsed.secs as i64 >= budget {
            self.flagged = true;
            return true;
        }

        false
    }

    /// Book-keeping after this side completed a move.
    pub fn advance_phase(&mut self) {
        if self.increment != 0 {
            self.phases[self.tcn].budget += self.increment;
        }

        let current = self.phases[self.tcn];
        if current.budget == 0 || current.moves == 0 {
            return;
        }

        self.moves += 1;
        if self.moves < current.moves {
            return;
        }

        // Carry the unused (or overdrawn) time into the next phase.
        let carry = current.budget - self.elapsed.secs as i64;
        if self.tcn + 1 == self.phases.len() {
            self.phases.push(Phase::default());
        }
        self.phases[self.tcn + 1].budget += carry;
        self.elapsed = Elapsed::default();
        self.moves = 0;
        self.tcn += 1;
    }

    /// Seconds left in the current phase, if it is timed.
    pub fn remaining(&self) -> Option<i64> {
        let budget = self.phases[self.tcn].budget;
        (budget != 0).then(|| budget - self.elapsed.secs as i64)
    }

    /// `HH:MM:SS` of the remaining time, or of the elapsed time when untimed.
    pub fn display(&self) -> String {
        match self.remaining() {
            Some(left) => hms(left.max(0)),
            None => hms(self.elapsed.secs as i64),
        }
    }

    /// Moves left in the phase and the next budget (` Mnn/HH:MM:SS`), plus
    /// the increment (` In`).
    pub fn status(&self) -> String {
        let mut out = String::new();
        let current = self.phases[self.tcn];
        let next_budget = self.phases.get(self.tcn + 1).map_or(0, |p| p.budget);

        if current.moves != 0 && next_budget != 0 {
            let left = current.moves.saturating_sub(self.moves);
            out.push_str(&format!(" M{left:02}/{}", hms(next_budget)));
        }

        if self.increment != 0 {
            out.push_str(&format!(" I{}", self.increment));
        }

        out
    }
}

/// White and black clocks of one game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Clocks {
    pub white: Clock,
    pub black: Clock,
    enabled: bool,
}

impl Clocks {
    pub fn get(&self, side: Side) -> &Clock {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut Clock {
        match side {
            Side::White => &mut self.white,
            Side::Black => &mut self.black,
        }
    }

    /// Whether either side has a timed first phase.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Parse `text` and commit it. On error neither clock changes.
    pub fn set_spec(&mut self, text: &str) -> Result<(), ClockError> {
        let tc = parse_spec(text)?;

        match tc.side {
            Some(side) => self.get_mut(side).apply(&tc),
            None => {
                self.white.apply(&tc);
                self.black.apply(&tc);
            }
        }

        self.enabled = self.white.phases[0].budget != 0 || self.black.phases[0].budget != 0;
        Ok(())
    }

    /// Charge `delta` to the side on move.
    pub fn tick(&mut self, turn: Side, delta: Duration) -> Option<TimeForfeit> {
        if !self.enabled {
            return None;
        }

        self.get_mut(turn)
            .tick(delta)
            .then_some(TimeForfeit { loser: turn })
    }

    pub fn advance_phase(&mut self, side: Side) {
        self.get_mut(side).advance_phase();
    }
}

/// Parse a clock specification without touching any clock.
pub fn parse_spec(text: &str) -> Result<TimeControl, ClockError> {
    let mut sc = Scanner::new(text);
    sc.skip_space();

    let side = match sc.peek() {
        Some(b'w' | b'W') => Some(Side::White),
        Some(b'b' | b'B') => Some(Side::Black),
        _ => None,
    };
    if side.is_some() {
        sc.bump();
        sc.skip_space();
    }

    let mut tc = TimeControl {
        side,
        ..TimeControl::default()
    };

    if sc.at_end() {
        return Ok(tc);
    }

    if sc.eat(b'+') {
        sc.skip_space();
        if sc.peek() == Some(b'+') {
            parse_increment(&mut sc, &mut tc)?;
            return Ok(tc);
        }

        tc.adjust = parse_duration(&mut sc)?;
        if sc.peek() == Some(b'/') {
            return Err(invalid("a phase list cannot adjust the running clock"));
        }

        parse_increment(&mut sc, &mut tc)?;
        return Ok(tc);
    }

    tc.reset = true;

    loop {
        sc.skip_space();
        let moves = if sc.eat_ignore_case(b"sd") {
            Some(0)
        } else {
            parse_move_count(&mut sc)?
        };

        let Some(moves) = moves else {
            if !tc.phases.is_empty() {
                return Err(invalid("a plain time cannot follow a phase list"));
            }

            let budget = parse_duration(&mut sc)?;
            if sc.peek() == Some(b'/') {
                return Err(invalid("a move count must be a plain number"));
            }
            if budget != 0 {
                tc.phases.push(Phase { moves: 0, budget });
            }

            parse_increment(&mut sc, &mut tc)?;
            return Ok(tc);
        };

        if !sc.eat(b'/') {
            return Err(invalid("SD must be followed by /T"));
        }
        // A zero move count only makes sense as the tail of a list.
        if moves == 0 && tc.phases.is_empty() {
            return Err(invalid("sudden death without a previous time control"));
        }

        let budget = parse_duration(&mut sc)?;

        if tc.phases.len() >= MAX_PHASES {
            return Err(ClockError::TooManyPhases(MAX_PHASES));
        }
        tc.phases.push(Phase { moves, budget });

        sc.skip_space();
        if sc.peek() == Some(b'+') {
            parse_increment(&mut sc, &mut tc)?;
            return Ok(tc);
        }

        if sc.at_end() {
            return Ok(tc);
        }
    }
}

/// `M` of an `M/T` phase. `None` (and nothing consumed) when the next token
/// is not a digit run directly followed by `/`.
fn parse_move_count(sc: &mut Scanner<'_>) -> Result<Option<u32>, ClockError> {
    let start = sc.pos;
    if !sc.peek().is_some_and(|c| c.is_ascii_digit()) {
        return Ok(None);
    }

    let n = sc.number()?;
    if sc.peek() != Some(b'/') {
        sc.pos = start;
        return Ok(None);
    }

    u32::try_from(n)
        .map(Some)
        .map_err(|_| invalid("move count out of range"))
}

/// Optional `+I` tail; anything else left over is an error.
fn parse_increment(sc: &mut Scanner<'_>, tc: &mut TimeControl) -> Result<(), ClockError> {
    sc.skip_space();
    if sc.at_end() {
        return Ok(());
    }

    if !sc.eat(b'+') {
        return Err(invalid("unexpected trailing text"));
    }

    if !sc.peek().is_some_and(|c| c.is_ascii_digit()) {
        return Err(invalid("increment must be a time"));
    }

    let n = parse_duration(sc)?;
    sc.skip_space();
    if !sc.at_end() {
        return Err(invalid("unexpected text after increment"));
    }

    tc.increment = Some(n);
    Ok(())
}

/// `1h30m`, `90m`, `45` (seconds). Stops before `/` or `+`, and after a space.
fn parse_duration(sc: &mut Scanner<'_>) -> Result<i64, ClockError> {
    sc.skip_space();

    if !sc.peek().is_some_and(|c| c.is_ascii_digit()) {
        return Err(invalid("expected a time"));
    }

    let mut total: i64 = 0;
    let mut pending: i64 = 0;

    while let Some(c) = sc.peek() {
        if c.is_ascii_digit() {
            pending = sc.number()?;
            continue;
        }

        let unit = match c {
            b'h' | b'H' => 3600,
            b'm' | b'M' => 60,
            b's' | b'S' => 1,
            b' ' => {
                sc.bump();
                break;
            }
            b'/' | b'+' => break,
            _ => return Err(invalid("unknown time unit")),
        };

        total = pending
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| invalid("number out of range"))?;
        pending = 0;
        sc.bump();
    }

    total
        .checked_add(pending)
        .ok_or_else(|| invalid("number out of range"))
}

fn invalid(msg: &str) -> ClockError {
    ClockError::InvalidSpec(msg.to_string())
}

fn hms(secs: i64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn skip_space(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ignore_case(&mut self, word: &[u8]) -> bool {
        let end = self.pos + word.len();
        match self.bytes.get(self.pos..end) {
            Some(s) if s.eq_ignore_ascii_case(word) => {
                self.pos = end;
                true
            }
            _ => false,
        }
    }

    fn number(&mut self) -> Result<i64, ClockError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| invalid("number out of range"))
    }
}
