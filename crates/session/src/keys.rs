//! Keys and the per-mode command tables.
//!
//! Global commands are looked up first; whatever they don't claim goes to the
//! table of the current game's mode.

use serde::Serialize;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Key {
    Char(char),
    /// Control chord, stored as the lower case letter.
    Ctrl(char),
    Enter,
    Escape,
    Backspace,
    Up,
    Down,
    Left,
    Right,
}

impl Key {
    /// Map a raw input character. Control characters become chords.
    pub fn from_char(c: char) -> Key {
        match c {
            '\n' | '\r' => Key::Enter,
            '\x1b' => Key::Escape,
            '\x08' | '\x7f' => Key::Backspace,
            '\x01'..='\x1a' => Key::Ctrl((b'a' + c as u8 - 1) as char),
            c => Key::Char(c),
        }
    }

    pub fn digit(self) -> Option<u32> {
        match self {
            Key::Char(c) => c.to_digit(10),
            _ => None,
        }
    }

    /// Board cursor offset (rows, columns) for an arrow key.
    pub fn arrow(self) -> Option<(i32, i32)> {
        match self {
            Key::Up => Some((-1, 0)),
            Key::Down => Some((1, 0)),
            Key::Left => Some((0, -1)),
            Key::Right => Some((0, 1)),
            _ => None,
        }
    }
}

/// Parse a key sequence. `^x` is a control chord, `^^` a literal caret and
/// `<name>` one of `enter`, `esc`, `bs`, `up`, `down`, `left`, `right`. A `<`
/// that doesn't start a known name is a literal.
pub fn parse_keys(text: &str) -> Result<Vec<Key>, SessionError> {
    let mut keys = Vec::new();
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        rest = &rest[c.len_utf8()..];
        match c {
            '^' => {
                let next = rest
                    .chars()
                    .next()
                    .ok_or_else(|| SessionError::Macro(format!("dangling '^' in \"{text}\"")))?;
                rest = &rest[next.len_utf8()..];
                keys.push(match next {
                    '^' => Key::Char('^'),
                    c if c.is_ascii_alphabetic() => Key::Ctrl(c.to_ascii_lowercase()),
                    c => return Err(SessionError::Macro(format!("invalid chord '^{c}'"))),
                });
            }
            '<' => match named_key(rest) {
                Some((key, len)) => {
                    keys.push(key);
                    rest = &rest[len..];
                }
                None => keys.push(Key::Char('<')),
            },
            c => keys.push(Key::from_char(c)),
        }
    }

    Ok(keys)
}

fn named_key(rest: &str) -> Option<(Key, usize)> {
    let end = rest.find('>')?;
    let key = match rest[..end].to_ascii_lowercase().as_str() {
        "enter" | "cr" => Key::Enter,
        "esc" | "escape" => Key::Escape,
        "bs" | "backspace" => Key::Backspace,
        "up" => Key::Up,
        "down" => Key::Down,
        "left" => Key::Left,
        "right" => Key::Right,
        _ => return None,
    };
    Some((key, end + 1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalCommand {
    NextGame,
    PrevGame,
    NewGame,
    /// Discard every game and start over.
    NewAll,
    CopyGame,
    DeleteGame,
    ToggleDelete,
    FindGame,
    FindGameNext,
    FindGamePrev,
    JumpGame,
    LoadFile,
    SaveGame,
    Quit,
    EngineWindow,
    Redraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayCommand {
    Select,
    Commit,
    MoveText,
    Undo,
    Pause,
    Go,
    ToggleHuman,
    EngineLoop,
    EngineCommand,
    SetClock,
    SwitchSides,
    HistoryMode,
    EditMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryCommand {
    Next,
    Prev,
    JumpNext,
    JumpPrev,
    ToggleStep,
    EnterVariation,
    LeaveVariation,
    Annotate,
    FindMove,
    FindNext,
    FindPrev,
    JumpMove,
    Resume,
    Rotate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditCommand {
    Select,
    Commit,
    Delete,
    Insert,
    SwitchTurn,
    Exit,
}

pub fn global_command(key: Key) -> Option<GlobalCommand> {
    use GlobalCommand::*;
    Some(match key {
        Key::Char('>') => NextGame,
        Key::Char('<') => PrevGame,
        Key::Ctrl('n') => NewGame,
        Key::Ctrl('k') => NewAll,
        Key::Ctrl('y') => CopyGame,
        Key::Ctrl('d') => DeleteGame,
        Key::Ctrl('x') => ToggleDelete,
        Key::Char('?') => FindGame,
        Key::Char('}') => FindGameNext,
        Key::Char('{') => FindGamePrev,
        Key::Char('J') => JumpGame,
        Key::Ctrl('r') => LoadFile,
        Key::Ctrl('s') => SaveGame,
        Key::Char('Q') => Quit,
        Key::Ctrl('e') => EngineWindow,
        Key::Ctrl('l') => Redraw,
        _ => return None,
    })
}

pub fn play_command(key: Key) -> Option<PlayCommand> {
    use PlayCommand::*;
    Some(match key {
        Key::Char(' ') => Select,
        Key::Enter => Commit,
        Key::Char('m') => MoveText,
        Key::Char('u') => Undo,
        Key::Char('p') => Pause,
        Key::Char('g') => Go,
        Key::Char('h') => ToggleHuman,
        Key::Char('E') => EngineLoop,
        Key::Char('|') => EngineCommand,
        Key::Char('C') => SetClock,
        Key::Char('S') => SwitchSides,
        Key::Char('H') => HistoryMode,
        Key::Char('e') => EditMode,
        _ => return None,
    })
}

pub fn history_command(key: Key) -> Option<HistoryCommand> {
    use HistoryCommand::*;
    Some(match key {
        Key::Right | Key::Char('l') => Next,
        Key::Left | Key::Char('h') => Prev,
        Key::Down | Key::Char('j') => JumpNext,
        Key::Up | Key::Char('k') => JumpPrev,
        Key::Char('t') => ToggleStep,
        Key::Char('+') => EnterVariation,
        Key::Char('-') => LeaveVariation,
        Key::Char('a') => Annotate,
        Key::Char('/') => FindMove,
        Key::Char('n') => FindNext,
        Key::Char('N') => FindPrev,
        Key::Char('g') => JumpMove,
        Key::Char('H') => Resume,
        Key::Char('r') => Rotate,
        _ => return None,
    })
}

pub fn edit_command(key: Key) -> Option<EditCommand> {
    use EditCommand::*;
    Some(match key {
        Key::Char(' ') => Select,
        Key::Enter => Commit,
        Key::Char('d') => Delete,
        Key::Char('i') => Insert,
        Key::Char('w') => SwitchTurn,
        Key::Char('e') => Exit,
        _ => return None,
    })
}
