//! Pending questions the next key or line answers.

use std::path::PathBuf;

use crate::game::Square;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveRange {
    Current,
    All,
}

/// A yes/no style question answered by one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Quit,
    NewAll,
    Delete { marked: bool },
    SaveWhich,
    Overwrite { path: PathBuf, range: SaveRange },
    Resume,
    Promotion { from: Square, to: Square },
    InsertPiece,
}

impl Prompt {
    pub fn text(&self) -> String {
        match self {
            Prompt::Quit => "Want to Quit? [y/n]".to_string(),
            Prompt::NewAll => "Really start a new game from scratch? [y/n]".to_string(),
            Prompt::Delete { marked: false } => "Delete the current game? [y/n]".to_string(),
            Prompt::Delete { marked: true } => {
                "Delete all games marked for deletion? [y/n]".to_string()
            }
            Prompt::SaveWhich => {
                "There is more than one game loaded. Save (c)urrent or (a)ll games?".to_string()
            }
            Prompt::Overwrite { path, .. } => format!(
                "File exists: \"{}\". Press (a) to append, (o) to overwrite or any other key to cancel.",
                path.display()
            ),
            Prompt::Resume => "The current move is not the final move. Press (r) to resume \
                from here and discard the future moves."
                .to_string(),
            Prompt::Promotion { .. } => "Select pawn promotion piece: R/N/B/Q".to_string(),
            Prompt::InsertPiece => {
                "Type the piece letter to insert. Lower case for black.".to_string()
            }
        }
    }
}

/// A line of text the user is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextRequest {
    MoveText,
    ClockSpec,
    EngineCommand,
    Annotate,
    FindMove,
    FindGame,
    JumpMove,
    JumpGame,
    Load,
    Save(SaveRange),
}

impl TextRequest {
    pub fn title(self) -> &'static str {
        match self {
            TextRequest::MoveText => "Move",
            TextRequest::ClockSpec => {
                "Set Clock ([W | B] [+]T[+I] | ++I | M/T [M/T [...] [SD/T]] [+I])"
            }
            TextRequest::EngineCommand => "Engine Command",
            TextRequest::Annotate => "Annotation ($n glyphs, then comment)",
            TextRequest::FindMove => "Find Move Text Expression",
            TextRequest::FindGame => "Find Game by Tag Expression ([name:]value)",
            TextRequest::JumpMove => "Jump to Move Number",
            TextRequest::JumpGame => "Jump to Game Number",
            TextRequest::Load => "Load Filename",
            TextRequest::Save(_) => "Save Game Filename",
        }
    }
}
