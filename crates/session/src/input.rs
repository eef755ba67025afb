//! Intents fed to the session and the stdin source that produces them.
//!
//! Lines starting with `:` are commands (`:move e4`, `:clock 5m+3s`, ...).
//! Any other line is a key sequence in the notation of [`parse_keys`]; an
//! empty line is a bare Enter.
//!
//! [`parse_keys`]: crate::keys::parse_keys

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::keys::Key;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Key(Key),
    Move(String),
    ClockSpec(String),
    EngineCommand(String),
    Annotate(String),
    FindMove(String),
    FindGame(String),
    JumpMove(usize),
    JumpGame(usize),
    Load(PathBuf),
    Save { path: String, all: bool },
    Resize,
}

/// Parse the text after the leading `:`.
pub fn parse_intent(text: &str) -> Result<Intent, SessionError> {
    let text = text.trim();
    let (name, arg) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    let arg = arg.trim();

    let required = |what: &'static str| {
        if arg.is_empty() {
            Err(SessionError::Rejected(what))
        } else {
            Ok(arg.to_string())
        }
    };
    let number = || {
        arg.parse::<usize>()
            .map_err(|_| SessionError::Rejected("Expected a number"))
    };

    Ok(match name {
        "move" | "m" => Intent::Move(required("Missing move text")?),
        "clock" => Intent::ClockSpec(required("Missing clock specification")?),
        "engine" => Intent::EngineCommand(required("Missing engine command")?),
        "annotate" => Intent::Annotate(arg.to_string()),
        "find" => Intent::FindMove(required("Missing expression")?),
        "game" => Intent::FindGame(required("Missing expression")?),
        "jump" => Intent::JumpMove(number()?),
        "goto" => Intent::JumpGame(number()?),
        "load" => Intent::Load(PathBuf::from(required("Missing file name")?)),
        "save" => Intent::Save {
            path: required("Missing file name")?,
            all: false,
        },
        "saveall" => Intent::Save {
            path: required("Missing file name")?,
            all: true,
        },
        "resize" => Intent::Resize,
        _ => return Err(SessionError::Rejected("Unknown command")),
    })
}

/// Split annotation text into its comment and glyphs: leading `$n` words are
/// glyphs, the rest is the comment.
pub fn parse_annotation(text: &str) -> Result<(Option<String>, Vec<u8>), SessionError> {
    let mut nags = Vec::new();
    let mut rest = text.trim_start();

    while let Some(after) = rest.strip_prefix('$') {
        let end = after.find(char::is_whitespace).unwrap_or(after.len());
        let nag = after[..end]
            .parse::<u8>()
            .map_err(|_| SessionError::Rejected("Invalid annotation glyph"))?;
        nags.push(nag);
        rest = after[end..].trim_start();
    }

    let comment = rest.trim();
    Ok(((!comment.is_empty()).then(|| comment.to_string()), nags))
}

/// Forward stdin lines until end-of-file. The receiver closing means the
/// interactive input is gone.
pub fn spawn_stdin() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Input reached end of file");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Input read failed");
                    break;
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intents() {
        assert_eq!(parse_intent("move Nf3").unwrap(), Intent::Move("Nf3".into()));
        assert_eq!(
            parse_intent(" clock 35/90m SD/30m ").unwrap(),
            Intent::ClockSpec("35/90m SD/30m".into())
        );
        assert_eq!(parse_intent("goto 3").unwrap(), Intent::JumpGame(3));
        assert_eq!(
            parse_intent("saveall out").unwrap(),
            Intent::Save {
                path: "out".into(),
                all: true
            }
        );
        assert_eq!(parse_intent("annotate").unwrap(), Intent::Annotate(String::new()));
    }

    #[test]
    fn test_parse_intent_errors() {
        assert!(parse_intent("move").is_err());
        assert!(parse_intent("jump x").is_err());
        assert!(parse_intent("dance").is_err());
    }

    #[test]
    fn test_parse_annotation() {
        assert_eq!(
            parse_annotation("$1 $14 strong move").unwrap(),
            (Some("strong move".to_string()), vec![1, 14])
        );
        assert_eq!(parse_annotation("  ").unwrap(), (None, vec![]));
        assert_eq!(parse_annotation("$3").unwrap(), (None, vec![3]));
        assert!(parse_annotation("$x").is_err());
    }
}
