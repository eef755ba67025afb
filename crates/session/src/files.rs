//! Game file paths and writing.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chess_core::pgn::write_game;

use crate::config::Config;
use crate::game::{Game, Mode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    Overwrite,
}

/// Add the `.pgn` suffix when missing and put relative names under the save
/// directory, creating it first.
pub fn resolve_save_path(config: &Config, name: &str) -> io::Result<PathBuf> {
    let mut path = PathBuf::from(name.trim());
    if path.as_os_str().is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty file name"));
    }
    if !matches!(path.extension(), Some(ext) if ext == "pgn") {
        let mut with_ext = path.into_os_string();
        with_ext.push(".pgn");
        path = PathBuf::from(with_ext);
    }

    if path.is_relative() {
        if let Some(dir) = &config.save_dir {
            fs::create_dir_all(dir)?;
            if !dir.is_dir() {
                return Err(io::Error::other(format!("{}: Not a directory.", dir.display())));
            }
            path = dir.join(path);
        }
    }
    Ok(path)
}

/// Games as PGN text. A game still being set up is written with its edited
/// board as the `FEN` tag.
pub fn render_games<'a>(games: impl IntoIterator<Item = &'a Game>) -> String {
    games
        .into_iter()
        .map(|game| {
            if game.mode == Mode::Edit {
                let mut tags = game.tags.clone();
                tags.set("SetUp", "1");
                tags.set("FEN", &game.edit_fen());
                write_game(&tags, &game.history)
            } else {
                write_game(&game.tags, &game.history)
            }
        })
        .collect()
}

pub fn write_pgn(path: &Path, text: &str, mode: WriteMode) -> io::Result<()> {
    let mut file = match mode {
        WriteMode::Append => OpenOptions::new().create(true).append(true).open(path)?,
        WriteMode::Overwrite => OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?,
    };
    file.write_all(text.as_bytes())?;
    file.flush()
}

/// File that receives every game when a termination signal arrives.
pub fn signal_save_path(config: &Config, signal: &str, unix_time: i64) -> PathBuf {
    config
        .save_root()
        .join(format!("signal-{signal}-{unix_time}.pgn"))
}
