//! Move legality and position encoding, delegated to shakmaty.

use serde::Serialize;
use shakmaty::fen::Fen;
use shakmaty::san::{SanError, SanPlus};
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, File, Position, Rank, Square};

use crate::error::MoveError;

/// Board squares as piece letters, row 0 is rank 8 and column 0 is file a.
/// White pieces are upper case.
pub type BoardMatrix = [[Option<char>; 8]; 8];

/// Outcome of applying one move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Applied {
    /// Canonical SAN including `+`/`#`.
    pub san: String,
    pub uci: String,
    pub fen: String,
    /// Result string when the move ends the game.
    pub result: Option<&'static str>,
}

pub trait RulesOracle {
    /// Play `move_text` (SAN or UCI) on the position `fen`.
    fn apply(&self, fen: &str, move_text: &str) -> Result<Applied, MoveError>;

    fn board(&self, fen: &str) -> Result<BoardMatrix, MoveError>;

    /// Parse and re-encode a position, rejecting illegal setups.
    fn validate_fen(&self, fen: &str) -> Result<String, MoveError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShakmatyOracle;

impl ShakmatyOracle {
    fn position(fen: &str) -> Result<Chess, MoveError> {
        let parsed: Fen = fen
            .parse()
            .map_err(|e| MoveError::Position(format!("{e}")))?;
        parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| MoveError::Position(format!("{e}")))
    }
}

impl RulesOracle for ShakmatyOracle {
    fn apply(&self, fen: &str, move_text: &str) -> Result<Applied, MoveError> {
        let text = move_text.trim();
        let pos = Self::position(fen)?;

        let mv = match text.parse::<UciMove>() {
            Ok(uci) if looks_like_uci(text) => uci
                .to_move(&pos)
                .map_err(|_| MoveError::Invalid(text.to_string()))?,
            _ => {
                let san: SanPlus = text
                    .parse()
                    .map_err(|_| MoveError::Invalid(text.to_string()))?;
                san.san.to_move(&pos).map_err(|e| match e {
                    SanError::AmbiguousSan => MoveError::Ambiguous(text.to_string()),
                    SanError::IllegalSan => MoveError::Invalid(text.to_string()),
                })?
            }
        };

        let uci = mv.to_uci(CastlingMode::Standard).to_string();
        let mut next = pos;
        let san = SanPlus::from_move_and_play_unchecked(&mut next, mv).to_string();
        let result = game_result(&next);
        let fen = Fen::from_position(&next, EnPassantMode::Legal).to_string();

        Ok(Applied {
            san,
            uci,
            fen,
            result,
        })
    }

    fn board(&self, fen: &str) -> Result<BoardMatrix, MoveError> {
        let pos = Self::position(fen)?;
        let mut matrix: BoardMatrix = [[None; 8]; 8];
        for (row, cells) in matrix.iter_mut().enumerate() {
            for (col, cell) in cells.iter_mut().enumerate() {
                let sq = Square::from_coords(File::new(col as u32), Rank::new(7 - row as u32));
                *cell = pos.board().piece_at(sq).map(|p| p.char());
            }
        }
        Ok(matrix)
    }

    fn validate_fen(&self, fen: &str) -> Result<String, MoveError> {
        let pos = Self::position(fen)?;
        Ok(Fen::from_position(&pos, EnPassantMode::Legal).to_string())
    }
}

/// Coordinate moves (`e2e4`, `e7e8q`) parse as UCI; everything else is SAN.
fn looks_like_uci(text: &str) -> bool {
    let b = text.as_bytes();
    (b.len() == 4 || b.len() == 5)
        && matches!(b[0], b'a'..=b'h')
        && matches!(b[1], b'1'..=b'8')
        && matches!(b[2], b'a'..=b'h')
        && matches!(b[3], b'1'..=b'8')
}

fn game_result(pos: &Chess) -> Option<&'static str> {
    if pos.is_checkmate() {
        return Some(match pos.turn() {
            shakmaty::Color::White => "0-1",
            shakmaty::Color::Black => "1-0",
        });
    }
    if pos.is_stalemate() || pos.is_insufficient_material() {
        return Some("1/2-1/2");
    }
    None
}

/// UCI text for a move between two matrix coordinates.
pub fn coords_to_uci(from: (usize, usize), to: (usize, usize), promotion: Option<char>) -> String {
    let square = |(row, col): (usize, usize)| {
        format!("{}{}", (b'a' + col as u8) as char, 8 - row)
    };
    let mut out = format!("{}{}", square(from), square(to));
    if let Some(p) = promotion {
        out.push(p.to_ascii_lowercase());
    }
    out
}

/// Whether moving from `from` to `to` is a pawn reaching the last rank.
pub fn is_promotion(matrix: &BoardMatrix, from: (usize, usize), to: (usize, usize)) -> bool {
    match matrix[from.0][from.1] {
        Some('P') => to.0 == 0,
        Some('p') => to.0 == 7,
        _ => false,
    }
}

/// Build a FEN from an edited board. Castling rights are granted wherever
/// king and rook still stand on their home squares.
pub fn matrix_to_fen(matrix: &BoardMatrix, white_to_move: bool) -> String {
    let mut placement = String::new();
    for (row, cells) in matrix.iter().enumerate() {
        let mut empty = 0;
        for cell in cells {
            match cell {
                Some(c) => {
                    if empty > 0 {
                        placement.push_str(&empty.to_string());
                        empty = 0;
                    }
                    placement.push(*c);
                }
                None => empty += 1,
            }
        }
        if empty > 0 {
            placement.push_str(&empty.to_string());
        }
        if row < 7 {
            placement.push('/');
        }
    }

    let at = |row: usize, col: usize| matrix[row][col];
    let mut castling = String::new();
    if at(7, 4) == Some('K') {
        if at(7, 7) == Some('R') {
            castling.push('K');
        }
        if at(7, 0) == Some('R') {
            castling.push('Q');
        }
    }
    if at(0, 4) == Some('k') {
        if at(0, 7) == Some('r') {
            castling.push('k');
        }
        if at(0, 0) == Some('r') {
            castling.push('q');
        }
    }
    if castling.is_empty() {
        castling.push('-');
    }

    let side = if white_to_move { 'w' } else { 'b' };
    format!("{placement} {side} {castling} - 0 1")
}
