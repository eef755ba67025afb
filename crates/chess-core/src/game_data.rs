use serde::{Deserialize, Serialize};

/// Standard starting position.
pub const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Seven Tag Roster, in the order PGN writers emit it.
const ROSTER: [&str; 7] = ["Event", "Site", "Date", "Round", "White", "Black", "Result"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    /// Side to move according to the second FEN field.
    pub fn to_move(fen: &str) -> Self {
        match fen.split_whitespace().nth(1) {
            Some("b") => Side::Black,
            _ => Side::White,
        }
    }

    /// Result string for a game this side lost.
    pub fn losing_result(self) -> &'static str {
        match self {
            Side::White => "0-1",
            Side::Black => "1-0",
        }
    }
}

/// Full-move number of a position, from the sixth FEN field.
pub fn round_of(fen: &str) -> u32 {
    fen.split_whitespace()
        .nth(5)
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
}

/// Ordered PGN tag pairs. Lookups are case-sensitive, like the tag names themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags(Vec<(String, String)>);

impl Tags {
    /// Roster tags for a fresh game, dated today.
    pub fn roster() -> Self {
        let date = chrono::Local::now().format("%Y.%m.%d").to_string();
        let mut tags = Tags::default();
        for name in ROSTER {
            let value = match name {
                "Date" => date.as_str(),
                "Round" => "-",
                "Result" => "*",
                _ => "?",
            };
            tags.set(name, value);
        }
        tags
    }

    /// Put the roster tags first, in order, adding defaults for missing ones.
    pub fn complete_roster(&mut self) {
        let defaults = Tags::roster();
        let mut ordered = Tags::default();
        for name in ROSTER {
            let value = self.get(name).or_else(|| defaults.get(name)).unwrap_or("?");
            ordered.set(name, value);
        }
        for (name, value) in self.iter() {
            if !ROSTER.contains(&name) {
                ordered.set(name, value);
            }
        }
        *self = ordered;
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Replace an existing tag in place or append a new one.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.0.push((name.to_string(), value.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_order_and_defaults() {
        let tags = Tags::roster();
        let names: Vec<&str> = tags.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ROSTER);
        assert_eq!(tags.get("Result"), Some("*"));
        assert_eq!(tags.get("Round"), Some("-"));
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut tags = Tags::roster();
        tags.set("White", "Kasparov");
        tags.set("Annotator", "me");
        assert_eq!(tags.get("White"), Some("Kasparov"));
        assert_eq!(tags.iter().nth(4).map(|(n, _)| n), Some("White"));
        assert_eq!(tags.len(), 8);
    }

    #[test]
    fn test_complete_roster_reorders() {
        let mut tags = Tags::default();
        tags.set("ECO", "C20");
        tags.set("White", "Carlsen");
        tags.complete_roster();
        let names: Vec<&str> = tags.iter().map(|(n, _)| n).collect();
        assert_eq!(names[..7], ROSTER);
        assert_eq!(names[7], "ECO");
        assert_eq!(tags.get("White"), Some("Carlsen"));
        assert_eq!(tags.get("Event"), Some("?"));
    }

    #[test]
    fn test_side_to_move_from_fen() {
        assert_eq!(Side::to_move(STANDARD_START_FEN), Side::White);
        assert_eq!(
            Side::to_move("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"),
            Side::Black
        );
        assert_eq!(Side::Black.losing_result(), "1-0");
    }
}
