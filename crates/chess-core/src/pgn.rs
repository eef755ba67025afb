//! PGN reading and writing: a lightweight regex tokenizer over the movetext,
//! with every move checked by the rules oracle.

use regex::Regex;
use tracing::debug;

use crate::error::PgnError;
use crate::game_data::{round_of, Side, Tags, STANDARD_START_FEN};
use crate::history::{Entry, History, LineId, MAX_NAGS};
use crate::rules::RulesOracle;

const TOKEN_PATTERN: &str = concat!(
    r#"\[\s*(?P<tag>\w+)\s+"(?P<value>(?:[^"\\]|\\.)*)"\s*\]"#,
    r"|\{(?P<comment>[^}]*)\}",
    r"|;(?P<line_comment>[^\n]*)",
    r"|(?P<open>\()",
    r"|(?P<close>\))",
    r"|\$(?P<nag>\d+)",
    r"|(?P<result>1-0|0-1|1/2-1/2|\*)",
    r"|(?P<number>\d+\.+)",
    r"|(?P<san>[^\s(){}\[\];$]+)",
);

const WRAP_COLUMN: usize = 80;

/// One game read from a PGN file.
#[derive(Debug, Clone)]
pub struct PgnGame {
    pub tags: Tags,
    pub history: History,
}

/// Parse every game in `text`. The history cursor of each game is left at the
/// end of its main line.
pub fn parse_pgn(text: &str, oracle: &impl RulesOracle) -> Result<Vec<PgnGame>, PgnError> {
    let re = Regex::new(TOKEN_PATTERN)?;
    let mut games = Vec::new();
    let mut builder = GameBuilder::default();

    for cap in re.captures_iter(text) {
        if let (Some(name), Some(value)) = (cap.name("tag"), cap.name("value")) {
            if builder.history.is_some() {
                games.push(builder.finish(games.len())?);
            }
            builder.tags.set(name.as_str(), &unescape(value.as_str()));
            continue;
        }

        let n = games.len();
        if let Some(comment) = cap.name("comment").or_else(|| cap.name("line_comment")) {
            builder.history(oracle, n)?;
            builder.add_comment(comment.as_str().trim());
        } else if cap.name("open").is_some() {
            builder.history(oracle, n)?;
            builder.open_variation();
        } else if cap.name("close").is_some() {
            builder.close_variation(n)?;
        } else if let Some(nag) = cap.name("nag") {
            builder.history(oracle, n)?;
            if let Ok(nag) = nag.as_str().parse::<u8>() {
                builder.add_nags(&[nag]);
            }
        } else if let Some(result) = cap.name("result") {
            builder.history(oracle, n)?;
            if builder.stack.is_empty() {
                if matches!(builder.tags.get("Result"), None | Some("*")) {
                    builder.tags.set("Result", result.as_str());
                }
                games.push(builder.finish(n)?);
            }
        } else if let Some(san) = cap.name("san") {
            builder.history(oracle, n)?;
            builder.add_move(oracle, san.as_str())?;
        }
    }

    if builder.history.is_some() || !builder.tags.is_empty() {
        let n = games.len();
        builder.history(oracle, n)?;
        games.push(builder.finish(n)?);
    }

    if games.is_empty() {
        return Err(PgnError::Empty);
    }
    debug!(games = games.len(), "Parsed PGN");
    Ok(games)
}

#[derive(Default)]
struct GameBuilder {
    tags: Tags,
    history: Option<History>,
    line: Option<LineId>,
    stack: Vec<LineId>,
}

impl GameBuilder {
    /// Start the move tree on first use, once the `FEN` tag (if any) is known.
    fn history(&mut self, oracle: &impl RulesOracle, game: usize) -> Result<&mut History, PgnError> {
        if self.history.is_none() {
            let start = match self.tags.get("FEN") {
                Some(fen) => oracle
                    .validate_fen(fen)
                    .map_err(|source| PgnError::Fen { game, source })?,
                None => STANDARD_START_FEN.to_string(),
            };
            self.line = Some(LineId::MAIN);
            self.history = Some(History::new(&start));
        }
        Ok(self
            .history
            .get_or_insert_with(|| History::new(STANDARD_START_FEN)))
    }

    fn current(&self) -> LineId {
        self.line.unwrap_or(LineId::MAIN)
    }

    /// Position at the end of the line being built.
    fn position(&self) -> String {
        let Some(history) = &self.history else {
            return STANDARD_START_FEN.to_string();
        };
        let line = self.current();
        match history.line_entries(line).last() {
            Some(entry) => entry.fen.clone(),
            None => history
                .line_base_fen(line)
                .unwrap_or(STANDARD_START_FEN)
                .to_string(),
        }
    }

    fn add_move(&mut self, oracle: &impl RulesOracle, token: &str) -> Result<(), PgnError> {
        let (text, nag) = split_suffix(token);
        if text.is_empty() {
            return Ok(());
        }

        let fen = self.position();
        let applied = oracle.apply(&fen, text).map_err(|source| PgnError::Move {
            round: round_of(&fen),
            move_text: text.to_string(),
            source,
        })?;

        let line = self.current();
        if let Some(history) = self.history.as_mut() {
            let _ = history.push_to(line, Entry::new(applied.san, applied.fen));
        }
        if let Some(nag) = nag {
            self.add_nags(&[nag]);
        }
        Ok(())
    }

    fn last_index(&self) -> Option<usize> {
        let history = self.history.as_ref()?;
        history.line_entries(self.current()).len().checked_sub(1)
    }

    fn add_comment(&mut self, text: &str) {
        let (Some(idx), line) = (self.last_index(), self.current()) else {
            return;
        };
        let Some(history) = self.history.as_mut() else {
            return;
        };
        let entry = &history.line_entries(line)[idx];
        let comment = match &entry.comment {
            Some(prev) => format!("{prev} {text}"),
            None => text.to_string(),
        };
        let nags = entry.nags.clone();
        let _ = history.annotate_in(line, idx, Some(comment), &nags);
    }

    fn add_nags(&mut self, extra: &[u8]) {
        let (Some(idx), line) = (self.last_index(), self.current()) else {
            return;
        };
        let Some(history) = self.history.as_mut() else {
            return;
        };
        let entry = &history.line_entries(line)[idx];
        let comment = entry.comment.clone();
        let mut nags = entry.nags.clone();
        for &nag in extra {
            if nag != 0 && !nags.contains(&nag) && nags.len() < MAX_NAGS {
                nags.push(nag);
            }
        }
        let _ = history.annotate_in(line, idx, comment, &nags);
    }

    /// The variation replaces the last move of the current line.
    fn open_variation(&mut self) {
        let line = self.current();
        let Some(idx) = self.last_index() else {
            return;
        };
        let Some(history) = self.history.as_mut() else {
            return;
        };
        if let Ok(id) = history.add_variation(line, idx) {
            self.stack.push(line);
            self.line = Some(id);
        }
    }

    fn close_variation(&mut self, game: usize) -> Result<(), PgnError> {
        let parent = self.stack.pop().ok_or(PgnError::Unbalanced(game))?;
        self.line = Some(parent);
        Ok(())
    }

    fn finish(&mut self, game: usize) -> Result<PgnGame, PgnError> {
        if !self.stack.is_empty() {
            return Err(PgnError::Unbalanced(game));
        }

        let mut builder = std::mem::take(self);
        let mut history = match builder.history.take() {
            Some(h) => h,
            None => History::new(builder.tags.get("FEN").unwrap_or(STANDARD_START_FEN)),
        };
        history.set_cursor(history.len());
        builder.tags.complete_roster();

        Ok(PgnGame {
            tags: builder.tags,
            history,
        })
    }
}

/// Split `!`/`?` move suffixes into a NAG.
fn split_suffix(token: &str) -> (&str, Option<u8>) {
    let text = token.trim_end_matches(['!', '?']);
    let nag = match &token[text.len()..] {
        "!" => Some(1),
        "?" => Some(2),
        "!!" => Some(3),
        "??" => Some(4),
        "!?" => Some(5),
        "?!" => Some(6),
        _ => None,
    };
    (text, nag)
}

fn unescape(value: &str) -> String {
    value.replace("\\\"", "\"").replace("\\\\", "\\")
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Write one game: tags, a blank line, wrapped movetext and the result.
pub fn write_game(tags: &Tags, history: &History) -> String {
    let mut out = String::new();

    for (name, value) in tags.iter() {
        out.push_str(&format!("[{name} \"{}\"]\n", escape(value)));
    }

    let base = history.line_base_fen(LineId::MAIN).unwrap_or(STANDARD_START_FEN);
    if base != STANDARD_START_FEN && tags.get("FEN").is_none() {
        out.push_str("[SetUp \"1\"]\n");
        out.push_str(&format!("[FEN \"{}\"]\n", escape(base)));
    }
    out.push('\n');

    let mut tokens = Vec::new();
    write_line(history, LineId::MAIN, false, &mut tokens);
    tokens.push(tags.get("Result").unwrap_or("*").to_string());

    out.push_str(&wrap(&tokens));
    out.push_str("\n\n");
    out
}

/// Serialize several games into one file body.
pub fn write_games<'a>(games: impl IntoIterator<Item = (&'a Tags, &'a History)>) -> String {
    games
        .into_iter()
        .map(|(tags, history)| write_game(tags, history))
        .collect()
}

/// Emit the movetext of `line`. When `sibling_head` is set, the first entry's
/// variation is written by the caller as a sibling rather than nested.
fn write_line(history: &History, line: LineId, sibling_head: bool, tokens: &mut Vec<String>) {
    let mut fen = history
        .line_base_fen(line)
        .unwrap_or(STANDARD_START_FEN)
        .to_string();
    let mut need_number = true;

    for (i, entry) in history.line_entries(line).iter().enumerate() {
        let round = round_of(&fen);
        match Side::to_move(&fen) {
            Side::White => tokens.push(format!("{round}.")),
            Side::Black if need_number => tokens.push(format!("{round}...")),
            Side::Black => {}
        }
        need_number = false;

        tokens.push(entry.move_text.clone());
        tokens.extend(entry.nags.iter().map(|n| format!("${n}")));

        if let Some(comment) = &entry.comment {
            tokens.push(format!("{{{comment}}}"));
            need_number = true;
        }

        let mut variation = if sibling_head && i == 0 {
            None
        } else {
            entry.variation
        };
        while let Some(id) = variation {
            let mut inner = Vec::new();
            write_line(history, id, true, &mut inner);
            if let Some(first) = inner.first_mut() {
                first.insert(0, '(');
            }
            if let Some(last) = inner.last_mut() {
                last.push(')');
            }
            tokens.extend(inner);
            need_number = true;
            variation = history.line_entries(id).first().and_then(|e| e.variation);
        }

        fen = entry.fen.clone();
    }
}

fn wrap(tokens: &[String]) -> String {
    let mut out = String::new();
    let mut width = 0;

    for token in tokens {
        if width > 0 && width + 1 + token.len() > WRAP_COLUMN {
            out.push('\n');
            width = 0;
        } else if width > 0 {
            out.push(' ');
            width += 1;
        }
        out.push_str(token);
        width += token.len();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ShakmatyOracle;

    const TWO_GAMES: &str = r#"[Event "Casual"]
[White "Player1"]
[Black "Player2"]
[Result "1-0"]

1. e4 e5 {open game} 2. Nf3!? (2. Bc4 Nf6) (2. f4) 2... Nc6 $14 3. Bb5 1-0

[Event "Second"]
[Result "*"]

1. d4 d5 *
"#;

    #[test]
    fn test_parse_multiple_games() {
        let games = parse_pgn(TWO_GAMES, &ShakmatyOracle).unwrap();
        assert_eq!(games.len(), 2);

        let first = &games[0];
        assert_eq!(first.tags.get("White"), Some("Player1"));
        assert_eq!(first.history.len(), 5);
        assert!(first.history.is_at_end());

        let entries = first.history.entries();
        assert_eq!(entries[1].comment.as_deref(), Some("open game"));
        assert_eq!(entries[2].nags, vec![5]);
        assert_eq!(entries[3].nags, vec![14]);

        assert_eq!(games[1].tags.get("Event"), Some("Second"));
        assert_eq!(games[1].history.len(), 2);
    }

    #[test]
    fn test_parse_sibling_variations_chain() {
        let games = parse_pgn(TWO_GAMES, &ShakmatyOracle).unwrap();
        let h = &games[0].history;

        let first = h.entries()[2].variation.unwrap();
        let moves: Vec<&str> = h.line_entries(first).iter().map(|e| e.move_text.as_str()).collect();
        assert_eq!(moves, ["Bc4", "Nf6"]);

        let second = h.line_entries(first)[0].variation.unwrap();
        assert_eq!(h.line_entries(second)[0].move_text, "f4");
        assert_eq!(h.line_base_fen(second), h.line_base_fen(first));
    }

    #[test]
    fn test_parse_reports_round_of_bad_move() {
        let err = parse_pgn("1. e4 e5 2. Nf3 Nc6 3. Qh9 *", &ShakmatyOracle).unwrap_err();
        match err {
            PgnError::Move { round, move_text, .. } => {
                assert_eq!(round, 3);
                assert_eq!(move_text, "Qh9");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_rejects_unbalanced() {
        assert!(matches!(
            parse_pgn("1. e4 (1. d4 e5 *", &ShakmatyOracle),
            Err(PgnError::Unbalanced(0))
        ));
        assert!(matches!(parse_pgn("   ", &ShakmatyOracle), Err(PgnError::Empty)));
    }

    #[test]
    fn test_parse_with_fen_tag() {
        let pgn = r#"[FEN "4k3/8/8/8/8/8/4P3/4K3 b - - 0 40"]

40... Kd7 41. e4 *"#;
        let games = parse_pgn(pgn, &ShakmatyOracle).unwrap();
        assert_eq!(games[0].history.len(), 2);
        assert_eq!(games[0].tags.iter().next().map(|(n, _)| n), Some("Event"));
    }

    #[test]
    fn test_write_reparses_to_same_tree() {
        let games = parse_pgn(TWO_GAMES, &ShakmatyOracle).unwrap();
        let text = write_game(&games[0].tags, &games[0].history);

        assert!(text.starts_with("[Event \"Casual\"]\n"));
        assert!(text.contains("1. e4 e5 {open game} 2. Nf3 $5 (2. Bc4 Nf6) (2. f4) 2... Nc6 $14 3. Bb5 1-0"));

        let again = parse_pgn(&text, &ShakmatyOracle).unwrap();
        assert_eq!(again[0].history.entries(), games[0].history.entries());
    }

    #[test]
    fn test_write_wraps_long_movetext() {
        let mut history = History::new(STANDARD_START_FEN);
        let oracle = ShakmatyOracle;
        for _ in 0..20 {
            for mv in ["Nf3", "Nf6", "Ng1", "Ng8"] {
                let applied = oracle.apply(history.fen(), mv).unwrap();
                history.append(applied.san, applied.fen);
            }
        }
        let text = write_game(&Tags::roster(), &history);
        let movetext = text.split("\n\n").nth(1).unwrap();
        assert!(movetext.lines().count() > 1);
        assert!(movetext.lines().all(|l| l.len() <= WRAP_COLUMN));
    }

    #[test]
    fn test_split_suffix() {
        assert_eq!(split_suffix("Nf3!?"), ("Nf3", Some(5)));
        assert_eq!(split_suffix("e4"), ("e4", None));
        assert_eq!(split_suffix("Qxf7??"), ("Qxf7", Some(4)));
    }
}
