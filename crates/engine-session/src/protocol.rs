//! Recognizer for the few engine output lines that drive the session state.
//! Everything else the engine prints is payload and only lands in the log.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLine {
    /// The engine played a move.
    MoveMade(String),
    /// Initialization finished.
    Ready,
    /// The engine rejected something; the whole line is kept.
    Error(String),
}

/// Classify one output line (without terminator).
pub fn classify(line: &str) -> Option<ControlLine> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let first = words.next()?;

    match first {
        "move" | "bestmove" => {
            return words
                .next()
                .filter(|mv| *mv != "(none)")
                .map(|mv| ControlLine::MoveMade(mv.to_string()));
        }
        "readyok" | "uciok" => return Some(ControlLine::Ready),
        _ => {}
    }

    if let Some(rest) = line.strip_prefix("My move is") {
        let mv = rest.trim_start_matches([' ', ':']).split_whitespace().next()?;
        return Some(ControlLine::MoveMade(mv.to_string()));
    }

    if line.starts_with("Error") || line.starts_with("Illegal move") {
        return Some(ControlLine::Error(line.to_string()));
    }

    if first == "feature" && words.any(|w| w == "done=1") {
        return Some(ControlLine::Ready);
    }

    None
}
