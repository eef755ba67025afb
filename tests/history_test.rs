//! Integration tests: invariants of the move tree and the clocks, checked over
//! whole games rather than single operations.

use std::time::Duration;

use chess_core::{parse_pgn, Clocks, History, RulesOracle, ShakmatyOracle, Side, STANDARD_START_FEN};

const GAME: &str = r#"[Event "Casual"]
[Result "1-0"]

1. e4 e5 2. Nf3 Nc6 (2... d6 3. d4 (3. Bc4 Be7) 3... exd4) (2... Nf6 3. Nxe5)
3. Bb5 {Ruy Lopez} a6 4. Ba4 Nf6 5. O-O Be7 1-0
"#;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replay the first `n` entries of the active line from its base position.
fn replay(history: &History, base: &str, n: usize) -> String {
    let oracle = ShakmatyOracle;
    let mut fen = base.to_string();
    for entry in &history.entries()[..n] {
        fen = oracle.apply(&fen, &entry.move_text).unwrap().fen;
    }
    fen
}

fn parsed() -> History {
    parse_pgn(GAME, &ShakmatyOracle).unwrap().remove(0).history
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_cursor_position_matches_replay() {
    let mut history = parsed();
    let base = history.base_fen().to_string();
    assert_eq!(base, STANDARD_START_FEN);

    for cursor in 0..=history.len() {
        history.set_cursor(cursor);
        assert_eq!(history.fen(), replay(&history, &base, cursor), "cursor {cursor}");
    }
}

#[test]
fn test_variation_positions_match_replay() {
    let mut history = parsed();
    history.set_cursor(4);
    assert!(history.enter_variation());
    assert_eq!(history.depth(), 1);

    let base = history.line_base_fen(history.active()).unwrap().to_string();
    for cursor in 0..=history.len() {
        history.set_cursor(cursor);
        assert_eq!(history.fen(), replay(&history, &base, cursor));
    }
}

#[test]
fn test_enter_and_leave_restore_position_everywhere() {
    let mut history = parsed();

    for cursor in 0..=history.len() {
        history.set_cursor(cursor);
        let fen = history.fen().to_string();
        let flags = history.flags;

        if history.enter_variation() {
            history.navigate(1, chess_core::Step::HalfMove);
            if history.enter_variation() {
                assert_eq!(history.depth(), 2);
                history.leave_variation();
            }
            assert_eq!(history.leave_variation().as_deref(), Some(fen.as_str()));
        }

        assert_eq!(history.depth(), 0);
        assert_eq!(history.cursor(), cursor);
        assert_eq!(history.fen(), fen);
        assert_eq!(history.flags, flags);
    }
}

#[test]
fn test_navigation_stays_in_bounds() {
    let mut history = parsed();
    let len = history.len();
    for delta in [-100, -3, -1, 0, 1, 2, 7, 100] {
        history.navigate(delta, chess_core::Step::FullMove);
        assert!(history.cursor() <= len);
    }
    history.navigate(-100, chess_core::Step::HalfMove);
    assert_eq!(history.cursor(), 0);
    history.navigate(100, chess_core::Step::HalfMove);
    assert_eq!(history.cursor(), len);
}

#[test]
fn test_write_and_parse_preserve_tree() {
    let games = parse_pgn(GAME, &ShakmatyOracle).unwrap();
    let text = chess_core::write_games(games.iter().map(|g| (&g.tags, &g.history)));
    let again = parse_pgn(&text, &ShakmatyOracle).unwrap();

    assert_eq!(again.len(), 1);
    assert_eq!(again[0].history.entries(), games[0].history.entries());
    assert_eq!(again[0].tags.get("Result"), Some("1-0"));
}

#[test]
fn test_clock_time_is_conserved_across_ticks() {
    let mut clocks = Clocks::default();
    clocks.set_spec("10m").unwrap();

    let mut charged = Duration::ZERO;
    for ms in [150u64, 999, 1, 2500, 333, 17] {
        let delta = Duration::from_millis(ms);
        assert!(clocks.tick(Side::White, delta).is_none());
        charged += delta;
    }

    let elapsed = clocks.get(Side::White).elapsed();
    assert_eq!(elapsed.secs, charged.as_secs());
    assert_eq!(elapsed.micros, charged.subsec_micros());
    assert_eq!(clocks.get(Side::Black).elapsed().secs, 0);
}

#[test]
fn test_clock_flags_exactly_once() {
    let mut clocks = Clocks::default();
    clocks.set_spec("3s").unwrap();

    let forfeits: Vec<_> = (0..10)
        .filter_map(|_| clocks.tick(Side::Black, Duration::from_millis(500)))
        .collect();
    assert_eq!(forfeits.len(), 1);
    assert_eq!(forfeits[0].loser, Side::Black);
    assert_eq!(forfeits[0].result(), "1-0");
}
