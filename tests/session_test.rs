//! Integration tests: drive the event loop with scripted input lines.

mod common;

use common::{moves, session, temp_dir, RecordingRenderer};
use session::{run, Config, Mode, TextRenderer};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Send `lines` and close the input, so the loop ends once they are handled.
fn script(lines: &[&str]) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(lines.len().max(1));
    for line in lines {
        tx.try_send(line.to_string()).unwrap();
    }
    rx
}

fn quiet() -> Config {
    Config {
        exit_prompt: false,
        delete_prompt: false,
        ..Config::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scripted_human_game() {
    let (mut state, engines) = session(quiet());
    let mut renderer = RecordingRenderer::default();

    let input = script(&["h", ":move e4", "me5<enter>", ":move Nf3", "u"]);
    run(&mut state, input, &mut renderer).await.unwrap();

    assert_eq!(engines.count(), 0);
    assert_eq!(moves(&state), ["e4"]);

    let last = renderer.frames.last().unwrap();
    assert_eq!(last.history.len(), 1);
    assert!(last.flags.human);
    assert_eq!(last.mode, Mode::Play);
}

#[tokio::test]
async fn test_quit_stops_before_remaining_input() {
    let (mut state, _) = session(Config::default());
    let mut renderer = RecordingRenderer::default();

    let input = script(&["^n", "Q", "y", "^n"]);
    run(&mut state, input, &mut renderer).await.unwrap();

    assert!(state.quit);
    assert_eq!(state.games.len(), 2);
}

#[tokio::test]
async fn test_several_games_are_independent() {
    let (mut state, _) = session(quiet());
    let mut renderer = RecordingRenderer::default();

    let input = script(&[
        "h",
        ":move d4",
        "^n",
        "h",
        ":move c4",
        ":move e5",
        "<",
    ]);
    run(&mut state, input, &mut renderer).await.unwrap();

    assert_eq!(state.current, 0);
    assert_eq!(moves(&state), ["d4"]);
    assert_eq!(state.games[1].history.len(), 2);

    let last = renderer.frames.last().unwrap();
    assert_eq!((last.game, last.total), (1, 2));
}

#[tokio::test]
async fn test_prompts_and_notifications_reach_renderer() {
    let (mut state, _) = session(Config::default());
    let mut renderer = RecordingRenderer::default();

    let input = script(&["^d", "^n", "^d"]);
    run(&mut state, input, &mut renderer).await.unwrap();

    assert!(renderer
        .frames
        .iter()
        .any(|f| f.notify.as_deref() == Some("Cannot delete last game.")));
    let last = renderer.frames.last().unwrap();
    assert_eq!(last.prompt.as_deref(), Some("Delete the current game? [y/n]"));
}

#[tokio::test]
async fn test_load_browse_and_save_round_trip() {
    let dir = temp_dir("roundtrip");
    std::fs::create_dir_all(&dir).unwrap();
    let source = dir.join("source.pgn");
    std::fs::write(
        &source,
        "[Event \"Club\"]\n[Result \"*\"]\n\n1. e4 c5 2. Nf3 (2. c3 d5) 2... d6 *\n",
    )
    .unwrap();

    let (mut state, _) = session(Config {
        save_dir: Some(dir.clone()),
        ..quiet()
    });
    let mut renderer = RecordingRenderer::default();

    let load = format!(":load {}", source.display());
    let input = script(&[
        &load,
        "t",
        "<left>",
        "+",
        ":annotate $2 dubious",
        "-",
        ":save copy",
    ]);
    run(&mut state, input, &mut renderer).await.unwrap();

    assert_eq!(state.game().mode, Mode::History);
    assert_eq!(state.game().history.depth(), 0);
    assert_eq!(state.notify.as_deref(), Some("Game saved."));

    let saved = std::fs::read_to_string(dir.join("copy.pgn")).unwrap();
    assert!(saved.contains("[Event \"Club\"]"));
    assert!(saved.contains("(2. c3 $2 {dubious} 2... d5)"), "{saved}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_text_renderer_draws_board() {
    let (mut state, _) = session(quiet());
    let mut renderer = TextRenderer::new(Vec::new());

    let input = script(&["h", ":move e4"]);
    run(&mut state, input, &mut renderer).await.unwrap();

    let out = String::from_utf8(renderer.into_inner()).unwrap();
    assert!(out.contains("Game 1/1 [play]"));
    assert!(out.contains("1. e4"));
}
