#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use engine_session::testing::FakeTransport;
use engine_session::{EngineError, Transport};
use session::{Config, EngineFactory, Renderer, SessionState, Snapshot};
use tokio::sync::Notify;

/// Engine factory handing out in-memory transports. Clones share the list of
/// spawned engines, so a test keeps one while the session owns another.
#[derive(Clone, Default)]
pub struct FakeEngines {
    spawned: Arc<Mutex<Vec<FakeTransport>>>,
}

impl FakeEngines {
    pub fn count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn get(&self, i: usize) -> FakeTransport {
        self.spawned.lock().unwrap()[i].clone()
    }
}

impl EngineFactory for FakeEngines {
    fn spawn(&mut self, _notify: Arc<Notify>) -> Result<Box<dyn Transport>, EngineError> {
        let fake = FakeTransport::new();
        self.spawned.lock().unwrap().push(fake.clone());
        Ok(Box::new(fake))
    }
}

/// Keeps every snapshot it is asked to draw.
#[derive(Default)]
pub struct RecordingRenderer {
    pub frames: Vec<Snapshot>,
}

impl Renderer for RecordingRenderer {
    fn refresh(&mut self, snapshot: &Snapshot) {
        self.frames.push(snapshot.clone());
    }
}

pub fn session(config: Config) -> (SessionState, FakeEngines) {
    let engines = FakeEngines::default();
    let state = SessionState::new(config, Box::new(engines.clone())).expect("valid config");
    (state, engines)
}

/// Handle one input line and every key it queues.
pub fn feed(state: &mut SessionState, line: &str) {
    state.handle_line(line);
    while let Some(key) = state.next_key() {
        state.dispatch_key(key);
    }
}

pub fn moves(state: &SessionState) -> Vec<String> {
    state
        .game()
        .history
        .entries()
        .iter()
        .map(|e| e.move_text.clone())
        .collect()
}

/// Fresh per-process scratch directory.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("chess-session-it-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}
