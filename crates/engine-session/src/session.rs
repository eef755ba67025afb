//! Engine session state machine.
//!
//! ```text
//! Offline <- Initializing -> Ready <-> Thinking -> Offline
//! ```
//!
//! Commands wait in a FIFO queue. A command may require a status before it is
//! written (`requires`) and may move the session into a status once written
//! (`enters`). Output is framed into lines and checked for control lines.

use std::collections::VecDeque;
use std::io;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::protocol::{classify, ControlLine};
use crate::transport::Transport;

/// Lines kept in the I/O log.
pub const LOG_LINES: usize = 200;

const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineStatus {
    Offline,
    Initializing,
    Ready,
    Thinking,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineStatus::Offline => "offline",
            EngineStatus::Initializing => "initializing",
            EngineStatus::Ready => "ready",
            EngineStatus::Thinking => "thinking",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub line: String,
    pub requires: Option<EngineStatus>,
    pub enters: Option<EngineStatus>,
}

impl EngineCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            requires: None,
            enters: None,
        }
    }

    pub fn requires(mut self, status: EngineStatus) -> Self {
        self.requires = Some(status);
        self
    }

    pub fn enters(mut self, status: EngineStatus) -> Self {
        self.enters = Some(status);
        self
    }
}

/// Something the game layer has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    MoveMade(String),
    Ready,
    Error(String),
}

pub struct EngineSession {
    transport: Box<dyn Transport>,
    status: EngineStatus,
    buffer: Vec<u8>,
    queue: VecDeque<EngineCommand>,
    log: VecDeque<String>,
    quit_command: String,
}

impl EngineSession {
    /// Wrap a freshly opened transport. The session stays `Initializing`
    /// until the engine reports it is ready.
    pub fn new(transport: Box<dyn Transport>, quit_command: impl Into<String>) -> Self {
        Self {
            transport,
            status: EngineStatus::Initializing,
            buffer: Vec::new(),
            queue: VecDeque::new(),
            log: VecDeque::new(),
            quit_command: quit_command.into(),
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    /// Force a status, e.g. when the user takes the engine off a move.
    pub fn set_status(&mut self, status: EngineStatus) {
        if self.status != EngineStatus::Offline {
            self.status = status;
        }
    }

    pub fn is_offline(&self) -> bool {
        self.status == EngineStatus::Offline
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn log(&self) -> impl Iterator<Item = &str> {
        self.log.iter().map(String::as_str)
    }

    fn record(&mut self, line: String) {
        if self.log.len() == LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(line);
    }

    /// Queue `line`, held back until the session reaches `required` if given.
    pub fn enqueue(&mut self, line: impl Into<String>, required: Option<EngineStatus>) {
        let mut cmd = EngineCommand::new(line);
        cmd.requires = required;
        self.enqueue_command(cmd);
    }

    pub fn enqueue_command(&mut self, cmd: EngineCommand) {
        if self.is_offline() {
            debug!(line = %cmd.line, "Engine offline, command dropped");
            return;
        }
        self.queue.push_back(cmd);
    }

    /// Drop queued commands that are still held for a status. Unconditional
    /// commands (initialization) stay queued. Returns the number dropped.
    pub fn discard_held(&mut self) -> usize {
        let before = self.queue.len();
        self.queue.retain(|cmd| cmd.requires.is_none());
        let dropped = before - self.queue.len();
        if dropped > 0 {
            debug!(dropped, "Discarded held engine commands");
        }
        dropped
    }

    /// Write queued commands in order while the transport accepts them and
    /// the head's status requirement holds. Returns the number written.
    pub fn drain_writable(&mut self) -> Result<usize, EngineError> {
        let mut written = 0;

        while !self.is_offline() && self.transport.writable() {
            let Some(head) = self.queue.front() else {
                break;
            };
            if head.requires.is_some_and(|s| s != self.status) {
                break;
            }

            if let Err(e) = self.transport.write_line(&head.line) {
                self.go_offline();
                return Err(e.into());
            }

            let Some(cmd) = self.queue.pop_front() else {
                break;
            };
            debug!(line = %cmd.line, "engine <");
            if let Some(status) = cmd.enters {
                self.status = status;
            }
            self.record(format!("> {}", cmd.line));
            written += 1;
        }

        Ok(written)
    }

    /// Read everything the transport has and process it. End-of-file and read
    /// errors take the session offline.
    pub fn poll_readable(&mut self) -> Result<Vec<EngineEvent>, EngineError> {
        let mut events = Vec::new();
        let mut buf = [0u8; READ_CHUNK];

        while !self.is_offline() {
            match self.transport.read(&mut buf) {
                Ok(0) => {
                    info!("Engine closed its output");
                    self.go_offline();
                    return Err(EngineError::Closed);
                }
                Ok(n) => events.extend(self.on_readable(&buf[..n])),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "Engine read failed");
                    self.go_offline();
                    return Err(e.into());
                }
            }
        }

        Ok(events)
    }

    /// Accumulate output. Once the buffer ends with a line terminator every
    /// buffered line is handled and the buffer is cleared.
    pub fn on_readable(&mut self, bytes: &[u8]) -> Vec<EngineEvent> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.last() != Some(&b'\n') {
            return Vec::new();
        }

        let text = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();

        let mut events = Vec::new();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            debug!(line, "engine >");
            self.record(format!("< {line}"));

            let event = match classify(line) {
                Some(ControlLine::MoveMade(mv)) => {
                    if self.status == EngineStatus::Thinking {
                        self.status = EngineStatus::Ready;
                    }
                    EngineEvent::MoveMade(mv)
                }
                Some(ControlLine::Ready) => {
                    if self.status == EngineStatus::Initializing {
                        self.status = EngineStatus::Ready;
                    }
                    EngineEvent::Ready
                }
                Some(ControlLine::Error(msg)) => {
                    if self.status == EngineStatus::Thinking {
                        self.status = EngineStatus::Ready;
                    }
                    EngineEvent::Error(msg)
                }
                None => continue,
            };
            events.push(event);
        }

        events
    }

    /// Say goodbye if the engine is idle, then close the transport.
    pub fn shutdown(&mut self) {
        if self.status == EngineStatus::Ready && self.transport.writable() {
            let quit = self.quit_command.clone();
            if let Err(e) = self.transport.write_line(&quit) {
                warn!(error = %e, "Failed to send quit command");
            }
        }
        self.go_offline();
    }

    fn go_offline(&mut self) {
        if !self.queue.is_empty() {
            debug!(dropped = self.queue.len(), "Dropping queued engine commands");
        }
        self.queue.clear();
        self.buffer.clear();
        self.status = EngineStatus::Offline;
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;

    fn session() -> (EngineSession, FakeTransport) {
        let fake = FakeTransport::new();
        (EngineSession::new(Box::new(fake.clone()), "quit"), fake)
    }

    #[test]
    fn test_held_command_waits_for_status() {
        let (mut s, fake) = session();
        s.enqueue("xboard", None);
        s.enqueue_command(
            EngineCommand::new("e2e4")
                .requires(EngineStatus::Ready)
                .enters(EngineStatus::Thinking),
        );
        s.enqueue("post", None);

        assert_eq!(s.drain_writable().unwrap(), 1);
        assert_eq!(fake.written(), ["xboard"]);
        assert_eq!(s.queued(), 2);

        s.on_readable(b"feature done=1\n");
        assert_eq!(s.status(), EngineStatus::Ready);

        assert_eq!(s.drain_writable().unwrap(), 2);
        assert_eq!(fake.written(), ["xboard", "e2e4", "post"]);
        assert_eq!(s.status(), EngineStatus::Thinking);
    }

    #[test]
    fn test_discard_held_keeps_unconditional_commands() {
        let (mut s, fake) = session();
        s.enqueue("xboard", None);
        s.enqueue_command(
            EngineCommand::new("e2e4")
                .requires(EngineStatus::Ready)
                .enters(EngineStatus::Thinking),
        );
        s.enqueue("protover 2", None);

        assert_eq!(s.discard_held(), 1);
        assert_eq!(s.queued(), 2);

        s.on_readable(b"feature done=1\n");
        assert_eq!(s.drain_writable().unwrap(), 2);
        assert_eq!(fake.written(), ["xboard", "protover 2"]);
        assert_eq!(s.status(), EngineStatus::Ready);
    }

    #[test]
    fn test_partial_lines_persist() {
        let (mut s, _fake) = session();
        s.set_status(EngineStatus::Thinking);

        assert!(s.on_readable(b"move e7").is_empty());
        assert_eq!(s.status(), EngineStatus::Thinking);

        let events = s.on_readable(b"e5\nthinking...\n");
        assert_eq!(events, vec![EngineEvent::MoveMade("e7e5".into())]);
        assert_eq!(s.status(), EngineStatus::Ready);
        assert_eq!(s.log().collect::<Vec<_>>(), ["< move e7e5", "< thinking..."]);
    }

    #[test]
    fn test_write_error_drops_queue() {
        let (mut s, fake) = session();
        fake.fail_writes();
        s.enqueue("new", None);
        s.enqueue("go", None);

        assert!(matches!(s.drain_writable(), Err(EngineError::Transport(_))));
        assert_eq!(s.status(), EngineStatus::Offline);
        assert_eq!(s.queued(), 0);
        assert!(fake.is_closed());

        s.enqueue("go", None);
        assert_eq!(s.queued(), 0);
    }

    #[test]
    fn test_not_writable_holds_queue() {
        let (mut s, fake) = session();
        fake.set_writable(false);
        s.enqueue("new", None);
        assert_eq!(s.drain_writable().unwrap(), 0);
        assert_eq!(s.queued(), 1);

        fake.set_writable(true);
        assert_eq!(s.drain_writable().unwrap(), 1);
    }

    #[test]
    fn test_poll_reads_until_would_block() {
        let (mut s, fake) = session();
        fake.push_output("feature ");
        fake.push_output("done=1\n");
        assert_eq!(s.poll_readable().unwrap(), vec![EngineEvent::Ready]);
        assert_eq!(s.poll_readable().unwrap(), vec![]);
    }

    #[test]
    fn test_eof_goes_offline() {
        let (mut s, fake) = session();
        s.enqueue_command(EngineCommand::new("go").requires(EngineStatus::Ready));
        fake.hang_up();

        assert!(matches!(s.poll_readable(), Err(EngineError::Closed)));
        assert!(s.is_offline());
        assert_eq!(s.queued(), 0);
        assert!(fake.is_closed());
    }

    #[test]
    fn test_read_error_goes_offline() {
        let (mut s, fake) = session();
        fake.fail_reads(io::ErrorKind::BrokenPipe);
        assert!(matches!(s.poll_readable(), Err(EngineError::Transport(_))));
        assert!(s.is_offline());
    }

    #[test]
    fn test_shutdown_sends_quit_only_when_ready() {
        let (mut s, fake) = session();
        s.shutdown();
        assert!(fake.written().is_empty());
        assert!(fake.is_closed());

        let (mut s, fake) = session();
        s.on_readable(b"readyok\n");
        s.shutdown();
        assert_eq!(fake.written(), ["quit"]);
        assert!(s.is_offline());
    }

    #[test]
    fn test_log_is_bounded() {
        let (mut s, _fake) = session();
        for i in 0..LOG_LINES + 10 {
            s.on_readable(format!("line {i}\n").as_bytes());
        }
        let log: Vec<&str> = s.log().collect();
        assert_eq!(log.len(), LOG_LINES);
        assert_eq!(log[0], "< line 10");
    }
}
