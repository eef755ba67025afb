//! In-memory transport for exercising sessions without a real engine.
//!
//! Clones share state, so a test keeps one handle while the session owns
//! another.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::transport::Transport;

#[derive(Default)]
struct FakeState {
    output: VecDeque<Vec<u8>>,
    written: Vec<String>,
    not_writable: bool,
    fail_writes: bool,
    fail_reads: Option<io::ErrorKind>,
    eof: bool,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `text` available to the next read, as one chunk.
    pub fn push_output(&self, text: &str) {
        self.state().output.push_back(text.as_bytes().to_vec());
    }

    /// Lines written so far, without terminators.
    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }

    pub fn set_writable(&self, writable: bool) {
        self.state().not_writable = !writable;
    }

    pub fn fail_writes(&self) {
        self.state().fail_writes = true;
    }

    pub fn fail_reads(&self, kind: io::ErrorKind) {
        self.state().fail_reads = Some(kind);
    }

    /// End-of-file once the pending output is consumed.
    pub fn hang_up(&self) {
        self.state().eof = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl Transport for FakeTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if let Some(kind) = state.fail_reads {
            return Err(kind.into());
        }

        match state.output.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.output.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None if state.eof => Ok(0),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        state.written.push(line.to_string());
        Ok(())
    }

    fn writable(&self) -> bool {
        let state = self.state();
        !state.not_writable && !state.closed
    }

    fn close(&mut self) {
        self.state().closed = true;
    }
}
