//! Byte transport to an engine process.
//!
//! The session logic is synchronous and never blocks: reads report
//! `WouldBlock` when nothing has arrived yet. [`ProcessTransport`] bridges the
//! child's async pipes to that model with one reader and one writer task, and
//! pokes a shared [`Notify`] whenever there is something to read.

use std::collections::VecDeque;
use std::io;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::error::EngineError;

pub trait Transport: Send {
    /// Copy available bytes into `buf`. `Ok(0)` is end-of-file; an error of
    /// kind `WouldBlock` means nothing is available right now.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Queue one complete line (without terminator) for the engine.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    fn writable(&self) -> bool;

    /// Stop writing and reap the process without blocking.
    fn close(&mut self);
}

enum Inbound {
    Data(Vec<u8>),
    Eof,
    Failed(io::Error),
}

pub struct ProcessTransport {
    child: Child,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    pending: VecDeque<u8>,
    eof: bool,
}

impl ProcessTransport {
    /// Spawn `command` (program and whitespace-separated arguments). Must be
    /// called from within a tokio runtime.
    pub fn spawn(command: &str, notify: Arc<Notify>) -> Result<Self, EngineError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(EngineError::EmptyCommand)?;

        let spawn_err = |source: io::Error| EngineError::Spawn {
            command: command.to_string(),
            source,
        };

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(spawn_err)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err(io::Error::other("stdin not captured")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err(io::Error::other("stdout not captured")))?;

        debug!(command, pid = ?child.id(), "Engine spawned");

        let (in_tx, inbound) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        let reader_tx = in_tx.clone();
        let reader_notify = notify.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                let msg = match stdout.read(&mut buf).await {
                    Ok(0) => Inbound::Eof,
                    Ok(n) => Inbound::Data(buf[..n].to_vec()),
                    Err(e) => Inbound::Failed(e),
                };
                let done = !matches!(msg, Inbound::Data(_));
                if reader_tx.send(msg).is_err() {
                    break;
                }
                reader_notify.notify_one();
                if done {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                let result = match stdin.write_all(line.as_bytes()).await {
                    Ok(()) => stdin.flush().await,
                    Err(e) => Err(e),
                };

                if let Err(e) = result {
                    warn!(error = %e, "Engine write failed");
                    let _ = in_tx.send(Inbound::Failed(e));
                    notify.notify_one();
                    break;
                }
            }
        });

        Ok(Self {
            child,
            inbound,
            outbound: Some(out_tx),
            pending: VecDeque::new(),
            eof: false,
        })
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

impl Transport for ProcessTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.pending.is_empty() {
            return Ok(self.drain_pending(buf));
        }
        if self.eof {
            return Ok(0);
        }

        match self.inbound.try_recv() {
            Ok(Inbound::Data(bytes)) => {
                self.pending.extend(bytes);
                Ok(self.drain_pending(buf))
            }
            Ok(Inbound::Eof) | Err(mpsc::error::TryRecvError::Disconnected) => {
                self.eof = true;
                Ok(0)
            }
            Ok(Inbound::Failed(e)) => Err(e),
            Err(mpsc::error::TryRecvError::Empty) => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        tx.send(format!("{line}\n"))
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn writable(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn close(&mut self) {
        self.outbound = None;
        match self.child.try_wait() {
            Ok(Some(status)) => debug!(%status, "Engine exited"),
            Ok(None) => debug!(pid = ?self.child.id(), "Engine still running after close"),
            Err(e) => warn!(error = %e, "Failed to reap engine"),
        }
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}
