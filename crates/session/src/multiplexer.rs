//! The event loop that multiplexes user input, engine output, clock ticks
//! and signals onto one [`SessionState`].

use std::io;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::SessionError;
use crate::snapshot::Renderer;
use crate::state::SessionState;

/// Elapsed time measured by a background interval task. Dropping the queue
/// stops the task.
pub struct TickQueue {
    rx: mpsc::UnboundedReceiver<Duration>,
    task: JoinHandle<()>,
}

impl TickQueue {
    pub fn spawn(period: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            let mut last = Instant::now();
            loop {
                interval.tick().await;
                let now = Instant::now();
                if tx.send(now - last).is_err() {
                    break;
                }
                last = now;
            }
        });
        Self { rx, task }
    }

    pub async fn recv(&mut self) -> Option<Duration> {
        self.rx.recv().await
    }

    /// Sum of every tick already queued.
    pub fn drain(&mut self) -> Duration {
        let mut total = Duration::ZERO;
        while let Ok(delta) = self.rx.try_recv() {
            total += delta;
        }
        total
    }
}

impl Drop for TickQueue {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum SignalEvent {
    Terminate,
    Resize,
}

#[cfg(unix)]
struct Signals {
    term: tokio::signal::unix::Signal,
    winch: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            winch: signal(SignalKind::window_change())?,
        })
    }

    async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            Some(()) = self.term.recv() => SignalEvent::Terminate,
            Some(()) = self.winch.recv() => SignalEvent::Resize,
            else => std::future::pending().await,
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> SignalEvent {
        std::future::pending().await
    }
}

/// Drive `state` until the user quits, a termination signal arrives or the
/// input closes. Engines are shut down on the way out.
pub async fn run<R: Renderer>(
    state: &mut SessionState,
    mut input: mpsc::Receiver<String>,
    renderer: &mut R,
) -> Result<(), SessionError> {
    let notify = state.engine_notify();
    let mut ticks = TickQueue::spawn(state.config.clock_tick);
    let mut signals = Signals::new()?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut input_open = true;

    info!(games = state.games.len(), "Session started");

    loop {
        while let Some(key) = state.next_key() {
            state.dispatch_key(key);
            if state.quit {
                break;
            }
        }
        state.service_engines();
        renderer.refresh(&state.snapshot());

        if state.quit || !input_open {
            break;
        }

        tokio::select! {
            line = input.recv() => match line {
                Some(line) => {
                    debug!(line = %line, "Input");
                    state.handle_line(&line);
                }
                None => {
                    debug!("Input closed");
                    input_open = false;
                }
            },
            _ = notify.notified() => {}
            Some(delta) = ticks.recv() => {
                let delta = delta + ticks.drain();
                state.tick(delta);
            }
            event = signals.recv() => match event {
                SignalEvent::Terminate => {
                    info!("Terminated, saving games");
                    state.signal_save("TERM");
                }
                SignalEvent::Resize => debug!("Window resized"),
            },
            result = &mut ctrl_c => {
                result?;
                info!("Interrupted");
                state.quit = true;
            }
            _ = tokio::time::sleep(state.config.poll_timeout) => {}
        }
    }

    state.shutdown();
    info!(modified = state.modified(), "Session ended");
    Ok(())
}
