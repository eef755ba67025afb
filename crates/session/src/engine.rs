//! Where engine transports come from.

use std::sync::Arc;

use engine_session::{EngineError, ProcessTransport, Transport};
use tokio::sync::Notify;

pub trait EngineFactory {
    /// Start one engine. `notify` is poked whenever the engine has output.
    fn spawn(&mut self, notify: Arc<Notify>) -> Result<Box<dyn Transport>, EngineError>;
}

/// Runs the configured engine command as a child process.
pub struct ProcessFactory {
    command: String,
}

impl ProcessFactory {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl EngineFactory for ProcessFactory {
    fn spawn(&mut self, notify: Arc<Notify>) -> Result<Box<dyn Transport>, EngineError> {
        let transport = ProcessTransport::spawn(&self.command, notify)?;
        Ok(Box::new(transport))
    }
}
