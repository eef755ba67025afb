//! Line-oriented client for external chess engine processes.

pub mod error;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use error::EngineError;
pub use protocol::{classify, ControlLine};
pub use session::{EngineCommand, EngineEvent, EngineSession, EngineStatus};
pub use transport::{ProcessTransport, Transport};
