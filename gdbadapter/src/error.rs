/// Crate-wide error taxonomy for the adapter core.
///
/// Individual modules keep their own narrow `Error` enum (see
/// `process::ProcessError`, `router::RouterError`, ...) the way the rest of
/// this crate always has; `AdapterError` is the type request handlers and
/// the session loop convert into, so callers at the protocol boundary have
/// one thing to match on.
use thiserror::Error;

use crate::process::ProcessError;
use crate::queue::QueueError;
use crate::router::RouterError;

/// Fixed message prefixes callers can match on or assert against in tests.
pub mod sentinel {
    pub const AUXILIARY_REQUIRES_ASYNC: &str =
        "AuxiliaryGdb mode requires 'gdbAsync' to be active";
    pub const AUXILIARY_FORBIDS_NON_STOP: &str =
        "Cannot use auxiliaryGdb mode with gdbNonStop mode";
    pub const CUSTOM_RESET_REQUIRES_ASYNC: &str =
        "Setting 'customResetCommands' requires 'gdbAsync' to be active";
}

#[derive(Error, Debug)]
pub enum AdapterError {
    /// A front-end request was malformed or referenced an unknown handle.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An incompatible combination of launch/attach configuration.
    #[error("config error: {0}")]
    Config(String),

    /// The GDB or target-server child process could not be started.
    #[error("spawn error: {0}")]
    Spawn(String),

    /// GDB replied `^error` to a command.
    #[error("GDB error: {0}")]
    Mi(String),

    /// GDB (or the target server) died; the session is over.
    #[error("session ended")]
    SessionEnded,

    /// An MI error arrived after a stepping response had already timed out
    /// and been answered; must be reported as output, never a second response.
    #[error("Error occurred during the {0}")]
    StepTimeoutLate(String),
}

impl From<ProcessError> for AdapterError {
    fn from(e: ProcessError) -> Self {
        AdapterError::Spawn(e.to_string())
    }
}

impl From<RouterError> for AdapterError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::GdbError(msg) => AdapterError::Mi(msg),
            RouterError::SessionEnded => AdapterError::SessionEnded,
            RouterError::Io(e) => AdapterError::Spawn(e.to_string()),
        }
    }
}

impl From<QueueError> for AdapterError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::AlreadyRunning => AdapterError::Protocol(e.to_string()),
            QueueError::Router(r) => r.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
