use std::io;

use thiserror::Error;

use crate::tasks::{codec::CodecError, state::ExitStatus};

/// Errors produced while spawning, waiting on, or collecting a task.
///
/// `TaskError` is `Clone` because a failure captured on a task is handed
/// back on every `data()`/`get()` call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// The OS refused to create a new process.
    #[error("Failed to fork child process: {0}")]
    ForkFailure(String),

    /// The child's first message was not the ready sentinel.
    #[error("Handshake with child process failed: {0}")]
    HandshakeFailure(String),

    /// The child exited with a non-success status.
    #[error("Child process {process_id} failed: {status}")]
    ChildProcessFailure { process_id: u32, status: ExitStatus },

    /// The child's output could not be encoded or decoded.
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    /// An accessor was used before the task reached the required state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No handler with this name is registered.
    #[error("Unknown task handler: {0}")]
    UnknownHandler(String),

    #[error("IO error: {0}")]
    IO(String),
}

impl From<io::Error> for TaskError {
    fn from(err: io::Error) -> Self {
        TaskError::IO(err.to_string())
    }
}

impl From<CodecError> for TaskError {
    fn from(err: CodecError) -> Self {
        TaskError::SerializationFailure(err.to_string())
    }
}

/// Reports an uncaught failure and aborts the calling process.
///
/// Used when a child fails and nobody opted into capturing the error.
/// The failure may be observed by an unrelated poll, so this never unwinds.
pub(crate) fn fatal(error: &TaskError) -> ! {
    #[cfg(feature = "tracing")]
    tracing::error!(error = %error, fatal = true, "Uncaught task failure, aborting process");

    #[cfg(not(feature = "tracing"))]
    let _ = error;

    std::process::abort()
}
