use std::fmt;

use nix::sys::signal::Signal;

/// Lifecycle of a task.
///
/// Transitions are monotonic: `New -> Running -> Done`. A task handle is
/// only ever observed as `Running` or `Done` since spawning and creation
/// happen together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskState {
    New = 0,
    Running = 1,
    Done = 2,
}

impl From<u8> for TaskState {
    fn from(value: u8) -> Self {
        match value {
            0 => TaskState::New,
            1 => TaskState::Running,
            _ => TaskState::Done,
        }
    }
}

/// How a child process ended, as reported by `waitpid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated by the given signal number.
    Signaled(i32),
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(*code),
            ExitStatus::Signaled(_) => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(_) => None,
            ExitStatus::Signaled(signal) => Some(*signal),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited with code {code}"),
            ExitStatus::Signaled(raw) => match Signal::try_from(*raw) {
                Ok(signal) => write!(f, "terminated by {}", signal.as_str()),
                Err(_) => write!(f, "terminated by signal {raw}"),
            },
        }
    }
}
