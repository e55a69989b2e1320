use std::{fmt, str::FromStr};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use serde::{Deserialize, Serialize};

use crate::tasks::{error::TaskError, registry::TaskRegistry};

/// Signals a task may install a disposition for.
///
/// `SIGKILL` and `SIGSTOP` cannot be caught or ignored and are therefore
/// not representable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessSignal {
    /// Hangup - terminal disconnected
    SIGHUP,
    /// Interrupt
    SIGINT,
    /// Quit with core dump
    SIGQUIT,
    /// Terminate
    SIGTERM,
    /// User-defined signal 1
    SIGUSR1,
    /// User-defined signal 2
    SIGUSR2,
    /// Broken pipe
    SIGPIPE,
    /// Alarm/timer signal
    SIGALRM,
    /// Child process status changed
    SIGCHLD,
    /// Terminal stop signal
    SIGTSTP,
    /// Terminal input for background process
    SIGTTIN,
    /// Terminal output for background process
    SIGTTOU,
    /// Window size changed
    SIGWINCH,
}

impl From<ProcessSignal> for Signal {
    fn from(signal: ProcessSignal) -> Self {
        match signal {
            ProcessSignal::SIGHUP => Signal::SIGHUP,
            ProcessSignal::SIGINT => Signal::SIGINT,
            ProcessSignal::SIGQUIT => Signal::SIGQUIT,
            ProcessSignal::SIGTERM => Signal::SIGTERM,
            ProcessSignal::SIGUSR1 => Signal::SIGUSR1,
            ProcessSignal::SIGUSR2 => Signal::SIGUSR2,
            ProcessSignal::SIGPIPE => Signal::SIGPIPE,
            ProcessSignal::SIGALRM => Signal::SIGALRM,
            ProcessSignal::SIGCHLD => Signal::SIGCHLD,
            ProcessSignal::SIGTSTP => Signal::SIGTSTP,
            ProcessSignal::SIGTTIN => Signal::SIGTTIN,
            ProcessSignal::SIGTTOU => Signal::SIGTTOU,
            ProcessSignal::SIGWINCH => Signal::SIGWINCH,
        }
    }
}

impl ProcessSignal {
    pub fn as_str(&self) -> &'static str {
        Signal::from(*self).as_str()
    }
}

impl fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a signal name, with or without the `SIG` prefix, ignoring case.
impl FromStr for ProcessSignal {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = if upper.starts_with("SIG") {
            upper
        } else {
            format!("SIG{upper}")
        };
        let signal = match name.as_str() {
            "SIGHUP" => ProcessSignal::SIGHUP,
            "SIGINT" => ProcessSignal::SIGINT,
            "SIGQUIT" => ProcessSignal::SIGQUIT,
            "SIGTERM" => ProcessSignal::SIGTERM,
            "SIGUSR1" => ProcessSignal::SIGUSR1,
            "SIGUSR2" => ProcessSignal::SIGUSR2,
            "SIGPIPE" => ProcessSignal::SIGPIPE,
            "SIGALRM" => ProcessSignal::SIGALRM,
            "SIGCHLD" => ProcessSignal::SIGCHLD,
            "SIGTSTP" => ProcessSignal::SIGTSTP,
            "SIGTTIN" => ProcessSignal::SIGTTIN,
            "SIGTTOU" => ProcessSignal::SIGTTOU,
            "SIGWINCH" => ProcessSignal::SIGWINCH,
            _ => {
                return Err(TaskError::InvalidConfiguration(format!(
                    "Unsupported signal '{s}'"
                )));
            }
        };
        Ok(signal)
    }
}

/// What the child does when it receives a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDisposition {
    /// Restore the default action.
    Default,
    /// Ignore the signal.
    Ignore,
    /// Run the signal handler registered under this name.
    Handler(String),
}

/// Installs the requested dispositions in the calling process.
///
/// Only called in the child, before the ready sentinel is sent.
pub(crate) fn install_dispositions(
    dispositions: &[(ProcessSignal, SignalDisposition)],
    registry: &TaskRegistry,
) -> Result<(), TaskError> {
    for (signal, disposition) in dispositions {
        let handler = match disposition {
            SignalDisposition::Default => SigHandler::SigDfl,
            SignalDisposition::Ignore => SigHandler::SigIgn,
            SignalDisposition::Handler(name) => match registry.lookup_signal_handler(name) {
                Some(f) => SigHandler::Handler(f),
                None => {
                    return Err(TaskError::InvalidConfiguration(format!(
                        "Unknown signal handler '{name}' for {signal}"
                    )));
                }
            },
        };
        let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
        // SAFETY: handlers come from the registry and are plain `extern "C"` functions.
        unsafe { sigaction(Signal::from(*signal), &action) }
            .map_err(|e| TaskError::IO(format!("sigaction({signal}) failed: {e}")))?;
    }
    Ok(())
}
