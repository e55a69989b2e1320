use nix::{
    errno::Errno,
    sys::wait::{WaitPidFlag, WaitStatus, waitpid},
    unistd::Pid,
};

use crate::tasks::{error::TaskError, state::ExitStatus};

/// Checks whether `pid` has exited without blocking.
///
/// Returns `Ok(None)` while the process is still running.
pub(crate) fn try_reap(pid: Pid) -> Result<Option<ExitStatus>, TaskError> {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => Ok(classify(status)),
        Err(Errno::EINTR) => Ok(None),
        Err(e) => Err(reap_error(pid, e)),
    }
}

/// Blocks until `pid` exits.
pub(crate) fn reap_blocking(pid: Pid) -> Result<ExitStatus, TaskError> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(exit) = classify(status) {
                    return Ok(exit);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(reap_error(pid, e)),
        }
    }
}

fn classify(status: WaitStatus) -> Option<ExitStatus> {
    match status {
        WaitStatus::Exited(_, code) => Some(ExitStatus::Exited(code)),
        WaitStatus::Signaled(_, signal, _) => Some(ExitStatus::Signaled(signal as i32)),
        _ => None,
    }
}

fn reap_error(pid: Pid, errno: Errno) -> TaskError {
    TaskError::IO(format!("waitpid({pid}) failed: {errno}"))
}
