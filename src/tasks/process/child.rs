//! Fixed entry point executed by every forked child.
//!
//! The child reads its descriptor, installs signal dispositions, confirms
//! readiness, runs the registered handler and writes the encoded result.
//! Nothing here logs: locks held by other parent threads at fork time are
//! never released in the child.

use std::{
    fs,
    os::fd::RawFd,
    panic::{self, AssertUnwindSafe},
};

use crate::tasks::{
    codec,
    process::{
        channel::{ChannelReader, ChannelWriter},
        descriptor::TaskDescriptor,
    },
    registry::{TaskCall, TaskRegistry},
    signal,
};

pub(crate) const EXIT_SUCCESS: i32 = 0;
/// Handler returned an error or panicked.
pub(crate) const EXIT_HANDLER_FAILED: i32 = 1;
/// Descriptor, signal setup or handshake could not be completed.
pub(crate) const EXIT_PROTOCOL_ERROR: i32 = 2;
/// Handler output could not be encoded or written.
pub(crate) const EXIT_ENCODE_FAILED: i32 = 3;

/// Closes every descriptor inherited from the parent except stdio and `keep`.
///
/// Other threads of the parent may have had channels of their own open at
/// fork time. Holding on to those would keep their readers from seeing EOF.
pub(crate) fn close_inherited_fds(keep: &[RawFd]) {
    for fd in open_fds() {
        if fd > 2 && !keep.contains(&fd) {
            // SAFETY: nothing in the child owns these descriptors any more.
            unsafe {
                libc::close(fd);
            }
        }
    }
}

fn open_fds() -> Vec<RawFd> {
    for dir in ["/proc/self/fd", "/dev/fd"] {
        if let Ok(entries) = fs::read_dir(dir) {
            return entries
                .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
                .collect();
        }
    }
    // SAFETY: sysconf has no preconditions.
    let max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    let max = if max <= 0 { 1024 } else { max.min(65_536) as RawFd };
    (0..max).collect()
}

/// Runs one task and returns the exit code the child should terminate with.
pub(crate) fn serve(
    mut input: ChannelReader,
    mut output: ChannelWriter,
    registry: &TaskRegistry,
) -> i32 {
    let descriptor: TaskDescriptor = match input
        .receive_frame()
        .ok()
        .and_then(|frame| codec::decode_message(&frame).ok())
    {
        Some(descriptor) => descriptor,
        None => return EXIT_PROTOCOL_ERROR,
    };
    drop(input);

    if signal::install_dispositions(&descriptor.signals, registry).is_err() {
        return EXIT_PROTOCOL_ERROR;
    }
    if output.announce_ready().is_err() {
        return EXIT_PROTOCOL_ERROR;
    }

    let Some(handler) = registry.lookup(&descriptor.handler) else {
        return EXIT_PROTOCOL_ERROR;
    };

    let call = TaskCall {
        task_id: descriptor.task_id,
        args: descriptor.args,
        mode: descriptor.mode,
    };
    let values = match panic::catch_unwind(AssertUnwindSafe(|| handler(&call))) {
        Ok(Ok(values)) => values,
        Ok(Err(_)) | Err(_) => return EXIT_HANDLER_FAILED,
    };

    let payload = match codec::encode(&values) {
        Ok(payload) => payload,
        Err(_) => return EXIT_ENCODE_FAILED,
    };
    match output.finish(&payload) {
        Ok(()) => EXIT_SUCCESS,
        Err(_) => EXIT_ENCODE_FAILED,
    }
}
