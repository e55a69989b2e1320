use std::panic::{self, AssertUnwindSafe};

use nix::unistd::{ForkResult, Pid, fork};

use crate::tasks::{
    codec,
    error::TaskError,
    process::{
        channel::{self, ChannelReader},
        child::{self, EXIT_HANDLER_FAILED},
        descriptor::TaskDescriptor,
        reap,
    },
    registry::TaskRegistry,
};

/// Parent-side view of a child that completed the handshake.
#[derive(Debug)]
pub(crate) struct SpawnedChild {
    pub(crate) pid: Pid,
    pub(crate) channel: ChannelReader,
}

/// Forks a child for `descriptor` and waits for its ready sentinel.
///
/// The child never returns from this function: it runs the fixed entry
/// point and terminates with `_exit`.
///
/// # Errors
///
/// - [`TaskError::ForkFailure`] if the OS refuses to create the process
/// - [`TaskError::HandshakeFailure`] if the child does not confirm readiness;
///   the child is reaped before returning
pub(crate) fn spawn_child(
    descriptor: &TaskDescriptor,
    registry: &TaskRegistry,
) -> Result<SpawnedChild, TaskError> {
    let frame = codec::encode_message(descriptor)?;
    let (result_writer, mut result_reader) = channel::open()?;
    let (mut input_writer, input_reader) = channel::open()?;

    // SAFETY: the child only runs the fixed entry point and leaves through `_exit`.
    match unsafe { fork() } {
        Err(e) => Err(TaskError::ForkFailure(e.to_string())),
        Ok(ForkResult::Child) => {
            drop(result_reader);
            drop(input_writer);
            child::close_inherited_fds(&[input_reader.raw_fd(), result_writer.raw_fd()]);
            let code = panic::catch_unwind(AssertUnwindSafe(|| {
                child::serve(input_reader, result_writer, registry)
            }))
            .unwrap_or(EXIT_HANDLER_FAILED);
            // SAFETY: skips atexit handlers and destructors inherited from the parent.
            unsafe { libc::_exit(code) }
        }
        Ok(ForkResult::Parent { child }) => {
            drop(result_writer);
            drop(input_reader);

            let sent = input_writer.send_frame(&frame);
            drop(input_writer);
            let handshake = match sent {
                Ok(()) => result_reader.await_ready(),
                Err(e) => Err(TaskError::HandshakeFailure(format!(
                    "failed to send descriptor: {e}"
                ))),
            };

            if let Err(e) = handshake {
                #[cfg(feature = "tracing")]
                tracing::warn!(task_id = descriptor.task_id, pid = child.as_raw(), error = %e, "Handshake failed");

                let _ = reap::reap_blocking(child);
                return Err(e);
            }

            #[cfg(feature = "tracing")]
            tracing::trace!(task_id = descriptor.task_id, pid = child.as_raw(), "Handshake received");

            if let Err(e) = result_reader.set_nonblocking() {
                // Closing the reader first lets a child stuck on a full pipe exit.
                drop(result_reader);
                let _ = reap::reap_blocking(child);
                return Err(TaskError::IO(format!(
                    "failed to configure result channel: {e}"
                )));
            }

            Ok(SpawnedChild {
                pid: child,
                channel: result_reader,
            })
        }
    }
}
