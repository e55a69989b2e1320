//! One-way byte channel between a parent and a freshly forked child.
//!
//! Each channel is a pipe. After the fork, every side keeps exactly one end
//! and drops the other, so the reader observes EOF once the writer is gone.
//!
//! Two messages travel over channels:
//!
//! - the ready sentinel (`"ready\n"`), child to parent, right after setup
//! - the result payload, child to parent, pulled in without blocking while
//!   the child runs and finished off once it has exited
//!
//! The task descriptor goes parent to child on a second channel as one
//! length-prefixed frame, so the child never depends on seeing EOF there.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read, Write},
    mem,
    os::fd::{AsFd, AsRawFd, RawFd},
    time::Duration,
};

use nix::{
    errno::Errno,
    fcntl::{FcntlArg, OFlag, fcntl},
    poll::{PollFd, PollFlags, poll},
    unistd::pipe,
};

use crate::tasks::error::TaskError;

/// Line the child writes once its setup is complete.
pub const READY_SENTINEL: &[u8] = b"ready\n";

/// Upper bound on a descriptor frame.
const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Opens a new channel, returning `(writer, reader)`.
///
/// # Errors
///
/// Returns [`TaskError::IO`] if the pipe cannot be created.
pub fn open() -> Result<(ChannelWriter, ChannelReader), TaskError> {
    let (read_fd, write_fd) = pipe().map_err(|e| TaskError::IO(format!("pipe() failed: {e}")))?;
    let writer = ChannelWriter {
        file: File::from(write_fd),
    };
    Ok((writer, ChannelReader::from_file(File::from(read_fd))))
}

#[derive(Debug)]
pub struct ChannelWriter {
    file: File,
}

impl ChannelWriter {
    pub fn announce_ready(&mut self) -> io::Result<()> {
        self.file.write_all(READY_SENTINEL)?;
        self.file.flush()
    }

    /// Writes `bytes` as a single frame: little-endian `u64` length, then data.
    pub fn send_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        let len = bytes.len() as u64;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(bytes)?;
        self.file.flush()
    }

    /// Writes the final payload and closes the channel.
    pub fn finish(mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.file.flush()
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

#[derive(Debug)]
pub struct ChannelReader {
    reader: BufReader<File>,
    buffered: Vec<u8>,
    eof: bool,
}

impl ChannelReader {
    pub(crate) fn from_file(file: File) -> Self {
        ChannelReader {
            reader: BufReader::new(file),
            buffered: Vec::new(),
            eof: false,
        }
    }

    /// Blocks until the child sends its first line and checks it is the
    /// ready sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::HandshakeFailure`] on EOF, on any other message,
    /// or if the read fails.
    pub fn await_ready(&mut self) -> Result<(), TaskError> {
        let mut line = Vec::with_capacity(READY_SENTINEL.len());
        (&mut self.reader)
            .take(READY_SENTINEL.len() as u64 * 4)
            .read_until(b'\n', &mut line)
            .map_err(|e| TaskError::HandshakeFailure(format!("read failed: {e}")))?;

        if line.is_empty() {
            return Err(TaskError::HandshakeFailure(
                "child closed the channel before sending the ready sentinel".to_string(),
            ));
        }
        if line != READY_SENTINEL {
            return Err(TaskError::HandshakeFailure(format!(
                "unexpected handshake message {:?}",
                String::from_utf8_lossy(&line)
            )));
        }
        Ok(())
    }

    /// Reads one frame written by [`ChannelWriter::send_frame`].
    pub fn receive_frame(&mut self) -> io::Result<Vec<u8>> {
        let mut header = [0u8; 8];
        self.reader.read_exact(&mut header)?;
        let len = u64::from_le_bytes(header);
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"),
            ));
        }
        let mut frame = vec![0u8; len as usize];
        self.reader.read_exact(&mut frame)?;
        Ok(frame)
    }

    /// Switches the read end to non-blocking mode.
    ///
    /// Done by the parent once the handshake is through, so that
    /// [`pump`](Self::pump) never waits on the child.
    pub fn set_nonblocking(&mut self) -> io::Result<()> {
        let file = self.reader.get_ref();
        let flags = OFlag::from_bits_truncate(fcntl(file, FcntlArg::F_GETFL)?);
        fcntl(file, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        Ok(())
    }

    /// Moves every byte available right now into the internal buffer.
    ///
    /// Returns `true` once the writer side is closed. On a blocking channel
    /// this reads until EOF.
    pub fn pump(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        while !self.eof {
            match self.reader.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.buffered.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Blocks for at most `timeout` until there is something to read or
    /// the writer side is closed.
    pub fn wait_readable(&self, timeout: Duration) -> io::Result<()> {
        if self.eof {
            return Ok(());
        }
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.reader.get_ref().as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, millis) {
            Ok(_) | Err(Errno::EINTR) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Bytes received so far and not yet taken.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Hands out everything received so far.
    pub fn take_buffered(&mut self) -> Vec<u8> {
        mem::take(&mut self.buffered)
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.reader.get_ref().as_raw_fd()
    }
}
