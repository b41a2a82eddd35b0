//! Framed message channel between the runtime and a node's init stage.
//!
//! Each frame is a 4-byte big-endian length followed by a JSON-encoded
//! [`InitMessage`]. The parent sends exactly one `Config`; the init stage
//! answers `Ready` (or `SetupFailed`) and, if exec fails, `ExecFailed`.
//! A clean end of stream after `Ready` means exec succeeded, because the
//! init stage marks its end of the channel close-on-exec.

use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use nexus_common::constants::INIT_FD_ENV;
use nexus_common::error::{NexusError, Result};
use serde::{Deserialize, Serialize};

use crate::container::{ContainerSpec, ProcessSpec};

/// Largest frame body accepted, in bytes.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// A message exchanged over the init channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitMessage {
    /// Parent to child: everything needed to set up and exec the node.
    Config {
        /// Isolation and filesystem settings.
        container: ContainerSpec,
        /// The process to exec once setup is done.
        process: ProcessSpec,
    },
    /// Child to parent: setup finished, exec is next.
    Ready,
    /// Child to parent: `execve(2)` failed.
    ExecFailed(String),
    /// Child to parent: a setup step failed before exec.
    SetupFailed {
        /// The step that failed.
        stage: String,
        /// Description of the failure.
        reason: String,
    },
}

/// Writes one frame containing `msg`.
///
/// # Errors
///
/// Returns an error if encoding or writing fails, or the frame is too large.
pub fn write_frame<W: Write>(writer: &mut W, msg: &InitMessage) -> io::Result<()> {
    let body = serde_json::to_vec(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds {MAX_FRAME_LEN}", body.len()),
        ));
    }
    let len = u32::try_from(body.len())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()
}

/// Reads one frame. Returns `None` on a clean end of stream between frames.
///
/// # Errors
///
/// Returns an error on a truncated frame, an oversized length, undecodable
/// JSON, or a read failure (including a read timeout).
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<InitMessage>> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated frame header",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds {MAX_FRAME_LEN}"),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Returns `true` if `err` is a read timeout on a socket.
#[must_use]
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// One end of the init channel.
#[derive(Debug)]
pub struct InitChannel {
    stream: UnixStream,
}

impl InitChannel {
    /// Wraps a connected stream.
    #[must_use]
    pub const fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Takes ownership of the descriptor named by `NEXUS_INIT_FD`.
    ///
    /// Must be called at most once per process.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the variable is missing or malformed.
    pub fn inherited() -> Result<Self> {
        let raw = std::env::var(INIT_FD_ENV).map_err(|_| NexusError::Protocol {
            message: format!("{INIT_FD_ENV} is not set"),
        })?;
        let fd: i32 = raw.parse().map_err(|_| NexusError::Protocol {
            message: format!("{INIT_FD_ENV}={raw:?} is not a descriptor"),
        })?;
        if fd < 0 {
            return Err(NexusError::Protocol {
                message: format!("{INIT_FD_ENV}={fd} is negative"),
            });
        }
        // SAFETY: the runtime dup2'd its end of the socket pair onto this
        // descriptor right before exec, and nothing else in this process
        // has claimed it.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self::new(UnixStream::from(owned)))
    }

    /// Sends one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub fn send(&mut self, msg: &InitMessage) -> io::Result<()> {
        write_frame(&mut self.stream, msg)
    }

    /// Receives one message, or `None` once the peer closed its end.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed frames or read failure.
    pub fn recv(&mut self) -> io::Result<Option<InitMessage>> {
        read_frame(&mut self.stream)
    }

    /// Bounds every subsequent [`recv`](Self::recv).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket option cannot be set.
    pub fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))
    }

    /// Replaces the descriptor with a close-on-exec duplicate.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be duplicated.
    pub fn into_cloexec(self) -> io::Result<Self> {
        // try_clone duplicates with F_DUPFD_CLOEXEC; the inherited
        // descriptor is closed when `self` drops.
        let stream = self.stream.try_clone()?;
        Ok(Self { stream })
    }
}
