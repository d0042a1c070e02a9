//! A one-shot error channel between a forking parent and its child.
//!
//! The only consumer is `Process::launch`: the child holds the write end
//! across `fork` and reports a pre-`execvp` failure as a text message; a
//! successful exec closes the write end via `O_CLOEXEC` and the parent reads
//! end-of-file instead.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd;

use crate::error::{ErrnoExt, Error, Result};

pub struct Pipe {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl Pipe {
    pub fn new(close_on_exec: bool) -> Result<Self> {
        let flags = if close_on_exec { OFlag::O_CLOEXEC } else { OFlag::empty() };
        let (read, write) = unistd::pipe2(flags).os_context("Pipe creation failed")?;

        Ok(Pipe { read: Some(read), write: Some(write) })
    }

    pub fn read_fd(&self) -> Option<BorrowedFd<'_>> {
        self.read.as_ref().map(|fd| fd.as_fd())
    }

    pub fn write_fd(&self) -> Option<BorrowedFd<'_>> {
        self.write.as_ref().map(|fd| fd.as_fd())
    }

    /// Closes the read end. Closing an already-closed end is a no-op.
    pub fn close_read(&mut self) {
        self.read = None;
    }

    /// Closes the write end. Closing an already-closed end is a no-op.
    pub fn close_write(&mut self) {
        self.write = None;
    }

    /// Reads whatever is currently available, up to 1 KiB. An empty buffer
    /// means the far end closed without writing.
    pub fn read(&mut self) -> Result<Vec<u8>> {
        let fd = self
            .read
            .as_ref()
            .ok_or_else(|| Error::os("Could not read from pipe", Errno::EBADF))?;

        let mut buf = [0u8; 1024];
        let n = unistd::read(fd.as_raw_fd(), &mut buf).os_context("Could not read from pipe")?;

        Ok(buf[..n].to_vec())
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let fd = self
            .write
            .as_ref()
            .ok_or_else(|| Error::os("Could not write to pipe", Errno::EBADF))?;

        unistd::write(fd, bytes).os_context("Could not write to pipe")?;

        Ok(())
    }
}
