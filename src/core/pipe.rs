/*!
 * Kernel pipe used as the intermediate stage of a zero-copy transfer
 *
 * Payload bytes move socket -> pipe -> socket with splice(2) and never enter
 * userspace. The pipe is non-blocking and close-on-exec; its capacity is read
 * back from the kernel once and never changes.
 */

use std::io;
use std::os::fd::{AsFd, IntoRawFd, OwnedFd};

use crate::error::SpliceError;

/// Options applied when a pipe is created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeOptions {
    /// Requested capacity in bytes. The kernel may round it up or refuse it;
    /// either way the capacity actually granted is what gets recorded.
    pub size_hint: Option<usize>,
}

/// Result of moving bytes from a socket into the pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drained {
    Moved(usize),
    WouldBlock,
    /// The source shut down its write side
    EndOfStream,
}

/// Result of moving buffered bytes from the pipe to a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pumped {
    Moved(usize),
    WouldBlock,
}

/// A kernel pipe with a fixed capacity and a count of bytes it currently holds.
#[derive(Debug)]
pub struct PipeBuffer {
    read: OwnedFd,
    write: OwnedFd,
    capacity: usize,
    occupied: usize,
}

impl PipeBuffer {
    /// Allocate a pipe and read its capacity.
    ///
    /// On failure the returned error names the system call that failed; any
    /// descriptor already allocated is closed before returning.
    #[cfg(target_os = "linux")]
    pub fn create(options: &PipeOptions) -> Result<Self, SpliceError> {
        use rustix::pipe::{fcntl_getpipe_size, fcntl_setpipe_size, pipe_with, PipeFlags};
        use tracing::debug;

        let (read, write) = pipe_with(PipeFlags::CLOEXEC | PipeFlags::NONBLOCK)
            .map_err(|e| SpliceError::new("pipe2", e.into()))?;

        if let Some(size) = options.size_hint {
            // Refusal (EPERM above /proc/sys/fs/pipe-max-size) keeps the default size.
            if let Err(e) = fcntl_setpipe_size(&write, size) {
                debug!("F_SETPIPE_SZ({}) refused, keeping default size: {}", size, e);
            }
        }

        // `read` and `write` close on drop if this fails.
        let capacity =
            fcntl_getpipe_size(&read).map_err(|e| SpliceError::new("fcntl", e.into()))?;

        Ok(Self {
            read,
            write,
            capacity,
            occupied: 0,
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn create(_options: &PipeOptions) -> Result<Self, SpliceError> {
        Err(SpliceError::new(
            "pipe2",
            io::Error::from(io::ErrorKind::Unsupported),
        ))
    }

    /// Fixed capacity granted by the kernel
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes drained into the pipe and not yet pumped out
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// Move up to `max` bytes (further capped by free space) from `src` into
    /// the pipe without blocking.
    pub fn drain<S: AsFd>(&mut self, src: S, max: usize) -> io::Result<Drained> {
        let max = max.min(self.capacity - self.occupied);
        if max == 0 {
            // splice(2) with len 0 returns 0, which would read as end of stream.
            return Ok(Drained::Moved(0));
        }

        match splice_nonblocking(src.as_fd(), self.write.as_fd(), max)? {
            None => Ok(Drained::WouldBlock),
            Some(0) => Ok(Drained::EndOfStream),
            Some(n) => {
                self.occupied += n;
                Ok(Drained::Moved(n))
            }
        }
    }

    /// Move up to `occupied` bytes from the pipe to `dst` without blocking.
    pub fn pump<D: AsFd>(&mut self, dst: D) -> io::Result<Pumped> {
        if self.occupied == 0 {
            return Ok(Pumped::Moved(0));
        }

        match splice_nonblocking(self.read.as_fd(), dst.as_fd(), self.occupied)? {
            None => Ok(Pumped::WouldBlock),
            Some(0) => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "splice moved no bytes out of a non-empty pipe",
            )),
            Some(n) => {
                self.occupied -= n;
                Ok(Pumped::Moved(n))
            }
        }
    }

    /// Close both ends of the pipe, returning the first close error.
    ///
    /// Consumes the buffer, so it cannot be released twice or used afterwards.
    pub fn release(self) -> io::Result<()> {
        let PipeBuffer { read, write, .. } = self;
        let first = close_fd(read);
        let second = close_fd(write);
        first.and(second)
    }
}

/// One non-blocking splice(2) call. `Ok(None)` means the call would block.
#[cfg(target_os = "linux")]
fn splice_nonblocking(
    from: std::os::fd::BorrowedFd<'_>,
    to: std::os::fd::BorrowedFd<'_>,
    len: usize,
) -> io::Result<Option<usize>> {
    use rustix::io::Errno;
    use rustix::pipe::{splice, SpliceFlags};

    loop {
        match splice(from, None, to, None, len, SpliceFlags::NONBLOCK) {
            Ok(n) => return Ok(Some(n)),
            Err(e) if e == Errno::AGAIN || e == Errno::WOULDBLOCK => return Ok(None),
            Err(e) if e == Errno::INTR => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn splice_nonblocking(
    _from: std::os::fd::BorrowedFd<'_>,
    _to: std::os::fd::BorrowedFd<'_>,
    _len: usize,
) -> io::Result<Option<usize>> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

fn close_fd(fd: OwnedFd) -> io::Result<()> {
    let raw = fd.into_raw_fd();
    // SAFETY: `raw` was just taken out of an OwnedFd, so nothing else owns or closes it.
    if unsafe { libc::close(raw) } == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
