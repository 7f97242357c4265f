/*!
 * Non-blocking stream socket with direction locks, deadlines and poll-based waits
 */

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rustix::event::{poll, PollFd, PollFlags};
use rustix::io::Errno;

use crate::core::endpoint::{DirectionGuard, Endpoint};

#[derive(Debug)]
enum Inner {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Inner {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Inner::Tcp(s) => (&*s).read(buf),
            Inner::Unix(s) => (&*s).read(buf),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Inner::Tcp(s) => (&*s).write(buf),
            Inner::Unix(s) => (&*s).write(buf),
        }
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        match self {
            Inner::Tcp(s) => s.shutdown(how),
            Inner::Unix(s) => s.shutdown(how),
        }
    }
}

impl AsFd for Inner {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Inner::Tcp(s) => s.as_fd(),
            Inner::Unix(s) => s.as_fd(),
        }
    }
}

#[derive(Debug, Default)]
struct Direction {
    lock: Mutex<()>,
    deadline: Mutex<Option<Instant>>,
}

impl Direction {
    fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_deadline(&self, deadline: Option<Instant>) {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    fn acquire(&self) -> MutexGuard<'_, ()> {
        // The mutex guards no data, so a poisoned lock is still a valid lock.
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A TCP or Unix stream socket usable as a splice endpoint.
///
/// The descriptor is switched to non-blocking mode at construction. Reads and
/// writes through `Read`/`Write` still behave like blocking calls: they wait
/// for readiness with poll(2), honouring the direction's deadline.
#[derive(Debug)]
pub struct SpliceStream {
    inner: Inner,
    read: Direction,
    write: Direction,
    closed: AtomicBool,
}

impl SpliceStream {
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self::new(Inner::Tcp(stream)))
    }

    pub fn from_unix(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self::new(Inner::Unix(stream)))
    }

    /// A connected pair of Unix stream sockets
    pub fn unix_pair() -> io::Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::from_unix(a)?, Self::from_unix(b)?))
    }

    fn new(inner: Inner) -> Self {
        Self {
            inner,
            read: Direction::default(),
            write: Direction::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Absolute deadline for read waits (None = wait forever)
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.read.set_deadline(deadline);
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.write.set_deadline(deadline);
    }

    /// Deadline `timeout` from now for read waits
    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.set_read_deadline(timeout.map(|t| Instant::now() + t));
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        self.set_write_deadline(timeout.map(|t| Instant::now() + t));
    }

    /// Half-close: the peer sees end of stream once buffered bytes are read
    pub fn shutdown_write(&self) -> io::Result<()> {
        self.inner.shutdown(Shutdown::Write)
    }

    /// Close the stream for this process. Pending waits wake up and fail;
    /// later locks, waits and I/O fail with `NotConnected`.
    pub fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.inner.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> io::Result<()> {
        if self.is_closed() {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "use of closed network connection",
            ))
        } else {
            Ok(())
        }
    }

    fn check_deadline(direction: &Direction) -> io::Result<Option<Instant>> {
        let deadline = direction.deadline();
        match deadline {
            Some(at) if Instant::now() >= at => Err(timeout_error()),
            _ => Ok(deadline),
        }
    }

    fn lock<'a>(&'a self, direction: &'a Direction) -> io::Result<DirectionGuard<'a>> {
        self.check_open()?;
        let held = direction.acquire();
        // Closed while we were queued behind another holder.
        self.check_open()?;
        Ok(DirectionGuard::new(held))
    }

    fn wait(&self, direction: &Direction, events: PollFlags) -> io::Result<()> {
        loop {
            self.check_open()?;
            let deadline = Self::check_deadline(direction)?;
            let timeout = match deadline {
                Some(at) => poll_timeout(at.saturating_duration_since(Instant::now())),
                None => -1,
            };

            let mut fds = [PollFd::new(&self.inner, events)];
            match poll(&mut fds, timeout) {
                // Woke for readiness, hangup or error: the next syscall reports which.
                Ok(n) if n > 0 => return self.check_open(),
                Ok(_) => continue,
                Err(e) if e == Errno::INTR => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn timeout_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o timeout")
}

/// Milliseconds for poll(2), rounded up so a wait never ends before the deadline
fn poll_timeout(remaining: Duration) -> i32 {
    remaining.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32
}

impl AsFd for SpliceStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl Endpoint for SpliceStream {
    fn lock_read(&self) -> io::Result<DirectionGuard<'_>> {
        self.lock(&self.read)
    }

    fn lock_write(&self) -> io::Result<DirectionGuard<'_>> {
        self.lock(&self.write)
    }

    fn arm_read(&self) -> io::Result<()> {
        self.check_open()?;
        Self::check_deadline(&self.read).map(|_| ())
    }

    fn arm_write(&self) -> io::Result<()> {
        self.check_open()?;
        Self::check_deadline(&self.write).map(|_| ())
    }

    fn wait_readable(&self) -> io::Result<()> {
        self.wait(&self.read, PollFlags::IN)
    }

    fn wait_writable(&self) -> io::Result<()> {
        self.wait(&self.write, PollFlags::OUT)
    }
}

impl Read for &SpliceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let _guard = self.lock_read()?;
        self.arm_read()?;
        loop {
            match self.inner.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.wait_readable()?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

impl Write for &SpliceStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _guard = self.lock_write()?;
        self.arm_write()?;
        loop {
            match self.inner.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.wait_writable()?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for SpliceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Write for SpliceStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
