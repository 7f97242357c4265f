//! Socket handle contract consumed by the splice engine
//!
//! The engine never touches a reactor directly. An endpoint supplies
//! direction-scoped exclusive access, one-time readiness arming, and the two
//! suspension points (`wait_readable`, `wait_writable`). Deadlines and
//! cancellation live behind those waits and surface as ordinary errors.

use std::io;
use std::os::fd::AsFd;
use std::sync::MutexGuard;

/// Exclusive access to one direction of an endpoint.
///
/// Released when dropped, so every exit path of a transfer gives the
/// direction back.
#[must_use = "the direction is released as soon as the guard is dropped"]
pub struct DirectionGuard<'a> {
    _held: MutexGuard<'a, ()>,
}

impl<'a> DirectionGuard<'a> {
    pub fn new(held: MutexGuard<'a, ()>) -> Self {
        Self { _held: held }
    }
}

/// A stream socket the splice engine can move bytes between.
pub trait Endpoint: AsFd {
    /// Take exclusive read access. Blocks while another reader holds it.
    fn lock_read(&self) -> io::Result<DirectionGuard<'_>>;

    /// Take exclusive write access. Blocks while another writer holds it.
    fn lock_write(&self) -> io::Result<DirectionGuard<'_>>;

    /// Prepare for read waits. Fails if the endpoint is closed or its read
    /// deadline has already passed.
    fn arm_read(&self) -> io::Result<()>;

    /// Prepare for write waits.
    fn arm_write(&self) -> io::Result<()>;

    /// Suspend until readable, or fail with the deadline / close / I/O error
    /// that came first.
    fn wait_readable(&self) -> io::Result<()>;

    /// Suspend until writable.
    fn wait_writable(&self) -> io::Result<()>;

    /// Whether the endpoint is connection-oriented. Datagram sockets are
    /// never spliced.
    fn is_stream(&self) -> bool {
        true
    }
}
