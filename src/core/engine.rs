/*!
 * Zero-copy transfer engine
 *
 * Moves bytes src -> pipe -> dst with non-blocking splice(2) calls and
 * suspends on exactly one endpoint whenever no progress is possible.
 * Each loop iteration asks `TransferState::next_step` what to do; the answer
 * depends only on the readiness flags, the ceiling, and how full the pipe is.
 */

use std::io;

use tracing::{debug, trace};

use super::capability::CapabilityGate;
use super::endpoint::Endpoint;
use super::pipe::{Drained, PipeBuffer, PipeOptions, Pumped};
use crate::error::SpliceError;

const SPLICE: &str = "splice";

/// Outcome of one transfer attempt.
///
/// `handled` tells the caller whether this mechanism took ownership of the
/// copy. When it is false nothing was read from the source and a fallback
/// copy is appropriate; when true the caller must not copy again, whatever
/// `error` says.
#[derive(Debug)]
pub struct SpliceOutcome {
    /// Bytes confirmed delivered to the destination
    pub written: u64,
    pub handled: bool,
    pub error: Option<SpliceError>,
}

impl SpliceOutcome {
    fn unhandled(error: SpliceError) -> Self {
        Self {
            written: 0,
            handled: false,
            error: Some(error),
        }
    }

    fn finished(written: u64) -> Self {
        Self {
            written,
            handled: true,
            error: None,
        }
    }

    fn failed(written: u64, syscall: &'static str, source: io::Error) -> Self {
        Self {
            written,
            handled: true,
            error: Some(SpliceError::new(syscall, source)),
        }
    }

    /// Name of the failing system call, empty on success
    pub fn syscall(&self) -> &'static str {
        self.error.as_ref().map_or("", |e| e.syscall)
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<u64, SpliceError> {
        match self.error {
            None => Ok(self.written),
            Some(err) => Err(err),
        }
    }
}

/// What the engine does next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Source is done and the pipe is empty
    Finish,
    /// Push buffered bytes to the destination
    Pump,
    /// Pipe is empty and the source would block
    AwaitSource,
    /// Pull at most `max` bytes from the source
    Drain { max: usize },
    /// Pipe is full and the destination would block
    AwaitDestination,
    /// Both sides would block with a partly filled pipe. Only one wait can be
    /// issued, so wait on the destination and then retry both sides.
    Stalled,
}

/// Per-transfer bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferState {
    pub written: u64,
    /// Bytes still allowed past the destination; charged on pump only
    pub remain: u64,
    pub dst_blocked: bool,
    pub src_blocked: bool,
    pub source_exhausted: bool,
}

impl TransferState {
    pub fn new(ceiling: u64) -> Self {
        Self {
            written: 0,
            remain: ceiling,
            dst_blocked: false,
            src_blocked: false,
            source_exhausted: false,
        }
    }

    /// Decide the next step for a pipe holding `occupied` of `capacity` bytes.
    pub fn next_step(&self, occupied: usize, capacity: usize) -> Step {
        // Buffered bytes already count against the ceiling.
        let budget = self.remain.saturating_sub(occupied as u64);
        let exhausted = self.source_exhausted || budget == 0;

        if exhausted && occupied == 0 {
            Step::Finish
        } else if !self.dst_blocked && occupied > 0 {
            Step::Pump
        } else if occupied == 0 && self.src_blocked {
            Step::AwaitSource
        } else if !self.src_blocked && !exhausted && occupied < capacity {
            let free = (capacity - occupied) as u64;
            Step::Drain {
                max: budget.min(free) as usize,
            }
        } else if occupied >= capacity {
            Step::AwaitDestination
        } else {
            Step::Stalled
        }
    }

    fn delivered(&mut self, n: usize) {
        self.written += n as u64;
        self.remain -= n as u64;
    }
}

/// The intermediate buffer as seen by the engine
pub trait Stage {
    fn capacity(&self) -> usize;
    fn occupied(&self) -> usize;
    fn drain(&mut self, max: usize) -> io::Result<Drained>;
    fn pump(&mut self) -> io::Result<Pumped>;
}

/// The two suspension points of a transfer
pub trait Readiness {
    fn wait_readable(&self) -> io::Result<()>;
    fn wait_writable(&self) -> io::Result<()>;
}

/// Run the decision loop until the source is finished or something fails.
///
/// The returned outcome is always `handled`.
pub fn drive<B: Stage, R: Readiness>(stage: &mut B, ready: &R, ceiling: u64) -> SpliceOutcome {
    let mut state = TransferState::new(ceiling);

    loop {
        let step = state.next_step(stage.occupied(), stage.capacity());
        trace!(?step, written = state.written, occupied = stage.occupied(), "splice step");

        match step {
            Step::Finish => return SpliceOutcome::finished(state.written),
            Step::Pump => match stage.pump() {
                Ok(Pumped::Moved(n)) => state.delivered(n),
                Ok(Pumped::WouldBlock) => state.dst_blocked = true,
                Err(e) => return SpliceOutcome::failed(state.written, SPLICE, e),
            },
            Step::AwaitSource => {
                if let Err(e) = ready.wait_readable() {
                    return SpliceOutcome::failed(state.written, SPLICE, e);
                }
                state.src_blocked = false;
            }
            Step::Drain { max } => match stage.drain(max) {
                Ok(Drained::Moved(_)) => {}
                Ok(Drained::WouldBlock) => state.src_blocked = true,
                Ok(Drained::EndOfStream) => state.source_exhausted = true,
                Err(e) => return SpliceOutcome::failed(state.written, SPLICE, e),
            },
            Step::AwaitDestination => {
                if let Err(e) = ready.wait_writable() {
                    return SpliceOutcome::failed(state.written, SPLICE, e);
                }
                state.dst_blocked = false;
            }
            Step::Stalled => {
                if let Err(e) = ready.wait_writable() {
                    return SpliceOutcome::failed(state.written, SPLICE, e);
                }
                state.dst_blocked = false;
                state.src_blocked = false;
            }
        }
    }
}

/// A pipe bound to its two sockets for one transfer
struct Linked<'a, D: ?Sized, S: ?Sized> {
    pipe: &'a mut PipeBuffer,
    dst: &'a D,
    src: &'a S,
}

impl<D: Endpoint + ?Sized, S: Endpoint + ?Sized> Stage for Linked<'_, D, S> {
    fn capacity(&self) -> usize {
        self.pipe.capacity()
    }

    fn occupied(&self) -> usize {
        self.pipe.occupied()
    }

    fn drain(&mut self, max: usize) -> io::Result<Drained> {
        self.pipe.drain(self.src.as_fd(), max)
    }

    fn pump(&mut self) -> io::Result<Pumped> {
        self.pipe.pump(self.dst.as_fd())
    }
}

struct Waiters<'a, D: ?Sized, S: ?Sized> {
    dst: &'a D,
    src: &'a S,
}

impl<D: Endpoint + ?Sized, S: Endpoint + ?Sized> Readiness for Waiters<'_, D, S> {
    fn wait_readable(&self) -> io::Result<()> {
        self.src.wait_readable()
    }

    fn wait_writable(&self) -> io::Result<()> {
        self.dst.wait_writable()
    }
}

/// Move at most `ceiling` bytes from `src` to `dst` through a kernel pipe,
/// using the process-wide capability gate.
pub fn splice<D, S>(dst: &D, src: &S, ceiling: u64) -> SpliceOutcome
where
    D: Endpoint + ?Sized,
    S: Endpoint + ?Sized,
{
    splice_with(CapabilityGate::global(), &PipeOptions::default(), dst, src, ceiling)
}

/// [`splice`] with an explicit gate and pipe options.
pub fn splice_with<D, S>(
    gate: &CapabilityGate,
    options: &PipeOptions,
    dst: &D,
    src: &S,
    ceiling: u64,
) -> SpliceOutcome
where
    D: Endpoint + ?Sized,
    S: Endpoint + ?Sized,
{
    if !dst.is_stream() || !src.is_stream() {
        return SpliceOutcome::unhandled(SpliceError::new(
            SPLICE,
            io::Error::new(io::ErrorKind::InvalidInput, "splice needs stream sockets"),
        ));
    }
    if ceiling == 0 {
        return SpliceOutcome::finished(0);
    }

    let mut pipe = match gate.acquire(|| PipeBuffer::create(options)) {
        Ok(pipe) => pipe,
        Err(e) => {
            debug!("zero-copy unavailable ({}), caller should fall back", e);
            return SpliceOutcome::unhandled(e);
        }
    };

    let outcome = transfer(&mut pipe, dst, src, ceiling);

    if let Err(e) = pipe.release() {
        debug!("failed to close splice pipe: {}", e);
    }
    outcome
}

fn transfer<D, S>(pipe: &mut PipeBuffer, dst: &D, src: &S, ceiling: u64) -> SpliceOutcome
where
    D: Endpoint + ?Sized,
    S: Endpoint + ?Sized,
{
    // From here on the attempt is handled, even if no byte moves.
    let _src_guard = match src.lock_read() {
        Ok(guard) => guard,
        Err(e) => return SpliceOutcome::failed(0, SPLICE, e),
    };
    let _dst_guard = match dst.lock_write() {
        Ok(guard) => guard,
        Err(e) => return SpliceOutcome::failed(0, SPLICE, e),
    };
    if let Err(e) = src.arm_read() {
        return SpliceOutcome::failed(0, SPLICE, e);
    }
    if let Err(e) = dst.arm_write() {
        return SpliceOutcome::failed(0, SPLICE, e);
    }

    let capacity = pipe.capacity();
    let mut stage = Linked { pipe, dst, src };
    let ready = Waiters { dst, src };
    let outcome = drive(&mut stage, &ready, ceiling);

    debug!(
        written = outcome.written,
        capacity,
        error = ?outcome.error,
        "splice transfer finished"
    );
    outcome
}
