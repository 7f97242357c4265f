//! Scripted stage and readiness fakes for testing the engine
//!
//! The fake stage counts bytes instead of carrying them. The source and the
//! destination each follow a script of events; an empty source script reads
//! as end of stream and an empty destination script accepts everything.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;

use super::engine::{Readiness, Stage};
use super::pipe::{Drained, Pumped};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    /// `n` bytes are available; a smaller drain leaves the rest queued
    Data(usize),
    Block,
    /// Sticky: every later drain also sees end of stream
    Eof,
    Fail(io::ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestEvent {
    /// Accept at most `n` bytes on this pump
    Accept(usize),
    Block,
    Fail(io::ErrorKind),
}

#[derive(Debug)]
pub struct FakeStage {
    capacity: usize,
    occupied: usize,
    source: VecDeque<SourceEvent>,
    dest: VecDeque<DestEvent>,
    /// `max` argument of every drain call, in order
    pub drain_requests: Vec<usize>,
    /// Bytes accepted by the destination
    pub delivered: u64,
    pub max_occupied: usize,
}

impl FakeStage {
    pub fn new(capacity: usize, source: Vec<SourceEvent>, dest: Vec<DestEvent>) -> Self {
        Self {
            capacity,
            occupied: 0,
            source: source.into(),
            dest: dest.into(),
            drain_requests: Vec::new(),
            delivered: 0,
            max_occupied: 0,
        }
    }

    /// Bytes the source still holds
    pub fn source_left(&self) -> usize {
        self.source
            .iter()
            .map(|event| match event {
                SourceEvent::Data(n) => *n,
                _ => 0,
            })
            .sum()
    }
}

impl Stage for FakeStage {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn occupied(&self) -> usize {
        self.occupied
    }

    fn drain(&mut self, max: usize) -> io::Result<Drained> {
        self.drain_requests.push(max);
        match self.source.pop_front() {
            Some(SourceEvent::Data(n)) => {
                let take = n.min(max).min(self.capacity - self.occupied);
                if n > take {
                    self.source.push_front(SourceEvent::Data(n - take));
                }
                self.occupied += take;
                self.max_occupied = self.max_occupied.max(self.occupied);
                Ok(Drained::Moved(take))
            }
            Some(SourceEvent::Block) => Ok(Drained::WouldBlock),
            Some(SourceEvent::Eof) => {
                self.source.push_front(SourceEvent::Eof);
                Ok(Drained::EndOfStream)
            }
            Some(SourceEvent::Fail(kind)) => Err(io::Error::from(kind)),
            None => Ok(Drained::EndOfStream),
        }
    }

    fn pump(&mut self) -> io::Result<Pumped> {
        let accepted = match self.dest.pop_front() {
            Some(DestEvent::Accept(n)) => n.min(self.occupied),
            Some(DestEvent::Block) => return Ok(Pumped::WouldBlock),
            Some(DestEvent::Fail(kind)) => return Err(io::Error::from(kind)),
            None => self.occupied,
        };
        self.occupied -= accepted;
        self.delivered += accepted as u64;
        Ok(Pumped::Moved(accepted))
    }
}

/// Readiness that is always immediately ready, unless told to fail
#[derive(Debug, Default)]
pub struct FakeReadiness {
    pub readable: Cell<usize>,
    pub writable: Cell<usize>,
    pub fail_readable: Option<io::ErrorKind>,
    pub fail_writable: Option<io::ErrorKind>,
}

impl FakeReadiness {
    pub fn readable_waits(&self) -> usize {
        self.readable.get()
    }

    pub fn writable_waits(&self) -> usize {
        self.writable.get()
    }
}

impl Readiness for FakeReadiness {
    fn wait_readable(&self) -> io::Result<()> {
        self.readable.set(self.readable.get() + 1);
        match self.fail_readable {
            Some(kind) => Err(io::Error::from(kind)),
            None => Ok(()),
        }
    }

    fn wait_writable(&self) -> io::Result<()> {
        self.writable.set(self.writable.get() + 1);
        match self.fail_writable {
            Some(kind) => Err(io::Error::from(kind)),
            None => Ok(()),
        }
    }
}
