/*!
 * Process-wide answer to "can splice be used here"
 *
 * The first probe publishes its outcome into a write-once cell. Concurrent
 * first probes may each allocate a pipe; exactly one outcome is kept. A
 * failed probe is cached for good, so platforms without pipe2/splice pay
 * for one failed allocation per process instead of one per transfer.
 * Running out of descriptors or memory is not cached: it says nothing about
 * whether the mechanism exists.
 */

use std::io;
use std::sync::OnceLock;

use tracing::debug;

use crate::error::SpliceError;

/// Cached probe outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Usable,
    Unusable {
        syscall: &'static str,
        errno: Option<i32>,
        kind: io::ErrorKind,
    },
}

impl Capability {
    fn from_failure(err: &SpliceError) -> Self {
        Capability::Unusable {
            syscall: err.syscall,
            errno: err.raw_os_error(),
            kind: err.kind(),
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, Capability::Usable)
    }
}

/// Memoizes whether the zero-copy mechanism works in this process
#[derive(Debug, Default)]
pub struct CapabilityGate {
    state: OnceLock<Capability>,
}

impl CapabilityGate {
    pub const fn new() -> Self {
        Self {
            state: OnceLock::new(),
        }
    }

    /// The gate shared by every transfer in the process
    pub fn global() -> &'static CapabilityGate {
        static GATE: CapabilityGate = CapabilityGate::new();
        &GATE
    }

    /// `None` until the first probe has published an outcome
    pub fn capability(&self) -> Option<Capability> {
        self.state.get().copied()
    }

    /// Allocate a buffer with `alloc`, or fail fast if a previous probe
    /// already found the mechanism unusable.
    pub fn acquire<B, F>(&self, alloc: F) -> Result<B, SpliceError>
    where
        F: FnOnce() -> Result<B, SpliceError>,
    {
        if let Some(Capability::Unusable {
            syscall,
            errno,
            kind,
        }) = self.capability()
        {
            let source = match errno {
                Some(code) => io::Error::from_raw_os_error(code),
                None => io::Error::new(kind, "zero-copy transfer unavailable"),
            };
            return Err(SpliceError::new(syscall, source));
        }

        let outcome = alloc();
        if self.state.get().is_none() {
            let probed = match &outcome {
                Ok(_) => Some(Capability::Usable),
                Err(err) if is_resource_exhaustion(err) => {
                    debug!("pipe allocation failed ({}), probe left open", err);
                    None
                }
                Err(err) => Some(Capability::from_failure(err)),
            };
            if let Some(probed) = probed {
                if self.state.set(probed).is_ok() {
                    debug!(capability = ?probed, "zero-copy capability established");
                }
            }
        }
        outcome
    }
}

fn is_resource_exhaustion(err: &SpliceError) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOMEM)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn unsupported(syscall: &'static str) -> SpliceError {
        SpliceError::new(syscall, io::Error::from_raw_os_error(libc::ENOSYS))
    }

    #[test]
    fn test_starts_unknown() {
        let gate = CapabilityGate::new();
        assert_eq!(gate.capability(), None);
    }

    #[test]
    fn test_success_is_cached() {
        let gate = CapabilityGate::new();
        let buf = gate.acquire(|| Ok::<_, SpliceError>(7u32)).unwrap();
        assert_eq!(buf, 7);
        assert_eq!(gate.capability(), Some(Capability::Usable));
    }

    #[test]
    fn test_failure_is_cached_and_fails_fast() {
        let gate = CapabilityGate::new();
        let probes = AtomicUsize::new(0);

        let err = gate
            .acquire(|| -> Result<(), SpliceError> {
                probes.fetch_add(1, Ordering::SeqCst);
                Err(unsupported("pipe2"))
            })
            .unwrap_err();
        assert_eq!(err.syscall(), "pipe2");

        for _ in 0..5 {
            let err = gate
                .acquire(|| -> Result<(), SpliceError> {
                    probes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap_err();
            assert_eq!(err.syscall(), "pipe2");
            assert_eq!(err.raw_os_error(), Some(libc::ENOSYS));
        }

        assert_eq!(probes.load(Ordering::SeqCst), 1);
        assert!(!gate.capability().unwrap().is_usable());
    }

    #[test]
    fn test_later_failure_does_not_overwrite_success() {
        let gate = CapabilityGate::new();
        gate.acquire(|| Ok::<_, SpliceError>(())).unwrap();

        let err = gate
            .acquire(|| -> Result<(), SpliceError> {
                Err(SpliceError::new(
                    "pipe2",
                    io::Error::from_raw_os_error(libc::EMFILE),
                ))
            })
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EMFILE));
        assert_eq!(gate.capability(), Some(Capability::Usable));

        // Still usable: the next allocation is attempted.
        assert_eq!(gate.acquire(|| Ok::<_, SpliceError>(3)).unwrap(), 3);
    }

    #[test]
    fn test_descriptor_exhaustion_is_not_cached() {
        let gate = CapabilityGate::new();

        for errno in [libc::EMFILE, libc::ENFILE, libc::ENOMEM] {
            let err = gate
                .acquire(|| -> Result<(), SpliceError> {
                    Err(SpliceError::new(
                        "pipe2",
                        io::Error::from_raw_os_error(errno),
                    ))
                })
                .unwrap_err();
            assert_eq!(err.raw_os_error(), Some(errno));
            assert_eq!(gate.capability(), None);
        }

        // Once descriptors are available again the mechanism is used.
        assert_eq!(gate.acquire(|| Ok::<_, SpliceError>(1)).unwrap(), 1);
        assert_eq!(gate.capability(), Some(Capability::Usable));
    }

    #[test]
    fn test_error_without_errno_is_replayed_by_kind() {
        let gate = CapabilityGate::new();
        let _ = gate.acquire(|| -> Result<(), SpliceError> {
            Err(SpliceError::new(
                "pipe2",
                io::Error::from(io::ErrorKind::Unsupported),
            ))
        });

        let err = gate.acquire(|| Ok::<_, SpliceError>(())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert_eq!(err.raw_os_error(), None);
    }

    #[test]
    fn test_racing_first_probes_publish_one_outcome() {
        let gate = Arc::new(CapabilityGate::new());
        let barrier = Arc::new(Barrier::new(8));
        let probes = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = Arc::clone(&gate);
                let barrier = Arc::clone(&barrier);
                let probes = Arc::clone(&probes);
                thread::spawn(move || {
                    barrier.wait();
                    gate.acquire(|| {
                        probes.fetch_add(1, Ordering::SeqCst);
                        if i % 2 == 0 {
                            Ok(i)
                        } else {
                            Err(unsupported("fcntl"))
                        }
                    })
                    .is_ok()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let probed = probes.load(Ordering::SeqCst);
        assert!((1..=8).contains(&probed));

        // Whatever won, the cell holds one complete value and later calls agree with it.
        let cached = gate.capability().unwrap();
        let next = gate.acquire(|| Ok::<_, SpliceError>(99));
        match cached {
            Capability::Usable => assert_eq!(next.unwrap(), 99),
            Capability::Unusable { syscall, errno, .. } => {
                assert_eq!(syscall, "fcntl");
                assert_eq!(errno, Some(libc::ENOSYS));
                assert_eq!(next.unwrap_err().syscall(), "fcntl");
            }
        }
    }
}
