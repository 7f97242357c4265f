/*!
 * Stream relay with zero-copy fast path
 *
 * `copy_stream` is the generic "copy one connection into another" operation.
 * It hands the transfer to the splice engine when both endpoints allow it and
 * falls back to a buffered copy only when the engine declined the attempt.
 */

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::buffered::copy_buffered;
use super::capability::{Capability, CapabilityGate};
use super::endpoint::Endpoint;
use super::engine::splice_with;
use super::pipe::PipeOptions;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// How the bytes were moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMethod {
    /// splice(2) through a kernel pipe
    Splice,
    /// read/write through a userspace buffer
    Buffered,
}

/// Statistics about a relay operation
#[derive(Debug, Clone)]
pub struct RelayStats {
    pub bytes_copied: u64,
    pub duration: Duration,
    pub method: CopyMethod,
}

/// Capabilities for zero-copy operations on this platform
#[derive(Debug, Clone)]
pub struct ZeroCopyCapabilities {
    pub available: bool,
    pub method: &'static str,
}

impl ZeroCopyCapabilities {
    /// Report what the process-wide gate knows, without probing
    pub fn detect() -> Self {
        let compiled = cfg!(all(target_os = "linux", feature = "zero-copy"));
        let available = compiled
            && !matches!(
                CapabilityGate::global().capability(),
                Some(Capability::Unusable { .. })
            );

        Self {
            available,
            method: if compiled { "splice" } else { "none" },
        }
    }
}

/// Copy from `src` to `dst`, moving at most `limit` bytes when one is given.
pub fn copy_stream<D, S>(dst: &D, src: &S, limit: Option<u64>, config: &RelayConfig) -> Result<RelayStats>
where
    D: Endpoint + ?Sized,
    S: Endpoint + ?Sized,
    for<'a> &'a D: Write,
    for<'a> &'a S: Read,
{
    copy_stream_with(CapabilityGate::global(), dst, src, limit, config)
}

/// [`copy_stream`] with an explicit capability gate.
pub fn copy_stream_with<D, S>(
    gate: &CapabilityGate,
    dst: &D,
    src: &S,
    limit: Option<u64>,
    config: &RelayConfig,
) -> Result<RelayStats>
where
    D: Endpoint + ?Sized,
    S: Endpoint + ?Sized,
    for<'a> &'a D: Write,
    for<'a> &'a S: Read,
{
    config.validate()?;
    let start_time = Instant::now();

    if cfg!(feature = "zero-copy") && config.use_zero_copy {
        let options = PipeOptions {
            size_hint: config.pipe_size,
        };
        let outcome = splice_with(gate, &options, dst, src, limit.unwrap_or(u64::MAX));

        if outcome.handled {
            let written = outcome.written;
            if let Some(source) = outcome.error {
                return Err(RelayError::Splice { written, source });
            }
            info!("Zero-copy relay completed: {} bytes", written);
            return Ok(RelayStats {
                bytes_copied: written,
                duration: start_time.elapsed(),
                method: CopyMethod::Splice,
            });
        }

        if let Some(reason) = outcome.error {
            debug!("Zero-copy not used ({}), using buffered copy", reason);
        }
    }

    let bytes_copied = copy_buffered(dst, src, limit, config.chunk_size)?;
    info!("Buffered relay completed: {} bytes", bytes_copied);

    Ok(RelayStats {
        bytes_copied,
        duration: start_time.elapsed(),
        method: CopyMethod::Buffered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::SpliceStream;
    use std::io;
    use std::thread;

    fn unusable_gate() -> CapabilityGate {
        let gate = CapabilityGate::new();
        let _ = gate.acquire(|| -> std::result::Result<(), _> {
            Err(crate::error::SpliceError::new(
                "pipe2",
                io::Error::from(io::ErrorKind::Unsupported),
            ))
        });
        gate
    }

    #[test]
    fn test_capabilities_detection() {
        let caps = ZeroCopyCapabilities::detect();

        #[cfg(all(target_os = "linux", feature = "zero-copy"))]
        assert_eq!(caps.method, "splice");

        #[cfg(not(target_os = "linux"))]
        assert!(!caps.available);
    }

    #[test]
    fn test_fallback_when_gate_is_closed() {
        let (up_peer, up) = SpliceStream::unix_pair().unwrap();
        let (down, down_peer) = SpliceStream::unix_pair().unwrap();

        let writer = thread::spawn(move || {
            (&up_peer).write_all(b"fallback bytes").unwrap();
            up_peer.shutdown_write().unwrap();
        });

        let gate = unusable_gate();
        let stats = copy_stream_with(&gate, &down, &up, None, &RelayConfig::default()).unwrap();
        writer.join().unwrap();
        down.shutdown_write().unwrap();

        assert_eq!(stats.method, CopyMethod::Buffered);
        assert_eq!(stats.bytes_copied, 14);

        let mut out = Vec::new();
        (&down_peer).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"fallback bytes");
    }

    #[test]
    fn test_zero_copy_disabled_by_config() {
        let (up_peer, up) = SpliceStream::unix_pair().unwrap();
        let (down, _down_peer) = SpliceStream::unix_pair().unwrap();

        (&up_peer).write_all(b"abc").unwrap();
        up_peer.shutdown_write().unwrap();

        let config = RelayConfig {
            use_zero_copy: false,
            ..Default::default()
        };
        let stats = copy_stream(&down, &up, None, &config).unwrap();

        assert_eq!(stats.method, CopyMethod::Buffered);
        assert_eq!(stats.bytes_copied, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (_up_peer, up) = SpliceStream::unix_pair().unwrap();
        let (down, _down_peer) = SpliceStream::unix_pair().unwrap();

        let config = RelayConfig {
            chunk_size: 0,
            ..Default::default()
        };
        let err = copy_stream(&down, &up, None, &config).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[cfg(all(target_os = "linux", feature = "zero-copy"))]
    #[test]
    fn test_splice_path_used_on_linux() {
        let (up_peer, up) = SpliceStream::unix_pair().unwrap();
        let (down, _down_peer) = SpliceStream::unix_pair().unwrap();

        (&up_peer).write_all(b"zero copy").unwrap();
        up_peer.shutdown_write().unwrap();

        let gate = CapabilityGate::new();
        let stats = copy_stream_with(&gate, &down, &up, None, &RelayConfig::default()).unwrap();

        assert_eq!(stats.method, CopyMethod::Splice);
        assert_eq!(stats.bytes_copied, 9);
        assert_eq!(gate.capability(), Some(Capability::Usable));
    }
}
