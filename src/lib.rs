/*!
 * splice-relay - zero-copy socket to socket relay
 *
 * Moves bytes between two connected stream sockets through a kernel pipe
 * with splice(2), so the payload never enters user space:
 * - Bounded transfers that never deliver more than the requested ceiling
 * - Process-wide capability gate that remembers when pipes are unavailable
 * - Direction locks and deadlines on the socket wrapper
 * - Buffered fallback when the zero-copy path declines
 *
 * Version: 0.1.0
 */

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod net;

// Re-export commonly used types
pub use config::{LogLevel, RelayConfig};
pub use core::{
    copy_stream, copy_stream_with, splice, splice_with, Capability, CapabilityGate, CopyMethod,
    DirectionGuard, Endpoint, PipeBuffer, PipeOptions, RelayStats, SpliceOutcome,
    ZeroCopyCapabilities,
};
pub use error::{RelayError, Result, SpliceError};
pub use net::SpliceStream;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
