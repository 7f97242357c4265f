/*!
 * Core relay operations
 */

pub mod buffered;
pub mod capability;
pub mod endpoint;
pub mod engine;
pub mod pipe;
pub mod zero_copy;

#[cfg(test)]
pub(crate) mod mock;

pub use capability::{Capability, CapabilityGate};
pub use endpoint::{DirectionGuard, Endpoint};
pub use engine::{splice, splice_with, SpliceOutcome};
pub use pipe::{PipeBuffer, PipeOptions};
pub use zero_copy::{copy_stream, copy_stream_with, CopyMethod, RelayStats, ZeroCopyCapabilities};
