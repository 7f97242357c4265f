/*!
 * Error types for the splice relay
 */

use std::fmt;
use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

/// A failed system call on the zero-copy path.
///
/// `syscall` names the call that failed (`"pipe2"`, `"fcntl"` or `"splice"`).
#[derive(Debug, Error)]
#[error("{syscall}: {source}")]
pub struct SpliceError {
    pub syscall: &'static str,
    #[source]
    pub source: io::Error,
}

impl SpliceError {
    pub fn new(syscall: &'static str, source: io::Error) -> Self {
        Self { syscall, source }
    }

    /// Name of the failing system call
    pub fn syscall(&self) -> &'static str {
        self.syscall
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// I/O error on the buffered path
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Zero-copy transfer failed after taking ownership of the copy
    #[error("splice failed after {written} bytes: {source}")]
    Splice {
        written: u64,
        #[source]
        source: SpliceError,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Bytes confirmed delivered before the failure
    pub fn bytes_written(&self) -> u64 {
        match self {
            RelayError::Splice { written, .. } => *written,
            _ => 0,
        }
    }

    fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            RelayError::Io(err) => Some(err.kind()),
            RelayError::Splice { source, .. } => Some(source.kind()),
            RelayError::Config(_) => None,
        }
    }

    /// Deadline on either endpoint expired
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.io_kind(),
            Some(io::ErrorKind::TimedOut) | Some(io::ErrorKind::WouldBlock)
        )
    }

    /// One of the endpoints was closed underneath the transfer
    pub fn is_closed(&self) -> bool {
        matches!(
            self.io_kind(),
            Some(io::ErrorKind::NotConnected)
                | Some(io::ErrorKind::BrokenPipe)
                | Some(io::ErrorKind::ConnectionReset)
                | Some(io::ErrorKind::ConnectionAborted)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::Config(_) => ErrorCategory::Configuration,
            _ if self.is_timeout() => ErrorCategory::Deadline,
            _ if self.is_closed() => ErrorCategory::Network,
            RelayError::Io(_) => ErrorCategory::IoError,
            RelayError::Splice { .. } => ErrorCategory::ZeroCopy,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// I/O operation errors
    IoError,
    /// Kernel splice/pipe errors
    ZeroCopy,
    /// Peer closed or reset the connection
    Network,
    /// Read or write deadline exceeded
    Deadline,
    /// Configuration errors
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::ZeroCopy => write!(f, "zero-copy"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Deadline => write!(f, "deadline"),
            ErrorCategory::Configuration => write!(f, "configuration"),
        }
    }
}
