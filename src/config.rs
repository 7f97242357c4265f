/*!
 * Configuration types for the splice relay
 */

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{RelayError, Result};

/// Main configuration for relay operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Use splice(2) through a kernel pipe when both endpoints allow it
    #[serde(default = "default_true")]
    pub use_zero_copy: bool,

    /// Chunk size in bytes for the buffered fallback copy
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Requested kernel pipe size in bytes (None = kernel default).
    /// The kernel rounds this up; the effective capacity is read back after creation.
    #[serde(default)]
    pub pipe_size: Option<usize>,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            use_zero_copy: true,
            chunk_size: default_chunk_size(),
            pipe_size: None,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Informational messages (default)
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    32 * 1024 // 32 KB
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&contents)
            .map_err(|e| RelayError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &PathBuf) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RelayError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the copy paths cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RelayError::Config("chunk_size must be positive".to_string()));
        }
        if self.pipe_size == Some(0) {
            return Err(RelayError::Config("pipe_size must be positive".to_string()));
        }
        Ok(())
    }
}
