//! Error types for streampipe blocks.
//!
//! Startup and steady-state failures are errors. Shutdown problems are not:
//! they are reported through [`crate::process::ShutdownReport`] and logged,
//! because the host is already discarding the block.

use thiserror::Error;

/// Failures of a [`crate::process::ProcessBridge`].
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid bridge configuration: {0}")]
    Config(String),

    #[error("pipe() failed: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("fcntl() failed on fd {fd}: {source}")]
    Fcntl {
        fd: i32,
        #[source]
        source: std::io::Error,
    },

    /// A real stream error on the data path (never would-block).
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("host region of {len} bytes is not a whole number of {item_size}-byte items")]
    ItemSize { len: usize, item_size: usize },

    #[error("bridge already shut down")]
    AlreadyShutDown,
}

impl BridgeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn io(op: &'static str, source: std::io::Error) -> Self {
        Self::Io { op, source }
    }
}

/// Failures of the framing blocks and their guarded codec handle.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("unknown modulation/coding scheme {0}")]
    UnknownScheme(u32),

    #[error("framing library failed to create {0}")]
    Create(String),

    #[error("invalid framing configuration: {0}")]
    Config(String),

    #[error("codec guard poisoned by a panicking caller")]
    Poisoned,
}

/// Error returned by a block's work entry point.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("{what}: region of {len} bytes is not a whole number of {item_size}-byte items")]
    Misaligned {
        what: &'static str,
        len: usize,
        item_size: usize,
    },
}

pub type Result<T, E = BlockError> = std::result::Result<T, E>;
