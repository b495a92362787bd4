//! Child-process plumbing for the pipe blocks.
//!
//! - **bridge**: [`ProcessBridge`], the owned child plus its two pipes
//! - **stream**: item-granular reader/writer over non-blocking pipes
//! - **fd**: descriptor flag helpers

mod bridge;
pub(crate) mod fd;
mod stream;

pub use bridge::{BridgeStats, ChildExit, ProcessBridge, ShutdownReport};
