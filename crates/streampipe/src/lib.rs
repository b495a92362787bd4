//! streampipe: stream blocks that move fixed-size items through child
//! processes and OFDM framers.

pub mod block;
pub mod carry;
pub mod config;
pub mod error;
pub mod framing;
#[cfg(unix)]
pub mod process;
pub mod telemetry;

pub use block::{Block, WorkIo, WorkOutcome};
#[cfg(unix)]
pub use block::PipeFilter;
pub use carry::{CarryBuffer, DepositSession};
pub use config::{BridgeConfig, COMPLEX_ITEM_SIZE, FramingConfig};
pub use error::{BlockError, BridgeError, FramingError};
pub use framing::{
    FrameGenBlock, FrameGenControl, FrameSyncBlock, FrameSyncControl, FramingLibrary,
    SyncCounters,
};
#[cfg(unix)]
pub use process::{BridgeStats, ChildExit, ProcessBridge, ShutdownReport};
pub use telemetry::init_tracing;
