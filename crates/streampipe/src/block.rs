//! The host scheduler's view of a block.
//!
//! The scheduler owns the buffers and the call cadence. Each work call hands
//! a block a read-only input region and a writable output region, both whole
//! items of the block's item sizes, and gets back how many items the block
//! consumed and produced. Blocks never consume or produce more than offered.

#[cfg(unix)]
use crate::config::BridgeConfig;
use crate::error::{BlockError, Result};
#[cfg(unix)]
use crate::error::BridgeError;
#[cfg(unix)]
use crate::process::{ProcessBridge, ShutdownReport};

/// Buffers for one work call.
#[derive(Debug)]
pub struct WorkIo<'a> {
    pub input: &'a [u8],
    pub output: &'a mut [u8],
}

impl<'a> WorkIo<'a> {
    pub fn new(input: &'a [u8], output: &'a mut [u8]) -> Self {
        Self { input, output }
    }
}

/// Items consumed from the input and produced into the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkOutcome {
    pub consumed: usize,
    pub produced: usize,
}

impl WorkOutcome {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.consumed == 0 && self.produced == 0
    }
}

pub(crate) fn check_aligned(what: &'static str, len: usize, item_size: usize) -> Result<()> {
    if len % item_size != 0 {
        return Err(BlockError::Misaligned {
            what,
            len,
            item_size,
        });
    }
    Ok(())
}

/// A stream block the host scheduler can drive.
///
/// At most one `general_work` call is in flight per block.
pub trait Block: Send {
    /// Debug name for logs.
    fn name(&self) -> &str;

    fn input_item_size(&self) -> usize;

    fn output_item_size(&self) -> usize;

    /// Output items produced per input item consumed, on average.
    fn relative_rate(&self) -> f64;

    /// Input items to stage for `noutput_items` of output. Advisory only.
    fn forecast(&self, noutput_items: usize) -> usize {
        (noutput_items as f64 / self.relative_rate()) as usize
    }

    fn general_work(&mut self, io: WorkIo<'_>) -> Result<WorkOutcome>;
}

/// Pipes the stream through a shell command.
#[cfg(unix)]
#[derive(Debug)]
pub struct PipeFilter {
    bridge: ProcessBridge,
}

#[cfg(unix)]
impl PipeFilter {
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        Ok(Self {
            bridge: ProcessBridge::spawn(config)?,
        })
    }

    /// Filter with complex-float output and a 1:1 rate.
    pub fn with_command(
        command: impl Into<String>,
        input_item_size: usize,
    ) -> Result<Self, BridgeError> {
        Self::new(BridgeConfig::new(command, input_item_size))
    }

    pub fn unbuffered(&self) -> bool {
        self.bridge.unbuffered()
    }

    pub fn set_unbuffered(&mut self, unbuffered: bool) {
        self.bridge.set_unbuffered(unbuffered);
    }

    pub fn bridge(&self) -> &ProcessBridge {
        &self.bridge
    }

    /// Stop the child now instead of at drop.
    pub fn shutdown(&mut self) -> &ShutdownReport {
        self.bridge.shutdown()
    }
}

#[cfg(unix)]
impl Block for PipeFilter {
    fn name(&self) -> &str {
        "pipe_filter"
    }

    fn input_item_size(&self) -> usize {
        self.bridge.input_item_size()
    }

    fn output_item_size(&self) -> usize {
        self.bridge.output_item_size()
    }

    fn relative_rate(&self) -> f64 {
        self.bridge.config().relative_rate
    }

    fn forecast(&self, noutput_items: usize) -> usize {
        self.bridge.forecast(noutput_items)
    }

    fn general_work(&mut self, io: WorkIo<'_>) -> Result<WorkOutcome> {
        Ok(self.bridge.work(io.input, io.output)?)
    }
}
