//! Construction parameters for the pipe and framing blocks.
//!
//! Both configs are plain builders that also deserialize with serde, so a
//! host can carry them in whatever document format it already uses. Only the
//! fields without a sensible default are required.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, FramingError};

/// One complex float sample: two little-endian `f32`s.
pub const COMPLEX_ITEM_SIZE: usize = 8;

/// Atomic pipe write size; also the chunk used when draining at shutdown.
#[cfg(unix)]
pub const PIPE_BUF: usize = libc::PIPE_BUF;
#[cfg(not(unix))]
pub const PIPE_BUF: usize = 4096;

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_output_item_size() -> usize {
    COMPLEX_ITEM_SIZE
}

fn default_relative_rate() -> f64 {
    1.0
}

fn default_write_buffer_size() -> usize {
    8192
}

fn default_drain_attempts() -> usize {
    256
}

fn default_drain_chunk() -> usize {
    PIPE_BUF
}

/// Parameters for a [`crate::process::ProcessBridge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Command line handed to `shell -c`; quoting is the caller's problem.
    pub command: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    pub input_item_size: usize,
    #[serde(default = "default_output_item_size")]
    pub output_item_size: usize,
    /// Output items produced per input item consumed. Advisory only.
    #[serde(default = "default_relative_rate")]
    pub relative_rate: f64,
    /// Flush the child's input after every write.
    #[serde(default)]
    pub unbuffered: bool,
    /// Capacity of the staging buffer in front of the child's stdin.
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,
    /// Upper bound on blocking reads during the shutdown drain.
    #[serde(default = "default_drain_attempts")]
    pub drain_attempts: usize,
    #[serde(default = "default_drain_chunk")]
    pub drain_chunk: usize,
}

impl BridgeConfig {
    pub fn new(command: impl Into<String>, input_item_size: usize) -> Self {
        Self {
            command: command.into(),
            shell: default_shell(),
            input_item_size,
            output_item_size: default_output_item_size(),
            relative_rate: default_relative_rate(),
            unbuffered: false,
            write_buffer_size: default_write_buffer_size(),
            drain_attempts: default_drain_attempts(),
            drain_chunk: default_drain_chunk(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_output_item_size(mut self, size: usize) -> Self {
        self.output_item_size = size;
        self
    }

    pub fn with_relative_rate(mut self, rate: f64) -> Self {
        self.relative_rate = rate;
        self
    }

    pub fn with_unbuffered(mut self, unbuffered: bool) -> Self {
        self.unbuffered = unbuffered;
        self
    }

    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    pub fn with_drain_attempts(mut self, attempts: usize) -> Self {
        self.drain_attempts = attempts;
        self
    }

    pub fn with_drain_chunk(mut self, chunk: usize) -> Self {
        self.drain_chunk = chunk;
        self
    }

    /// Reject configurations that could never move a whole item.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.command.trim().is_empty() {
            return Err(BridgeError::config("command is empty"));
        }
        if self.input_item_size == 0 || self.output_item_size == 0 {
            return Err(BridgeError::config("item sizes must be non-zero"));
        }
        if !self.relative_rate.is_finite() || self.relative_rate <= 0.0 {
            return Err(BridgeError::config(format!(
                "relative rate must be positive, got {}",
                self.relative_rate
            )));
        }
        if self.write_buffer_size < self.input_item_size {
            return Err(BridgeError::config(format!(
                "write buffer ({} bytes) cannot hold one {}-byte input item",
                self.write_buffer_size, self.input_item_size
            )));
        }
        if self.drain_chunk == 0 {
            return Err(BridgeError::config("drain chunk must be non-zero"));
        }
        Ok(())
    }
}

fn default_subcarriers() -> usize {
    64
}

fn default_cyclic_prefix() -> usize {
    16
}

fn default_taper_len() -> usize {
    4
}

fn default_max_payload_in() -> usize {
    1024
}

fn default_max_payload_out() -> usize {
    116
}

/// Parameters for the OFDM framing blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramingConfig {
    #[serde(default = "default_subcarriers")]
    pub subcarriers: usize,
    #[serde(default = "default_cyclic_prefix")]
    pub cyclic_prefix: usize,
    #[serde(default = "default_taper_len")]
    pub taper_len: usize,
    /// Payload bytes carried by one generated frame.
    #[serde(default = "default_max_payload_in")]
    pub max_payload_in: usize,
    /// Largest payload the synchronizer expects to decode from one frame.
    #[serde(default = "default_max_payload_out")]
    pub max_payload_out: usize,
    #[serde(default)]
    pub initial_scheme: u32,
    /// Item size handed to the host by the synchronizer block.
    #[serde(default = "default_output_item_size")]
    pub output_item_size: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            subcarriers: default_subcarriers(),
            cyclic_prefix: default_cyclic_prefix(),
            taper_len: default_taper_len(),
            max_payload_in: default_max_payload_in(),
            max_payload_out: default_max_payload_out(),
            initial_scheme: 0,
            output_item_size: default_output_item_size(),
        }
    }
}

impl FramingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subcarriers(mut self, subcarriers: usize) -> Self {
        self.subcarriers = subcarriers;
        self
    }

    pub fn with_cyclic_prefix(mut self, cyclic_prefix: usize) -> Self {
        self.cyclic_prefix = cyclic_prefix;
        self
    }

    pub fn with_taper_len(mut self, taper_len: usize) -> Self {
        self.taper_len = taper_len;
        self
    }

    pub fn with_max_payload_in(mut self, bytes: usize) -> Self {
        self.max_payload_in = bytes;
        self
    }

    pub fn with_max_payload_out(mut self, bytes: usize) -> Self {
        self.max_payload_out = bytes;
        self
    }

    pub fn with_initial_scheme(mut self, mode: u32) -> Self {
        self.initial_scheme = mode;
        self
    }

    pub fn with_output_item_size(mut self, size: usize) -> Self {
        self.output_item_size = size;
        self
    }

    /// Samples in one OFDM symbol including its cyclic prefix.
    pub fn symbol_len(&self) -> usize {
        self.subcarriers + self.cyclic_prefix
    }

    pub fn validate(&self) -> Result<(), FramingError> {
        if self.subcarriers == 0 {
            return Err(FramingError::Config("subcarrier count must be non-zero".into()));
        }
        if self.taper_len > self.cyclic_prefix {
            return Err(FramingError::Config(format!(
                "taper length {} exceeds cyclic prefix {}",
                self.taper_len, self.cyclic_prefix
            )));
        }
        if self.max_payload_in == 0 || self.max_payload_out == 0 {
            return Err(FramingError::Config("payload limits must be non-zero".into()));
        }
        if self.output_item_size == 0 || self.output_item_size > COMPLEX_ITEM_SIZE {
            return Err(FramingError::Config(format!(
                "synchronizer output item size must be 1..={COMPLEX_ITEM_SIZE}, got {}",
                self.output_item_size
            )));
        }
        if COMPLEX_ITEM_SIZE % self.output_item_size != 0 {
            return Err(FramingError::Config(format!(
                "synchronizer output item size {} must divide {COMPLEX_ITEM_SIZE}",
                self.output_item_size
            )));
        }
        Ok(())
    }
}
