//! OFDM framing blocks over an external framing library.
//!
//! The modulation, coding and frame assembly live in the library; this module
//! only adapts it to the host's item contract:
//! - **scheme**: the modulation/coding table exposed as one integer mode
//! - **generator**: [`FrameGenBlock`], bytes in, complex samples out
//! - **synchronizer**: [`FrameSyncBlock`], complex samples in, payload bytes out
//! - **loopback**: a byte-transparent stand-in library for hosts and tests
//!
//! Both blocks keep the library handle behind a mutex shared with a control
//! handle, so reconfiguration from another thread never overlaps a work call.

mod generator;
pub mod loopback;
pub mod scheme;
mod synchronizer;

use std::sync::{Mutex, MutexGuard};

use num_complex::Complex32;
use serde::Serialize;

use crate::config::{COMPLEX_ITEM_SIZE, FramingConfig};
use crate::error::FramingError;

pub use generator::{FrameGenBlock, FrameGenControl};
pub use scheme::{Check, Fec, FrameProps, Modulation, SCHEMES, Scheme};
pub use synchronizer::{FrameSyncBlock, FrameSyncControl, SyncCounters};

/// Bytes of user header attached to every frame.
pub const HEADER_LEN: usize = 8;

/// Receiver-side measurements for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameStats {
    pub evm_db: f32,
    pub rssi_db: f32,
    pub cfo: f32,
    pub symbols: usize,
}

/// One decoded frame as reported by a synchronizer.
#[derive(Debug, Clone, Copy)]
pub struct FrameEvent<'a> {
    pub header: &'a [u8],
    pub header_valid: bool,
    pub payload: &'a [u8],
    pub payload_valid: bool,
    pub stats: FrameStats,
}

/// Entry point into a framing library.
pub trait FramingLibrary: Send + Sync {
    fn version(&self) -> &str;

    fn create_generator(
        &self,
        config: &FramingConfig,
        props: &FrameProps,
    ) -> Result<Box<dyn FrameGenerator>, FramingError>;

    fn create_synchronizer(
        &self,
        config: &FramingConfig,
    ) -> Result<Box<dyn FrameSynchronizer>, FramingError>;
}

/// Frame encoder. One frame is assembled, then written out in pieces.
pub trait FrameGenerator: Send {
    fn set_props(&mut self, props: &FrameProps) -> Result<(), FramingError>;

    fn assemble(&mut self, header: &[u8; HEADER_LEN], payload: &[u8]);

    /// True while an assembled frame still has samples to write.
    fn is_assembled(&self) -> bool;

    /// Write the next samples of the current frame into `out`.
    ///
    /// Returns the number written; fewer than `out.len()` means the frame
    /// ended.
    fn write(&mut self, out: &mut [Complex32]) -> usize;
}

/// Frame decoder. Reports every frame it finds through `on_frame`,
/// synchronously and in stream order.
pub trait FrameSynchronizer: Send {
    fn execute(&mut self, samples: &[Complex32], on_frame: &mut dyn FnMut(FrameEvent<'_>));

    fn reset(&mut self);
}

fn lock<T>(shared: &Mutex<T>) -> Result<MutexGuard<'_, T>, FramingError> {
    shared.lock().map_err(|_| FramingError::Poisoned)
}

/// Decode little-endian complex floats; a trailing partial sample is ignored.
fn read_samples(bytes: &[u8], samples: &mut Vec<Complex32>) {
    samples.clear();
    samples.extend(bytes.chunks_exact(COMPLEX_ITEM_SIZE).map(|chunk| {
        let re = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let im = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        Complex32::new(re, im)
    }));
}

/// Encode samples as little-endian complex floats. `out` must be large enough.
fn write_samples(samples: &[Complex32], out: &mut [u8]) {
    for (sample, chunk) in samples.iter().zip(out.chunks_exact_mut(COMPLEX_ITEM_SIZE)) {
        chunk[..4].copy_from_slice(&sample.re.to_le_bytes());
        chunk[4..].copy_from_slice(&sample.im.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_survive_the_byte_encoding() {
        let samples = vec![
            Complex32::new(1.5, -2.25),
            Complex32::new(0.0, 0.0),
            Complex32::new(-0.125, 1e6),
        ];
        let mut bytes = vec![0u8; samples.len() * COMPLEX_ITEM_SIZE];
        write_samples(&samples, &mut bytes);

        assert_eq!(&bytes[..4], &1.5f32.to_le_bytes());

        let mut decoded = Vec::new();
        read_samples(&bytes, &mut decoded);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn partial_sample_bytes_are_ignored() {
        let mut decoded = Vec::new();
        read_samples(&[0u8; 12], &mut decoded);
        assert_eq!(decoded.len(), 1);
    }
}
