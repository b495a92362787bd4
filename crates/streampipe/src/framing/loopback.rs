//! Byte-transparent framing library.
//!
//! Carries each header and payload byte as one real-valued sample behind a
//! marker sample, with additive checksums at the end, and pads frames to
//! whole OFDM symbols with silence. No modulation happens, so it runs
//! anywhere and makes the framing blocks testable end to end without the
//! DSP library.
//!
//! Frame layout, one sample per entry:
//! `MARKER, len_lo, len_hi, header[8], payload[len], header_sum, payload_sum, 0...`

use num_complex::Complex32;

use super::{
    FrameEvent, FrameGenerator, FrameProps, FrameStats, FrameSynchronizer, FramingLibrary,
    HEADER_LEN,
};
use crate::config::FramingConfig;
use crate::error::FramingError;

const MARKER: Complex32 = Complex32 { re: -1.0, im: -1.0 };
const LEN_BYTES: usize = 2;
const SUM_BYTES: usize = 2;

/// Largest payload one loopback frame can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

fn byte_sample(byte: u8) -> Complex32 {
    Complex32::new(f32::from(byte), 0.0)
}

fn sample_byte(sample: Complex32) -> u8 {
    sample.re.round().clamp(0.0, 255.0) as u8
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackFraming;

impl FramingLibrary for LoopbackFraming {
    fn version(&self) -> &str {
        concat!("loopback-", env!("CARGO_PKG_VERSION"))
    }

    fn create_generator(
        &self,
        config: &FramingConfig,
        _props: &FrameProps,
    ) -> Result<Box<dyn FrameGenerator>, FramingError> {
        if config.max_payload_in > MAX_PAYLOAD {
            return Err(FramingError::Create(format!(
                "generator: payload limit {} exceeds {MAX_PAYLOAD}",
                config.max_payload_in
            )));
        }
        Ok(Box::new(LoopbackGenerator {
            symbol_len: config.symbol_len(),
            frame: Vec::new(),
            cursor: 0,
        }))
    }

    fn create_synchronizer(
        &self,
        config: &FramingConfig,
    ) -> Result<Box<dyn FrameSynchronizer>, FramingError> {
        Ok(Box::new(LoopbackSynchronizer {
            symbol_len: config.symbol_len(),
            state: SyncState::Search,
        }))
    }
}

#[derive(Debug)]
struct LoopbackGenerator {
    symbol_len: usize,
    frame: Vec<Complex32>,
    cursor: usize,
}

impl FrameGenerator for LoopbackGenerator {
    // Samples carry bytes directly; there is nothing to reconfigure.
    fn set_props(&mut self, _props: &FrameProps) -> Result<(), FramingError> {
        Ok(())
    }

    fn assemble(&mut self, header: &[u8; HEADER_LEN], payload: &[u8]) {
        let payload = &payload[..payload.len().min(MAX_PAYLOAD)];
        let len = (payload.len() as u16).to_le_bytes();

        self.frame.clear();
        self.frame.push(MARKER);
        self.frame.extend(len.iter().copied().map(byte_sample));
        self.frame.extend(header.iter().copied().map(byte_sample));
        self.frame.extend(payload.iter().copied().map(byte_sample));
        self.frame.push(byte_sample(checksum(header)));
        self.frame.push(byte_sample(checksum(payload)));

        let padded = self.frame.len().div_ceil(self.symbol_len) * self.symbol_len;
        self.frame.resize(padded, Complex32::new(0.0, 0.0));
        self.cursor = 0;
    }

    fn is_assembled(&self) -> bool {
        self.cursor < self.frame.len()
    }

    fn write(&mut self, out: &mut [Complex32]) -> usize {
        let n = out.len().min(self.frame.len() - self.cursor);
        out[..n].copy_from_slice(&self.frame[self.cursor..self.cursor + n]);
        self.cursor += n;
        n
    }
}

#[derive(Debug)]
enum SyncState {
    Search,
    Frame { bytes: Vec<u8>, need: usize, span: usize },
}

#[derive(Debug)]
struct LoopbackSynchronizer {
    symbol_len: usize,
    state: SyncState,
}

impl LoopbackSynchronizer {
    fn emit(&self, bytes: &[u8], span: usize, on_frame: &mut dyn FnMut(FrameEvent<'_>)) {
        let header_end = LEN_BYTES + HEADER_LEN;
        let payload_end = bytes.len() - SUM_BYTES;
        let header = &bytes[LEN_BYTES..header_end];
        let payload = &bytes[header_end..payload_end];

        on_frame(FrameEvent {
            header,
            header_valid: checksum(header) == bytes[payload_end],
            payload,
            payload_valid: checksum(payload) == bytes[payload_end + 1],
            stats: FrameStats {
                symbols: span.div_ceil(self.symbol_len),
                ..FrameStats::default()
            },
        });
    }
}

impl FrameSynchronizer for LoopbackSynchronizer {
    fn execute(&mut self, samples: &[Complex32], on_frame: &mut dyn FnMut(FrameEvent<'_>)) {
        for &sample in samples {
            match &mut self.state {
                SyncState::Search => {
                    if sample == MARKER {
                        self.state = SyncState::Frame {
                            bytes: Vec::new(),
                            need: LEN_BYTES,
                            span: 1,
                        };
                    }
                }
                SyncState::Frame { bytes, need, span } => {
                    bytes.push(sample_byte(sample));
                    *span += 1;
                    if bytes.len() == LEN_BYTES {
                        let len = usize::from(u16::from_le_bytes([bytes[0], bytes[1]]));
                        *need = LEN_BYTES + HEADER_LEN + len + SUM_BYTES;
                    }
                    if bytes.len() == *need {
                        let done = std::mem::replace(&mut self.state, SyncState::Search);
                        if let SyncState::Frame { bytes, span, .. } = done {
                            self.emit(&bytes, span, on_frame);
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.state = SyncState::Search;
    }
}
