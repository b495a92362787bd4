//! FrameGenBlock - packs input bytes into OFDM frames.
//!
//! Each frame carries up to `max_payload_in` bytes of input (whole input
//! items only) and an 8-byte header holding the little-endian frame counter.
//! A frame that doesn't fit the host's output region is finished on later
//! calls before any more input is taken.

use std::sync::{Arc, Mutex};

use num_complex::Complex32;

use super::{FrameGenerator, FrameProps, FramingLibrary, Scheme, lock, write_samples};
use crate::block::{Block, WorkIo, WorkOutcome, check_aligned};
use crate::config::{COMPLEX_ITEM_SIZE, FramingConfig};
use crate::error::{FramingError, Result};

struct GenState {
    generator: Option<Box<dyn FrameGenerator>>,
    scheme: &'static Scheme,
    frame_count: u64,
    scratch: Vec<Complex32>,
}

impl GenState {
    /// Apply `scheme`, creating the generator on first use.
    fn configure(
        &mut self,
        library: &dyn FramingLibrary,
        config: &FramingConfig,
        scheme: &'static Scheme,
    ) -> Result<(), FramingError> {
        let props = FrameProps::from(scheme);
        match self.generator.as_mut() {
            Some(generator) => {
                generator.set_props(&props)?;
                self.frame_count = 0;
            }
            None => self.generator = Some(library.create_generator(config, &props)?),
        }
        self.scheme = scheme;
        tracing::info!(mode = scheme.mode, scheme = scheme.name, "Set frame scheme");
        Ok(())
    }
}

/// Reconfigures a [`FrameGenBlock`] from any thread.
///
/// Calls wait for an in-flight work call to finish.
#[derive(Clone)]
pub struct FrameGenControl {
    library: Arc<dyn FramingLibrary>,
    config: Arc<FramingConfig>,
    shared: Arc<Mutex<GenState>>,
}

impl std::fmt::Debug for FrameGenControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGenControl")
            .field("library", &self.library.version())
            .finish_non_exhaustive()
    }
}

impl FrameGenControl {
    /// Switch modulation/coding. Restarts the frame counter.
    pub fn set_mcs(&self, mode: u32) -> Result<(), FramingError> {
        let scheme = Scheme::lookup(mode)?;
        lock(&self.shared)?.configure(&*self.library, &self.config, scheme)
    }

    pub fn scheme(&self) -> Result<&'static Scheme, FramingError> {
        Ok(lock(&self.shared)?.scheme)
    }

    /// Frames assembled since the scheme was last set.
    pub fn frame_count(&self) -> Result<u64, FramingError> {
        Ok(lock(&self.shared)?.frame_count)
    }
}

#[derive(Debug)]
pub struct FrameGenBlock {
    control: FrameGenControl,
    input_item_size: usize,
    /// Payload bytes per frame, rounded down to whole input items.
    frame_payload: usize,
}

impl FrameGenBlock {
    pub fn new(
        library: Arc<dyn FramingLibrary>,
        config: FramingConfig,
        input_item_size: usize,
    ) -> Result<Self, FramingError> {
        config.validate()?;
        if input_item_size == 0 || input_item_size > config.max_payload_in {
            return Err(FramingError::Config(format!(
                "input item size must be 1..={}, got {input_item_size}",
                config.max_payload_in
            )));
        }
        tracing::info!(version = library.version(), "Framing library loaded");

        let scheme = Scheme::lookup(config.initial_scheme)?;
        let mut state = GenState {
            generator: None,
            scheme,
            frame_count: 0,
            scratch: Vec::new(),
        };
        state.configure(&*library, &config, scheme)?;

        let frame_payload = config.max_payload_in - config.max_payload_in % input_item_size;
        Ok(Self {
            control: FrameGenControl {
                library,
                config: Arc::new(config),
                shared: Arc::new(Mutex::new(state)),
            },
            input_item_size,
            frame_payload,
        })
    }

    /// Handle for reconfiguring this block from another thread.
    pub fn control(&self) -> FrameGenControl {
        self.control.clone()
    }

    pub fn set_mcs(&self, mode: u32) -> Result<(), FramingError> {
        self.control.set_mcs(mode)
    }
}

impl Block for FrameGenBlock {
    fn name(&self) -> &str {
        "ofdm_frame_gen"
    }

    fn input_item_size(&self) -> usize {
        self.input_item_size
    }

    fn output_item_size(&self) -> usize {
        COMPLEX_ITEM_SIZE
    }

    fn relative_rate(&self) -> f64 {
        (self.control.config.symbol_len() * self.input_item_size) as f64
    }

    fn general_work(&mut self, io: WorkIo<'_>) -> Result<WorkOutcome> {
        check_aligned("generator input", io.input.len(), self.input_item_size)?;
        check_aligned("generator output", io.output.len(), COMPLEX_ITEM_SIZE)?;

        let mut guard = lock(&self.control.shared)?;
        let GenState {
            generator,
            frame_count,
            scratch,
            ..
        } = &mut *guard;
        let generator = generator
            .as_mut()
            .ok_or_else(|| FramingError::Create("generator".into()))?;

        let capacity = io.output.len() / COMPLEX_ITEM_SIZE;
        scratch.resize(capacity, Complex32::default());

        let mut consumed = 0;
        let mut produced = 0;
        while produced < capacity {
            if !generator.is_assembled() {
                let take = (io.input.len() - consumed).min(self.frame_payload);
                if take == 0 {
                    break;
                }
                let header = frame_count.to_le_bytes();
                generator.assemble(&header, &io.input[consumed..consumed + take]);
                tracing::debug!(frame = *frame_count, bytes = take, "Assembled frame");
                *frame_count += 1;
                consumed += take;
            }
            let written = generator.write(&mut scratch[produced..capacity]);
            if written == 0 {
                break;
            }
            produced += written;
        }

        write_samples(&scratch[..produced], io.output);
        Ok(WorkOutcome {
            consumed: consumed / self.input_item_size,
            produced,
        })
    }
}
