//! FrameSyncBlock - recovers frame payloads from complex samples.
//!
//! The synchronizer reports payloads through a callback of whatever length
//! the frames carried. They go through a [`CarryBuffer`] so the host only
//! ever sees whole output items; partial items wait for the next frame.

use std::sync::{Arc, Mutex};

use num_complex::Complex32;
use serde::Serialize;

use super::{FrameEvent, FrameSynchronizer, FramingLibrary, lock, read_samples};
use crate::block::{Block, WorkIo, WorkOutcome, check_aligned};
use crate::carry::CarryBuffer;
use crate::config::{COMPLEX_ITEM_SIZE, FramingConfig};
use crate::error::{FramingError, Result};

/// Frame counts since the block was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounters {
    pub frames: u64,
    pub headers_rejected: u64,
    pub payloads_rejected: u64,
    pub payload_bytes: u64,
}

impl SyncCounters {
    fn record(&mut self, event: &FrameEvent<'_>) -> bool {
        self.frames += 1;
        if !event.header_valid {
            self.headers_rejected += 1;
            tracing::debug!(frame = self.frames, "Frame header failed its check");
            return false;
        }
        if !event.payload_valid {
            self.payloads_rejected += 1;
            tracing::debug!(frame = self.frames, "Frame payload failed its check");
            return false;
        }
        self.payload_bytes += event.payload.len() as u64;
        true
    }
}

struct SyncState {
    synchronizer: Box<dyn FrameSynchronizer>,
    carry: CarryBuffer,
    counters: SyncCounters,
    samples: Vec<Complex32>,
}

/// Resets or inspects a [`FrameSyncBlock`] from any thread.
#[derive(Clone)]
pub struct FrameSyncControl {
    shared: Arc<Mutex<SyncState>>,
}

impl std::fmt::Debug for FrameSyncControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSyncControl").finish_non_exhaustive()
    }
}

impl FrameSyncControl {
    /// Drop any partially received frame and search afresh.
    ///
    /// Payload bytes already decoded stay queued for the host.
    pub fn reset(&self) -> Result<(), FramingError> {
        lock(&self.shared)?.synchronizer.reset();
        tracing::debug!("Synchronizer reset");
        Ok(())
    }

    pub fn counters(&self) -> Result<SyncCounters, FramingError> {
        Ok(lock(&self.shared)?.counters)
    }
}

#[derive(Debug)]
pub struct FrameSyncBlock {
    control: FrameSyncControl,
    output_item_size: usize,
    /// Samples taken per call at most.
    max_input: usize,
    relative_rate: f64,
}

impl FrameSyncBlock {
    pub fn new(
        library: Arc<dyn FramingLibrary>,
        config: FramingConfig,
    ) -> Result<Self, FramingError> {
        config.validate()?;
        tracing::info!(version = library.version(), "Framing library loaded");

        let synchronizer = library.create_synchronizer(&config)?;
        let max_input_bytes = config.symbol_len() * config.max_payload_out * COMPLEX_ITEM_SIZE;

        Ok(Self {
            control: FrameSyncControl {
                shared: Arc::new(Mutex::new(SyncState {
                    synchronizer,
                    carry: CarryBuffer::new(config.output_item_size),
                    counters: SyncCounters::default(),
                    samples: Vec::new(),
                })),
            },
            output_item_size: config.output_item_size,
            max_input: max_input_bytes / COMPLEX_ITEM_SIZE,
            relative_rate: config.max_payload_out as f64 / max_input_bytes as f64,
        })
    }

    pub fn control(&self) -> FrameSyncControl {
        self.control.clone()
    }

    pub fn reset(&self) -> Result<(), FramingError> {
        self.control.reset()
    }

    pub fn counters(&self) -> Result<SyncCounters, FramingError> {
        self.control.counters()
    }
}

impl Block for FrameSyncBlock {
    fn name(&self) -> &str {
        "ofdm_frame_sync"
    }

    fn input_item_size(&self) -> usize {
        COMPLEX_ITEM_SIZE
    }

    fn output_item_size(&self) -> usize {
        self.output_item_size
    }

    fn relative_rate(&self) -> f64 {
        self.relative_rate
    }

    fn general_work(&mut self, io: WorkIo<'_>) -> Result<WorkOutcome> {
        check_aligned("synchronizer input", io.input.len(), COMPLEX_ITEM_SIZE)?;
        check_aligned("synchronizer output", io.output.len(), self.output_item_size)?;

        let mut guard = lock(&self.control.shared)?;
        let SyncState {
            synchronizer,
            carry,
            counters,
            samples,
        } = &mut *guard;

        let mut session = carry.begin(io.output);
        // Earlier payloads still queued: take no input until they are out.
        let consumed = if session.spilled_len() > 0 {
            0
        } else {
            (io.input.len() / COMPLEX_ITEM_SIZE).min(self.max_input)
        };
        if consumed > 0 {
            read_samples(&io.input[..consumed * COMPLEX_ITEM_SIZE], samples);
            synchronizer.execute(samples.as_slice(), &mut |event| {
                if counters.record(&event) {
                    session.deposit(event.payload);
                }
            });
        }
        let produced = session.finish();

        tracing::trace!(
            consumed,
            produced,
            leftover = carry.leftover_len(),
            spilled = carry.spilled_len(),
            "Synchronizer work"
        );
        Ok(WorkOutcome { consumed, produced })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::framing::loopback::LoopbackFraming;
    use crate::framing::{FrameGenBlock, FrameGenerator, FrameProps, FrameStats, HEADER_LEN};

    fn modulate(payloads: &[&[u8]]) -> Vec<u8> {
        let mut generator =
            FrameGenBlock::new(Arc::new(LoopbackFraming), FramingConfig::default(), 1).unwrap();
        let mut stream = Vec::new();
        let mut out = vec![0u8; 4096 * COMPLEX_ITEM_SIZE];
        for payload in payloads {
            let outcome = generator.general_work(WorkIo::new(payload, &mut out)).unwrap();
            assert_eq!(outcome.consumed, payload.len());
            stream.extend_from_slice(&out[..outcome.produced * COMPLEX_ITEM_SIZE]);
        }
        stream
    }

    fn loopback_sync(output_item_size: usize) -> FrameSyncBlock {
        let config = FramingConfig::default().with_output_item_size(output_item_size);
        FrameSyncBlock::new(Arc::new(LoopbackFraming), config).unwrap()
    }

    #[test]
    fn payloads_reach_the_host_in_whole_items() {
        let stream = modulate(&[b"abcdefghij", b"klm", b"nop"]);
        let mut block = loopback_sync(4);
        let mut out = [0u8; 64];

        let outcome = block.general_work(WorkIo::new(&stream, &mut out)).unwrap();
        assert_eq!(outcome.consumed, stream.len() / COMPLEX_ITEM_SIZE);
        assert_eq!(outcome.produced, 4);
        assert_eq!(&out[..16], b"abcdefghijklmnop");

        let counters = block.counters().unwrap();
        assert_eq!(counters.frames, 3);
        assert_eq!(counters.payload_bytes, 16);
    }

    #[test]
    fn partial_item_waits_for_the_next_frame() {
        let mut block = loopback_sync(8);
        let mut out = [0u8; 64];

        let first = modulate(&[b"0123456789"]);
        let outcome = block.general_work(WorkIo::new(&first, &mut out)).unwrap();
        assert_eq!(outcome.produced, 1);
        assert_eq!(&out[..8], b"01234567");

        let second = modulate(&[b"abcdef"]);
        let outcome = block.general_work(WorkIo::new(&second, &mut out)).unwrap();
        assert_eq!(outcome.produced, 1);
        assert_eq!(&out[..8], b"89abcdef");
    }

    #[test]
    fn input_is_clamped_per_call() {
        let mut block = loopback_sync(8);
        let input = vec![0u8; 20_000 * COMPLEX_ITEM_SIZE];
        let mut out = [0u8; 64];

        let outcome = block.general_work(WorkIo::new(&input, &mut out)).unwrap();
        assert_eq!(outcome.consumed, 80 * 116);
        assert_eq!(outcome.produced, 0);
    }

    #[test]
    fn rate_matches_the_clamp() {
        let block = loopback_sync(8);
        assert_eq!(block.name(), "ofdm_frame_sync");
        let expected = 116.0 / (80.0 * 116.0 * 8.0);
        assert!((block.relative_rate() - expected).abs() < 1e-12);
        // 1/640 isn't exact in binary; the quotient may land one below.
        let advised = block.forecast(1000);
        assert!(advised == 640_000 || advised == 639_999, "advised {advised}");
    }

    #[test]
    fn small_output_region_spills_without_loss() {
        let stream = modulate(&[b"a long payload that will not fit at once"]);
        let mut block = loopback_sync(2);
        let mut out = [0u8; 8];

        let outcome = block.general_work(WorkIo::new(&stream, &mut out)).unwrap();
        assert_eq!(outcome.produced, 4);
        let mut collected = out.to_vec();

        loop {
            let outcome = block.general_work(WorkIo::new(&[], &mut out)).unwrap();
            if outcome.produced == 0 {
                break;
            }
            collected.extend_from_slice(&out[..outcome.produced * 2]);
        }
        assert_eq!(collected, b"a long payload that will not fit at once");
    }

    #[test]
    fn queued_payload_holds_back_input() {
        let payloads: Vec<Vec<u8>> = (0..40u8).map(|i| vec![i; 1024]).collect();
        let frames: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
        let stream = modulate(&frames);
        let expected = payloads.concat();

        let mut block = loopback_sync(8);
        let spilled = |block: &FrameSyncBlock| {
            lock(&block.control.shared).unwrap().carry.spilled_len()
        };
        let mut out = [0u8; 8];
        let mut offset = 0;
        let mut collected = Vec::new();
        let mut peak = 0;

        for _ in 0..100_000 {
            if collected.len() == expected.len() {
                break;
            }
            let queued = spilled(&block);
            let outcome = block
                .general_work(WorkIo::new(&stream[offset..], &mut out))
                .unwrap();
            if queued > out.len() {
                assert_eq!(outcome.consumed, 0);
            }
            offset += outcome.consumed * COMPLEX_ITEM_SIZE;
            collected.extend_from_slice(&out[..outcome.produced * 8]);
            peak = peak.max(spilled(&block));
        }

        assert_eq!(collected, expected);
        // One call's clamp of samples plus a frame that straddled the previous call.
        assert!(peak <= 80 * 116 + 1024, "spill peaked at {peak}");
    }

    /// Emits one scripted event per non-empty execute call.
    struct Scripted {
        events: Arc<Mutex<VecDeque<(bool, Vec<u8>, bool)>>>,
        resets: Arc<AtomicUsize>,
    }

    impl FrameSynchronizer for Scripted {
        fn execute(&mut self, samples: &[Complex32], on_frame: &mut dyn FnMut(FrameEvent<'_>)) {
            if samples.is_empty() {
                return;
            }
            let next = self.events.lock().unwrap().pop_front();
            if let Some((header_valid, payload, payload_valid)) = next {
                on_frame(FrameEvent {
                    header: &[0; HEADER_LEN],
                    header_valid,
                    payload: &payload,
                    payload_valid,
                    stats: FrameStats::default(),
                });
            }
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedLibrary {
        events: Arc<Mutex<VecDeque<(bool, Vec<u8>, bool)>>>,
        resets: Arc<AtomicUsize>,
    }

    impl FramingLibrary for ScriptedLibrary {
        fn version(&self) -> &str {
            "scripted"
        }

        fn create_generator(
            &self,
            _config: &FramingConfig,
            _props: &FrameProps,
        ) -> Result<Box<dyn FrameGenerator>, FramingError> {
            Err(FramingError::Create("generator".into()))
        }

        fn create_synchronizer(
            &self,
            _config: &FramingConfig,
        ) -> Result<Box<dyn FrameSynchronizer>, FramingError> {
            Ok(Box::new(Scripted {
                events: self.events.clone(),
                resets: self.resets.clone(),
            }))
        }
    }

    fn scripted(events: Vec<(bool, Vec<u8>, bool)>) -> (FrameSyncBlock, Arc<AtomicUsize>) {
        let resets = Arc::new(AtomicUsize::new(0));
        let library = ScriptedLibrary {
            events: Arc::new(Mutex::new(events.into())),
            resets: resets.clone(),
        };
        let config = FramingConfig::default().with_output_item_size(4);
        (FrameSyncBlock::new(Arc::new(library), config).unwrap(), resets)
    }

    #[test]
    fn rejected_frames_are_counted_not_emitted() {
        let (mut block, _) = scripted(vec![
            (false, b"bad header".to_vec(), true),
            (true, b"bad payload".to_vec(), false),
            (true, Vec::new(), true),
            (true, b"good".to_vec(), true),
        ]);
        let mut out = [0u8; 32];
        let mut produced = Vec::new();
        for _ in 0..4 {
            let outcome = block
                .general_work(WorkIo::new(&[0u8; COMPLEX_ITEM_SIZE], &mut out))
                .unwrap();
            produced.extend_from_slice(&out[..outcome.produced * 4]);
        }
        assert_eq!(produced, b"good");

        insta::assert_json_snapshot!(block.counters().unwrap(), @r#"
        {
          "frames": 4,
          "headers_rejected": 1,
          "payloads_rejected": 1,
          "payload_bytes": 4
        }
        "#);
    }

    #[test]
    fn reset_goes_through_the_guard() {
        let (block, resets) = scripted(Vec::new());
        let control = block.control();

        std::thread::spawn(move || control.reset().unwrap())
            .join()
            .unwrap();
        block.reset().unwrap();
        assert_eq!(resets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn misaligned_output_is_rejected() {
        let mut block = loopback_sync(4);
        let mut out = [0u8; 6];
        let err = block.general_work(WorkIo::new(&[], &mut out)).unwrap_err();
        assert!(matches!(
            err,
            crate::error::BlockError::Misaligned { item_size: 4, .. }
        ));
    }
}
