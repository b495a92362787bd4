//! Frame generator → `cat` child → frame synchronizer, all driven like a host
//! scheduler would: fixed-size regions, whatever each block manages per call.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use streampipe::framing::loopback::LoopbackFraming;
use streampipe::{
    Block, BridgeConfig, COMPLEX_ITEM_SIZE, FrameGenBlock, FrameSyncBlock, FramingConfig,
    PipeFilter, WorkIo,
};

/// Bytes waiting between two blocks.
#[derive(Default)]
struct Edge {
    bytes: Vec<u8>,
}

impl Edge {
    fn push(&mut self, region: &[u8]) {
        self.bytes.extend_from_slice(region);
    }

    fn pop(&mut self, items: usize, item_size: usize) {
        self.bytes.drain(..items * item_size);
    }
}

/// One scheduler pass over `block`: offer what's queued upstream, append
/// what it produced downstream.
fn step(
    block: &mut dyn Block,
    upstream: &mut Edge,
    downstream: &mut Edge,
    out_items: usize,
) -> bool {
    let offered = upstream.bytes.len() - upstream.bytes.len() % block.input_item_size();
    let mut out = vec![0u8; out_items * block.output_item_size()];
    let outcome = block
        .general_work(WorkIo::new(&upstream.bytes[..offered], &mut out))
        .unwrap();
    upstream.pop(outcome.consumed, block.input_item_size());
    downstream.push(&out[..outcome.produced * block.output_item_size()]);
    !outcome.is_idle()
}

#[test]
fn payload_survives_generator_pipe_and_synchronizer() {
    let library = Arc::new(LoopbackFraming);
    let config = FramingConfig::default().with_max_payload_in(200);
    let mut generator = FrameGenBlock::new(library.clone(), config.clone(), 1).unwrap();
    let mut sync = FrameSyncBlock::new(library, config.with_output_item_size(4)).unwrap();
    let pipe_config = BridgeConfig::new("cat", COMPLEX_ITEM_SIZE)
        .with_output_item_size(COMPLEX_ITEM_SIZE)
        .with_unbuffered(true);
    let mut filter = PipeFilter::new(pipe_config).unwrap();

    let message: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
    let mut source = Edge::default();
    source.push(&message);
    let mut modulated = Edge::default();
    let mut piped = Edge::default();
    let mut sink = Edge::default();

    let deadline = Instant::now() + Duration::from_secs(20);
    while sink.bytes.len() < message.len() {
        assert!(Instant::now() < deadline, "pipeline stalled at {} bytes", sink.bytes.len());
        let mut moved = step(&mut generator, &mut source, &mut modulated, 128);
        moved |= step(&mut filter, &mut modulated, &mut piped, 256);
        moved |= step(&mut sync, &mut piped, &mut sink, 64);
        if !moved {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    assert_eq!(sink.bytes, message);
    let counters = sync.counters().unwrap();
    assert_eq!(counters.frames, 5);
    assert_eq!(counters.headers_rejected + counters.payloads_rejected, 0);
    assert!(filter.shutdown().exit.is_clean());
}
