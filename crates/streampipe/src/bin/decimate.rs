//! decimate: keep every other complex-float sample from stdin.
//!
//! Writes items 0, 2, 4, ... to stdout and exits at end of input. Meant to
//! run as a pipe filter child with a relative rate of 0.5.

use std::io::{self, Read, Write};

use anyhow::Context;
use streampipe::COMPLEX_ITEM_SIZE;

const CHUNK: usize = 512 * COMPLEX_ITEM_SIZE;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Totals {
    read: u64,
    written: u64,
}

/// Stream `input` to `output`, dropping odd items. A trailing partial item
/// is discarded. Output is flushed after every read so a downstream pipe
/// sees samples as they arrive.
fn decimate(mut input: impl Read, mut output: impl Write) -> anyhow::Result<Totals> {
    let mut buf = vec![0u8; CHUNK];
    let mut held = 0;
    let mut kept = Vec::with_capacity(CHUNK / 2);
    let mut totals = Totals::default();

    loop {
        let n = match input.read(&mut buf[held..]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("reading stdin"),
        };
        let filled = held + n;
        let whole = filled - filled % COMPLEX_ITEM_SIZE;

        kept.clear();
        for item in buf[..whole].chunks_exact(COMPLEX_ITEM_SIZE) {
            if totals.read % 2 == 0 {
                kept.extend_from_slice(item);
                totals.written += 1;
            }
            totals.read += 1;
        }
        output.write_all(&kept).context("writing stdout")?;
        output.flush().context("flushing stdout")?;

        buf.copy_within(whole..filled, 0);
        held = filled - whole;
    }

    if held > 0 {
        tracing::warn!(bytes = held, "Discarding trailing partial sample");
    }
    Ok(totals)
}

fn main() -> anyhow::Result<()> {
    streampipe::init_tracing();

    let totals = decimate(io::stdin().lock(), io::stdout().lock())?;
    tracing::debug!(read = totals.read, written = totals.written, "Decimate finished");
    Ok(())
}
