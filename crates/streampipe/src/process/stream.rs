//! Item-granular stream handles over the bridge pipes.
//!
//! The pipes carry raw bytes and the OS is free to split them anywhere. The
//! host only deals in whole items, so:
//! - [`ItemWriter`] accepts whole input items into a bounded staging buffer
//!   and pushes bytes out as the pipe allows. An item is consumed once it is
//!   staged, even if the OS later takes it in pieces.
//! - [`ItemReader`] hands whole output items to the host and keeps a
//!   trailing partial item for the next call.
//!
//! Would-block is zero progress, never an error. Interrupted calls retry.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use crate::carry::CarryBuffer;

fn is_would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

/// Host → child stream.
#[derive(Debug)]
pub(crate) struct ItemWriter {
    file: File,
    staged: Vec<u8>,
    capacity: usize,
    item_size: usize,
}

impl ItemWriter {
    pub(crate) fn new(fd: OwnedFd, item_size: usize, capacity: usize) -> Self {
        let capacity = capacity.max(item_size);
        Self {
            file: File::from(fd),
            staged: Vec::with_capacity(capacity),
            capacity,
            item_size,
        }
    }

    pub(crate) fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn has_room_for_item(&self) -> bool {
        self.staged.len() + self.item_size <= self.capacity
    }

    /// Push staged bytes to the pipe until it would block.
    ///
    /// Returns the number of bytes that left the staging buffer.
    pub(crate) fn flush_staged(&mut self) -> io::Result<usize> {
        let mut written = 0;
        while written < self.staged.len() {
            match self.file.write(&self.staged[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_would_block(&e) => break,
                Err(e) => {
                    self.staged.drain(..written);
                    return Err(e);
                }
            }
        }
        self.staged.drain(..written);
        Ok(written)
    }

    /// Accept as many whole items from `input` as the pipe and staging
    /// buffer allow. Returns the number of items consumed.
    ///
    /// With `unbuffered` set the staged bytes are pushed to the pipe before
    /// returning; otherwise they wait until the buffer fills.
    pub(crate) fn write_items(&mut self, input: &[u8], unbuffered: bool) -> io::Result<usize> {
        let offered = input.len() / self.item_size;
        let mut consumed = 0;

        loop {
            let room = (self.capacity - self.staged.len()) / self.item_size;
            let take = room.min(offered - consumed);
            if take > 0 {
                let start = consumed * self.item_size;
                let end = start + take * self.item_size;
                self.staged.extend_from_slice(&input[start..end]);
                consumed += take;
            }

            if consumed == offered && self.has_room_for_item() {
                break;
            }
            if self.flush_staged()? == 0 {
                break;
            }
        }

        if unbuffered {
            self.flush_staged()?;
        }

        Ok(consumed)
    }

    /// Blocking-mode close path: write everything still staged.
    ///
    /// On error the unwritten bytes stay staged.
    pub(crate) fn finish(&mut self) -> io::Result<()> {
        while !self.staged.is_empty() {
            match self.file.write(&self.staged) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.staged.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.file.flush()
    }

    /// Discard staged bytes that can no longer be delivered.
    pub(crate) fn discard_staged(&mut self) -> usize {
        let n = self.staged.len();
        self.staged.clear();
        n
    }
}

impl AsFd for ItemWriter {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for ItemWriter {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Child → host stream.
#[derive(Debug)]
pub(crate) struct ItemReader {
    file: File,
    carry: CarryBuffer,
    scratch: Vec<u8>,
    eof: bool,
}

impl ItemReader {
    pub(crate) fn new(fd: OwnedFd, item_size: usize) -> Self {
        Self {
            file: File::from(fd),
            carry: CarryBuffer::new(item_size),
            scratch: Vec::new(),
            eof: false,
        }
    }

    /// True once the child closed its stdout.
    pub(crate) fn at_eof(&self) -> bool {
        self.eof
    }

    #[cfg(test)]
    pub(crate) fn leftover_len(&self) -> usize {
        self.carry.leftover_len()
    }

    /// Read until `want` bytes arrived, the pipe would block, or EOF.
    fn fill_scratch(&mut self, want: usize) -> io::Result<usize> {
        self.scratch.resize(want, 0);
        let mut filled = 0;
        while filled < want {
            match self.file.read(&mut self.scratch[filled..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_would_block(&e) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Fill `out` with whole items. Returns the number of items produced.
    pub(crate) fn read_items(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let item_size = self.carry.item_size();
        let capacity = out.len() - out.len() % item_size;
        let want = capacity.saturating_sub(self.carry.leftover_len());
        if want == 0 || self.eof {
            return Ok(0);
        }

        let filled = self.fill_scratch(want)?;
        let mut session = self.carry.begin(out);
        session.deposit(&self.scratch[..filled]);
        Ok(session.finish())
    }

    /// Non-blocking read of whatever is available, appended to `sink`.
    pub(crate) fn read_available(&mut self, sink: &mut Vec<u8>, chunk: usize) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let filled = self.fill_scratch(chunk)?;
        sink.extend_from_slice(&self.scratch[..filled]);
        Ok(filled)
    }

    /// Move the trailing partial item out; it precedes anything read later.
    pub(crate) fn take_leftover(&mut self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(self.carry.leftover());
        self.carry.clear();
    }

    /// One blocking read of up to `chunk` bytes into `sink`.
    pub(crate) fn read_chunk(&mut self, sink: &mut Vec<u8>, chunk: usize) -> io::Result<usize> {
        self.scratch.resize(chunk, 0);
        let n = self.file.read(&mut self.scratch[..chunk])?;
        if n == 0 {
            self.eof = true;
        }
        sink.extend_from_slice(&self.scratch[..n]);
        Ok(n)
    }
}

impl AsFd for ItemReader {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for ItemReader {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fd::{cloexec_pipe, set_nonblocking};

    fn nonblocking_pair(item_size: usize, capacity: usize) -> (ItemWriter, ItemReader) {
        let (read, write) = cloexec_pipe().unwrap();
        set_nonblocking(&read).unwrap();
        set_nonblocking(&write).unwrap();
        (
            ItemWriter::new(write, item_size, capacity),
            ItemReader::new(read, item_size),
        )
    }

    #[test]
    fn buffered_writer_holds_items_until_full() {
        let (mut writer, mut reader) = nonblocking_pair(4, 16);
        let mut out = [0u8; 64];

        assert_eq!(writer.write_items(&[1u8; 8], false).unwrap(), 2);
        assert_eq!(writer.staged_len(), 8);
        assert_eq!(reader.read_items(&mut out).unwrap(), 0);

        // Filling the buffer forces it out.
        assert_eq!(writer.write_items(&[2u8; 8], false).unwrap(), 2);
        assert_eq!(writer.staged_len(), 0);
        assert_eq!(reader.read_items(&mut out).unwrap(), 4);
    }

    #[test]
    fn unbuffered_writer_flushes_every_call() {
        let (mut writer, mut reader) = nonblocking_pair(4, 4096);
        let mut out = [0u8; 64];

        assert_eq!(writer.write_items(&[9u8; 12], true).unwrap(), 3);
        assert_eq!(writer.staged_len(), 0);
        assert_eq!(reader.read_items(&mut out).unwrap(), 3);
        assert_eq!(&out[..12], &[9u8; 12]);
    }

    #[test]
    fn writer_ignores_trailing_partial_item() {
        let (mut writer, _reader) = nonblocking_pair(4, 64);
        assert_eq!(writer.write_items(&[0u8; 10], true).unwrap(), 2);
    }

    #[test]
    fn full_pipe_limits_consumption() {
        let (mut writer, mut reader) = nonblocking_pair(8, 8192);
        let input = vec![0xabu8; 1 << 20];

        let consumed = writer.write_items(&input, true).unwrap();
        assert!(consumed > 0);
        assert!(consumed < input.len() / 8);

        // Only what fits in the staging buffer moves until the reader makes room.
        let stalled = writer.write_items(&input[consumed * 8..], true).unwrap();
        assert!(stalled * 8 <= 8192);

        let mut out = vec![0u8; 1 << 16];
        assert!(reader.read_items(&mut out).unwrap() > 0);
        assert!(writer.write_items(&input[consumed * 8..], true).unwrap() > 0);
    }

    #[test]
    fn reader_keeps_partial_item() {
        let (read, write) = cloexec_pipe().unwrap();
        set_nonblocking(&read).unwrap();
        let mut writer = ItemWriter::new(write, 1, 64);
        let mut reader = ItemReader::new(read, 4);
        let mut out = [0u8; 16];

        writer.write_items(b"abcdefg", true).unwrap();
        assert_eq!(reader.read_items(&mut out).unwrap(), 1);
        assert_eq!(&out[..4], b"abcd");
        assert_eq!(reader.leftover_len(), 3);

        let mut rest = Vec::new();
        reader.take_leftover(&mut rest);
        assert_eq!(rest, b"efg");
        assert_eq!(reader.leftover_len(), 0);
    }

    #[test]
    fn reader_reports_eof_without_error() {
        let (writer, mut reader) = nonblocking_pair(4, 64);
        drop(writer);

        let mut out = [0u8; 16];
        assert_eq!(reader.read_items(&mut out).unwrap(), 0);
        assert!(reader.at_eof());
    }

    #[test]
    fn empty_pipe_is_zero_progress() {
        let (_writer, mut reader) = nonblocking_pair(4, 64);
        let mut out = [0u8; 16];
        assert_eq!(reader.read_items(&mut out).unwrap(), 0);
        assert!(!reader.at_eof());
    }

    #[test]
    fn finish_keeps_bytes_the_reader_never_took() {
        let (read, write) = cloexec_pipe().unwrap();
        let mut writer = ItemWriter::new(write, 4, 64);
        writer.staged.extend_from_slice(&[7u8; 12]);
        drop(read);

        assert!(writer.finish().is_err());
        assert_eq!(writer.discard_staged(), 12);
    }
}
