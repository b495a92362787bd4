//! CarryBuffer - releases byte payloads to the host in whole items only.
//!
//! The host can only advance its output region in whole-item strides, but the
//! byte sources feeding it (a framing decoder callback, a non-blocking pipe)
//! deliver arbitrary lengths. CarryBuffer keeps the trailing partial item
//! between calls and hands everything else over.
//!
//! A host call opens a [`DepositSession`] over its output region. The session
//! borrows both the carry state and the region, so the cursor cannot outlive
//! the call. Whole items that don't fit the region are spilled and emitted
//! first by the next session; bytes never reorder across leftover and spill.

use std::collections::VecDeque;

/// Carry state that survives between host calls.
#[derive(Debug)]
pub struct CarryBuffer {
    item_size: usize,
    /// Trailing partial item. Always shorter than `item_size`.
    leftover: Vec<u8>,
    /// Whole items released but not yet written. Always item-aligned.
    spill: VecDeque<u8>,
}

impl CarryBuffer {
    /// Carry state for items of `item_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `item_size` is zero.
    pub fn new(item_size: usize) -> Self {
        assert!(item_size > 0, "item size must be non-zero");
        Self {
            item_size,
            leftover: Vec::with_capacity(item_size),
            spill: VecDeque::new(),
        }
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    pub fn leftover(&self) -> &[u8] {
        &self.leftover
    }

    pub fn leftover_len(&self) -> usize {
        self.leftover.len()
    }

    /// Bytes of whole items waiting for room in a later host call.
    pub fn spilled_len(&self) -> usize {
        self.spill.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leftover.is_empty() && self.spill.is_empty()
    }

    /// Drop all carried bytes.
    pub fn clear(&mut self) {
        self.leftover.clear();
        self.spill.clear();
    }

    /// Start a host call writing into `out`.
    ///
    /// Any trailing bytes of `out` that can't hold a whole item are ignored.
    /// Spilled items from earlier calls are written first.
    pub fn begin<'a>(&'a mut self, out: &'a mut [u8]) -> DepositSession<'a> {
        let usable = out.len() - out.len() % self.item_size;
        let mut session = DepositSession {
            carry: self,
            out: &mut out[..usable],
            written: 0,
        };
        session.drain_spill();
        session
    }
}

/// Output cursor for one host call.
#[derive(Debug)]
pub struct DepositSession<'a> {
    carry: &'a mut CarryBuffer,
    out: &'a mut [u8],
    written: usize,
}

impl DepositSession<'_> {
    fn room(&self) -> usize {
        self.out.len() - self.written
    }

    fn drain_spill(&mut self) {
        let n = self.room().min(self.carry.spill.len());
        if n == 0 {
            return;
        }
        let dst = &mut self.out[self.written..self.written + n];
        for (slot, byte) in dst.iter_mut().zip(self.carry.spill.drain(..n)) {
            *slot = byte;
        }
        self.written += n;
    }

    /// Write into the host region, spilling what doesn't fit.
    fn emit(&mut self, bytes: &[u8]) {
        let n = self.room().min(bytes.len());
        self.out[self.written..self.written + n].copy_from_slice(&bytes[..n]);
        self.written += n;
        self.carry.spill.extend(&bytes[n..]);
    }

    /// Accept one payload; returns the bytes it released as whole items.
    ///
    /// Empty payloads change nothing.
    pub fn deposit(&mut self, payload: &[u8]) -> usize {
        if payload.is_empty() {
            return 0;
        }

        let item_size = self.carry.item_size;
        let held = self.carry.leftover.len();

        if payload.len() + held < item_size {
            self.carry.leftover.extend_from_slice(payload);
            return 0;
        }

        let remainder = (payload.len() + held) % item_size;
        let (body, tail) = payload.split_at(payload.len() - remainder);

        if held > 0 {
            let mut leftover = std::mem::take(&mut self.carry.leftover);
            self.emit(&leftover);
            leftover.clear();
            self.carry.leftover = leftover;
        }
        self.emit(body);
        self.carry.leftover.extend_from_slice(tail);

        debug_assert!(self.carry.leftover.len() < item_size);
        debug_assert_eq!(self.written % item_size, 0);
        debug_assert_eq!(self.carry.spill.len() % item_size, 0);

        held + body.len()
    }

    /// Bytes written into the host region so far in this call.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Whole items written into the host region so far in this call.
    pub fn items(&self) -> usize {
        self.written / self.carry.item_size
    }

    pub fn leftover_len(&self) -> usize {
        self.carry.leftover.len()
    }

    /// Spilled bytes this call's region had no room for.
    pub fn spilled_len(&self) -> usize {
        self.carry.spill.len()
    }

    /// End the call, returning the number of items produced.
    pub fn finish(self) -> usize {
        self.items()
    }
}
