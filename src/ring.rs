//! The ring buffer and its central algorithm, `advance_pointers`.
//!
//! Transcribed from `examples/original_source/src/mabutrace.c`'s
//! `advance_pointers`, with one deliberate change from the original: the
//! original always resets the eviction scan to offset 0 when a write wraps,
//! discarding the real `head` value, which over-evicts when the wrapped
//! write is small (see `spec.md` §9's "dead re-entrancy" note and
//! `DESIGN.md`'s Open Question #2). Here the scan always starts from the
//! real `head`, so a wrapped write only evicts records that are genuinely
//! overlapped by `[entry_idx, new_tail)`.
//!
//! Only `head`/`tail` live behind the lock; the byte storage is reached
//! through an `UnsafeCell` so that, as in `spec.md` §4.2's design rationale,
//! the record payload is written *after* the critical section ends. This is
//! sound because `advance_pointers` never hands out overlapping ranges to
//! two callers. The pattern mirrors the teacher's own use of `UnsafeCell` to
//! let reads/writes of fixed-size scratch buffers outlive a borrow
//! (`count::Counter::read_buf`).

use std::cell::UnsafeCell;
use std::ptr;
use std::slice;
use std::sync::Mutex;

use crate::codec::KIND_SIZES;
use crate::error::TraceError;

struct RingState {
    head: usize,
    tail: usize,
}

/// Fixed-size byte ring with two indices: `head` (oldest valid byte) and
/// `tail` (next byte to write).
pub struct Ring {
    data: UnsafeCell<Box<[u8]>>,
    capacity: usize,
    state: Mutex<RingState>,
}

// SAFETY: `data` is only ever mutated through `reserve`'s disjoint slot
// ranges (payload writes) or `zero_range` (tail-pad, itself disjoint from
// any live slot because it only clears bytes the just-reserved write has
// already claimed as no-longer-valid). Reads happen only after writers are
// drained (see `crate::snapshot`).
unsafe impl Sync for Ring {}

impl Ring {
    /// Allocates a ring buffer of exactly `capacity` bytes, zero-initialized.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::OutOfMemory`] instead of aborting the process,
    /// per `spec.md` §4.1's init contract ("returns a status indicating
    /// out-of-memory or already-initialized").
    pub fn new(capacity: usize) -> Result<Self, TraceError> {
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| TraceError::OutOfMemory { requested_bytes: capacity })?;
        buf.resize(capacity, 0);
        Ok(Self {
            data: UnsafeCell::new(buf.into_boxed_slice()),
            capacity,
            state: Mutex::new(RingState { head: 0, tail: 0 }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserves `record_size` bytes for a new record. Returns the byte
    /// offset the caller must write into. This is the only critical
    /// section in the writer hot path: it touches index bookkeeping and, in
    /// the tail-pad case, zeroes a handful of bytes — both bounded and
    /// independent of buffer size.
    ///
    /// # Panics
    ///
    /// Panics if `record_size` exceeds the ring's capacity; per `spec.md`
    /// §4.2 this is undefined behavior territory the caller must never
    /// reach (the configured buffer size must exceed the largest record).
    pub fn reserve(&self, record_size: usize) -> usize {
        assert!(
            record_size <= self.capacity,
            "record of {record_size} bytes does not fit in a {}-byte ring",
            self.capacity
        );

        let mut state = self.state.lock().unwrap();
        let tail = state.tail;

        let (entry_idx, new_tail) = if self.capacity - tail < record_size {
            // Doesn't fit before the physical end: zero the remainder as a
            // tail-pad and wrap the write to offset 0.
            self.zero_range(tail, self.capacity);
            (0, record_size)
        } else {
            (tail, tail + record_size)
        };
        state.tail = new_tail;

        let mut head = state.head;
        while head >= entry_idx && head < new_tail {
            match self.read_type_tag(head) {
                0 => {
                    // NONE: head has walked into an earlier tail-pad: the
                    // next chronological record starts at offset 0.
                    head = 0;
                    break;
                }
                tag => head += KIND_SIZES[tag as usize],
            }
        }
        if head >= self.capacity {
            head = 0;
        }
        state.head = head;

        entry_idx
    }

    /// Writes into the slot at `offset..offset+len`, which must have just
    /// been returned by [`Ring::reserve`] with a matching `len`.
    ///
    /// # Safety
    ///
    /// The caller must ensure `offset..offset+len` came from the most
    /// recent `reserve` call on this `self` for which no other slot has
    /// since been written, and that no other thread writes the same range
    /// concurrently. `advance_pointers`'s slot algebra guarantees this as
    /// long as every reservation is followed by exactly one `write_slot`.
    pub unsafe fn write_slot(&self, offset: usize, len: usize, f: impl FnOnce(&mut [u8])) {
        let ptr = (*self.data.get()).as_mut_ptr().add(offset);
        let slot = slice::from_raw_parts_mut(ptr, len);
        f(slot);
    }

    fn zero_range(&self, start: usize, end: usize) {
        if start == end {
            return;
        }
        unsafe {
            let ptr = (*self.data.get()).as_mut_ptr().add(start);
            ptr::write_bytes(ptr, 0, end - start);
        }
    }

    fn read_type_tag(&self, offset: usize) -> u8 {
        unsafe { (*self.data.get())[offset] & 0x07 }
    }

    /// Returns `(head, tail, bytes)`. Only sound to call once writers have
    /// been drained — see [`crate::writer::AdmissionGate`] — since it reads
    /// through the same `UnsafeCell` writers mutate.
    pub fn quiesced_view(&self) -> (usize, usize, &[u8]) {
        let state = self.state.lock().unwrap();
        let data: &[u8] = unsafe { &*self.data.get() };
        (state.head, state.tail, data)
    }

    #[cfg(test)]
    pub(crate) fn head_tail(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.head, state.tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, Color, RecordKind};

    fn write_duration(ring: &Ring, name: &'static str) {
        let size = codec::KIND_SIZES[RecordKind::Duration as usize];
        let offset = ring.reserve(size);
        unsafe {
            ring.write_slot(offset, size, |slot| {
                codec::write_duration(slot, false, 0, 1, Color::Undefined, 100, 0, name);
            });
        }
    }

    #[test]
    fn sequential_writes_do_not_evict_until_full() {
        let ring = Ring::new(1024).unwrap();
        for _ in 0..5 {
            write_duration(&ring, "a");
        }
        let (head, _tail) = ring.head_tail();
        assert_eq!(head, 0, "ring not yet full: nothing should be evicted");
    }

    #[test]
    fn wrap_zeroes_tail_and_writes_at_zero() {
        let size = codec::KIND_SIZES[RecordKind::Duration as usize];
        // Buffer big enough for 3 records, but sized so the 4th straddles
        // the physical end.
        let ring = Ring::new(size * 3 + size / 2).unwrap();
        for _ in 0..3 {
            write_duration(&ring, "a");
        }
        let (_, tail_before) = ring.head_tail();
        assert_eq!(tail_before, size * 3);

        let offset = ring.reserve(size);
        assert_eq!(offset, 0, "record that doesn't fit wraps to offset 0");
        let (_head, _tail, data) = ring.quiesced_view();
        // bytes from the old tail to the physical end must be zero.
        assert!(data[tail_before..].iter().all(|b| *b == 0));
    }

    #[test]
    fn eviction_only_consumes_overlapped_prefix() {
        let size = codec::KIND_SIZES[RecordKind::Duration as usize];
        let capacity = size * 4;
        let ring = Ring::new(capacity).unwrap();
        for _ in 0..4 {
            write_duration(&ring, "a");
        }
        // Buffer is now exactly full (tail == capacity would need a 5th
        // write to wrap). One more write evicts exactly one record.
        let offset = ring.reserve(size);
        unsafe {
            ring.write_slot(offset, size, |slot| {
                codec::write_duration(slot, false, 0, 1, Color::Undefined, 1, 0, "b");
            });
        }
        let (head, _tail) = ring.head_tail();
        assert_eq!(head, size, "exactly one record evicted, not the whole prefix");
    }

    #[test]
    fn small_record_after_wrap_does_not_over_evict() {
        // Regression test for the "dead re-entrancy" fix: a tiny record
        // that wraps must not blow away a `head` sitting far from offset 0.
        let link_size = codec::KIND_SIZES[RecordKind::Link as usize];
        let dur_size = codec::KIND_SIZES[RecordKind::Duration as usize];
        // One byte short of 3 durations plus a link record: the link record
        // cannot fit in the 1-byte gap remaining after the physical end, so
        // it is forced to wrap to offset 0.
        let capacity = dur_size * 3 + link_size - 1;
        let ring = Ring::new(capacity).unwrap();
        for _ in 0..3 {
            write_duration(&ring, "a");
        }
        let (head_before, tail_before) = ring.head_tail();
        assert_eq!(head_before, 0);
        assert_eq!(tail_before, dur_size * 3);

        // This link record does not fit before the physical end, so it
        // wraps to offset 0. head (0) falls inside [0, link_size), so the
        // very first duration record is evicted, and only that one.
        let offset = ring.reserve(link_size);
        assert_eq!(offset, 0);
        let (head_after, _tail_after) = ring.head_tail();
        assert!(
            head_after <= dur_size,
            "eviction must stop at the first overlapped record, not sweep the whole ring"
        );
    }
}
