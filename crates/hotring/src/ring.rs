use crate::invariants::{
    debug_assert_bounded_span, debug_assert_commit_le_write, debug_assert_monotonic,
    debug_assert_read_le_commit,
};
use crate::{Metrics, MetricsSnapshot, RingConfig};
use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// This byte ring is multi-writer, single-reader. Three unbounded u64 cursors
// track progress (buffer offsets are computed as `cursor & mask` only when
// touching the byte buffer, which sidesteps ABA on wrap):
//
// - `write`:  next free byte. Writers reserve a window by `fetch_add`ing the
//             frame length. Never read by the consumer.
// - `commit`: high-water mark of fully copied bytes. The only cursor the
//             reader trusts for data visibility.
// - `read`:   reader's cursor. Written only by the reader.
//
// ## Writer protocol (two-phase append)
//
// 1. Reserve: `write.fetch_add(len)` claims `[start, start+len)`. The window
//    is exclusively owned by this writer from that point on.
// 2. Capacity check against `read` (Acquire: synchronizes with the reader's
//    Release store in `commit_read`, so the freed region is safe to reuse).
//    On overflow the reservation is rolled back with `fetch_sub` and the
//    append fails. The rollback must happen before any commit could cover
//    the window.
// 3. Copy bytes into the window (may wrap; no ordering needed, the window is
//    exclusively owned).
// 4. Commit: spin until `commit == start` (earlier reservations finished),
//    then Release-store `commit = start + len`. This preserves FIFO
//    visibility even when later-starting writes finish copying first: the
//    reader never observes a partially written record.
//
// ## Reader protocol
//
// 1. Load `read` Relaxed (single writer of this cursor: the reader itself).
// 2. Load `commit` Acquire (synchronizes with writers' Release stores, making
//    the committed bytes visible).
// 3. Read `[read, commit)` as at most two slices (wrap case).
// 4. `commit_read(n)` Release-stores the advanced cursor, publishing the
//    freed region to writers.
//
// =============================================================================

/// Error types for ring append operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// Not enough free space for the frame; caller should demote to the next
    /// buffer tier.
    #[error("ring is full")]
    Full,
    /// The frame can never fit, even in an empty ring.
    #[error("frame of {len} bytes exceeds ring capacity {capacity}")]
    FrameTooLarge { len: usize, capacity: usize },
}

/// Lock-free multi-writer single-reader ring of raw framed bytes.
///
/// Writers are arbitrary tasks calling [`append`](Self::append); the single
/// reader drains with [`readable`](Self::readable) + [`commit_read`](Self::commit_read).
/// Capacity is rounded up to a power of two at construction.
#[repr(C)]
pub struct ByteRing {
    // === WRITER HOT === (cache-line padded)
    /// Next free byte, reserved by writers.
    write: CachePadded<AtomicU64>,
    /// High-water mark of fully copied bytes, visible to the reader.
    commit: CachePadded<AtomicU64>,

    // === READER HOT === (cache-line padded)
    /// Reader's cursor.
    read: CachePadded<AtomicU64>,

    // === COLD STATE ===
    metrics: Metrics,
    config: RingConfig,

    // === DATA BUFFER ===
    /// Fixed-size byte storage. `Box<[u8]>` rather than `Vec<u8>`: the size
    /// never changes after construction.
    buffer: UnsafeCell<Box<[u8]>>,
}

// Safety: the cursor protocol above partitions the buffer into disjoint
// regions — each writer exclusively owns its reserved window, the reader only
// touches `[read, commit)` — and all cross-thread handoff goes through
// Release/Acquire pairs on `commit` and `read`.
unsafe impl Send for ByteRing {}
unsafe impl Sync for ByteRing {}

impl ByteRing {
    /// Creates a new ring with the given configuration.
    pub fn new(config: RingConfig) -> Self {
        let capacity = config.capacity();
        let buffer = vec![0u8; capacity].into_boxed_slice();

        Self {
            write: CachePadded::new(AtomicU64::new(0)),
            commit: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(0)),
            metrics: Metrics::new(),
            config,
            buffer: UnsafeCell::new(buffer),
        }
    }

    /// Returns the ring capacity in bytes (always a power of two).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.config.mask()
    }

    /// Returns the number of committed, unread bytes.
    #[inline]
    pub fn len(&self) -> usize {
        let commit = self.commit.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Relaxed);
        commit.wrapping_sub(read) as usize
    }

    /// Returns true if no committed bytes are waiting.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commit.load(Ordering::Relaxed) == self.read.load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------------
    // WRITER API
    // ---------------------------------------------------------------------

    /// Appends one framed record. Lock-free; never suspends.
    ///
    /// Fails with [`RingError::Full`] when the frame does not fit; the caller
    /// is expected to demote the record to a slower tier.
    pub fn append(&self, frame: &[u8]) -> Result<(), RingError> {
        let len = frame.len();
        if len == 0 {
            return Ok(());
        }
        if len > self.capacity() {
            return Err(RingError::FrameTooLarge {
                len,
                capacity: self.capacity(),
            });
        }

        // Phase 1: reserve the window.
        let start = self.write.fetch_add(len as u64, Ordering::Relaxed);
        let end = start.wrapping_add(len as u64);

        let read = self.read.load(Ordering::Acquire);
        if end.wrapping_sub(read) as usize > self.capacity() {
            // Roll back the reservation. This happens strictly before any
            // commit could cover the window, so no writer or reader ever
            // observes the abandoned range.
            self.write.fetch_sub(len as u64, Ordering::Relaxed);
            if self.config.enable_metrics {
                self.metrics.add_full_event();
            }
            return Err(RingError::Full);
        }

        // Phase 2: copy into the reserved window (wrap-aware).
        let mask = self.mask();
        let idx = (start as usize) & mask;
        let contiguous = len.min(self.capacity() - idx);

        // SAFETY: `[start, end)` is exclusively owned by this writer (claimed
        // by the fetch_add above); the reader reads only below `commit`, which
        // cannot pass `start` until this writer advances it. Raw-pointer
        // copies keep concurrent writers from forming overlapping `&mut`
        // views of the shared buffer.
        unsafe {
            let base = (*self.buffer.get()).as_mut_ptr();
            std::ptr::copy_nonoverlapping(frame.as_ptr(), base.add(idx), contiguous);
            if contiguous < len {
                std::ptr::copy_nonoverlapping(
                    frame.as_ptr().add(contiguous),
                    base,
                    len - contiguous,
                );
            }
        }

        // Phase 3: commit in reservation order.
        let backoff = Backoff::new();
        while self.commit.load(Ordering::Acquire) != start {
            if self.config.enable_metrics {
                self.metrics.add_commit_spin();
            }
            backoff.snooze();
        }

        debug_assert_monotonic!("commit", start, end);
        debug_assert_bounded_span!(end.wrapping_sub(read) as usize, self.capacity());
        self.commit.store(end, Ordering::Release);

        if self.config.enable_metrics {
            self.metrics.add_append(len as u64);
        }

        Ok(())
    }

    // ---------------------------------------------------------------------
    // READER API
    // ---------------------------------------------------------------------

    /// Returns the committed, unread bytes as up to two slices (wrap case).
    ///
    /// Returns `None` when the ring is empty. The slices stay valid until
    /// [`commit_read`](Self::commit_read) advances past them; the single-reader
    /// contract means no other call can consume them in the meantime.
    pub fn readable(&self) -> Option<(&[u8], &[u8])> {
        let read = self.read.load(Ordering::Relaxed);
        let commit = self.commit.load(Ordering::Acquire);

        debug_assert_read_le_commit!(read, commit);

        let avail = commit.wrapping_sub(read) as usize;
        if avail == 0 {
            return None;
        }

        let mask = self.mask();
        let idx = (read as usize) & mask;
        let contiguous = avail.min(self.capacity() - idx);

        // SAFETY: `[read, commit)` was published by writers' Release stores,
        // synchronized by the Acquire load above. Writers will not reuse the
        // region until `commit_read` advances `read` past it.
        unsafe {
            let base = (*self.buffer.get()).as_ptr();
            let first = std::slice::from_raw_parts(base.add(idx), contiguous);
            let second = std::slice::from_raw_parts(base, avail - contiguous);
            Some((first, second))
        }
    }

    /// Advances the read cursor after the caller has consumed `n` bytes.
    ///
    /// # Panics
    ///
    /// Debug builds assert that `n` does not exceed the committed span.
    pub fn commit_read(&self, n: usize) {
        let read = self.read.load(Ordering::Relaxed);
        let new_read = read.wrapping_add(n as u64);

        let commit = self.commit.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Relaxed);
        debug_assert_read_le_commit!(new_read, commit);
        debug_assert_commit_le_write!(commit, write);
        debug_assert_monotonic!("read", read, new_read);

        self.read.store(new_read, Ordering::Release);

        if self.config.enable_metrics {
            self.metrics.add_bytes_read(n as u64);
        }
    }

    /// Get a snapshot of metrics if enabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        if self.config.enable_metrics {
            self.metrics.snapshot()
        } else {
            MetricsSnapshot::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(ring: &ByteRing) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some((first, second)) = ring.readable() {
            out.extend_from_slice(first);
            out.extend_from_slice(second);
            ring.commit_read(out.len());
        }
        out
    }

    #[test]
    fn test_append_then_read() {
        let ring = ByteRing::new(RingConfig::new(64, false));

        ring.append(b"hello").unwrap();
        ring.append(b"world").unwrap();
        assert_eq!(ring.len(), 10);

        assert_eq!(drain(&ring), b"helloworld");
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wraparound_preserves_bytes() {
        let ring = ByteRing::new(RingConfig::new(16, false));

        // Fill and drain repeatedly so the cursors wrap the 16-byte buffer.
        for round in 0u8..10 {
            let payload = [round; 12];
            ring.append(&payload).unwrap();
            assert_eq!(drain(&ring), payload);
        }
    }

    #[test]
    fn test_full_rolls_back_and_recovers() {
        let ring = ByteRing::new(RingConfig::new(16, true));

        ring.append(&[1u8; 12]).unwrap();
        assert_eq!(ring.append(&[2u8; 8]), Err(RingError::Full));
        // The failed reservation must not disturb committed data.
        assert_eq!(ring.len(), 12);
        assert_eq!(ring.metrics().full_events, 1);

        ring.commit_read(12);
        ring.append(&[2u8; 8]).unwrap();
        assert_eq!(drain(&ring)[..8], [2u8; 8]);
    }

    #[test]
    fn test_frame_larger_than_capacity() {
        let ring = ByteRing::new(RingConfig::new(16, false));
        assert_eq!(
            ring.append(&[0u8; 17]),
            Err(RingError::FrameTooLarge {
                len: 17,
                capacity: 16
            })
        );
    }

    #[test]
    fn test_readable_returns_wrap_slices() {
        let ring = ByteRing::new(RingConfig::new(8, false));

        ring.append(&[1, 2, 3, 4, 5, 6]).unwrap();
        ring.commit_read(6);
        ring.append(&[7, 8, 9, 10]).unwrap();

        let (first, second) = ring.readable().unwrap();
        assert_eq!(first, &[7, 8]);
        assert_eq!(second, &[9, 10]);
    }

    #[test]
    fn test_empty_frame_is_noop() {
        let ring = ByteRing::new(RingConfig::new(8, false));
        ring.append(&[]).unwrap();
        assert!(ring.is_empty());
    }
}
