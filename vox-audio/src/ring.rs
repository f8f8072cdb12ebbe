//! Lock-free single-producer/single-consumer frame ring.
//!
//! Slots are pre-allocated at construction and hold exactly one frame each.
//! Samples are stored as `AtomicU32` bit patterns so that a reader racing
//! with an eviction never touches non-atomic memory; the race is detected
//! through the tail counter and the read is retried.
//!
//! Overflow policy: the producer (a device callback) never blocks. When the
//! ring is full it evicts the oldest unread frame and counts an overrun.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Fixed-capacity ring of fixed-length audio frames
pub struct FrameRing {
    /// Flat slot storage: `capacity * frame_len` samples
    slots: Box<[AtomicU32]>,
    frame_len: usize,
    capacity: usize,
    /// Next frame index to write (monotonic)
    head: AtomicUsize,
    /// Next frame index to read (monotonic)
    tail: AtomicUsize,
    /// Frames evicted because the ring was full
    overruns: AtomicU64,
}

impl FrameRing {
    /// Create a ring holding `capacity` frames of `frame_len` samples
    pub fn new(capacity: usize, frame_len: usize) -> Self {
        let capacity = capacity.max(1);
        let frame_len = frame_len.max(1);
        let slots = (0..capacity * frame_len)
            .map(|_| AtomicU32::new(0.0f32.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            frame_len,
            capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overruns: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Frames currently readable (approximate while the other side runs)
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames evicted by overflow
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    #[inline]
    fn slot(&self, index: usize) -> &[AtomicU32] {
        let start = (index % self.capacity) * self.frame_len;
        &self.slots[start..start + self.frame_len]
    }

    /// Write one frame. Producer side only.
    ///
    /// Returns `false` when the oldest unread frame had to be evicted to make
    /// room; the new frame is stored either way. `frame` shorter than the
    /// frame length is zero padded, longer is truncated.
    pub fn try_write(&self, frame: &[f32]) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let mut evicted = false;

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) < self.capacity {
                break;
            }
            // Full: advance the consumer past the oldest frame
            if self
                .tail
                .compare_exchange(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                evicted = true;
                self.overruns.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }

        let slot = self.slot(head);
        for (i, cell) in slot.iter().enumerate() {
            let sample = frame.get(i).copied().unwrap_or(0.0);
            cell.store(sample.to_bits(), Ordering::Relaxed);
        }

        // Publish: the frame is complete before the reader can see it
        self.head.store(head.wrapping_add(1), Ordering::Release);
        !evicted
    }

    /// Read the oldest frame into `out`. Consumer side only.
    ///
    /// Returns `false` when the ring is empty; `out` is left untouched.
    pub fn try_read(&self, out: &mut [f32]) -> bool {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            if tail == head {
                return false;
            }

            let slot = self.slot(tail);
            for (dst, cell) in out.iter_mut().zip(slot.iter()) {
                *dst = f32::from_bits(cell.load(Ordering::Relaxed));
            }

            // A failed exchange means the producer evicted this frame while we
            // copied it; the copy may be torn, so try the next one.
            if self
                .tail
                .compare_exchange(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if out.len() > self.frame_len {
                    out[self.frame_len..].fill(0.0);
                }
                return true;
            }
        }
    }

    /// Discard every unread frame. Consumer side only.
    pub fn clear(&self) {
        let head = self.head.load(Ordering::Acquire);
        self.tail.store(head, Ordering::Release);
    }
}
