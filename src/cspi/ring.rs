//! Lock-free single-producer/single-consumer byte ring.
//!
//! The main loop owns the [`Producer`] and only ever moves `head`; the SPI interrupt owns the
//! [`Consumer`] and only ever moves `tail`. Both indices stay in `0..N` and one slot is always
//! kept empty, so a ring of `N` bytes holds at most `N - 1`.
//!
//! Storage is static. A session claims it with [`SpscRing::try_split`] and releases it when both
//! handles are dropped.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Bytes queued between `tail` and `head` in a ring of `size` bytes.
pub const fn used_between(head: usize, tail: usize, size: usize) -> usize {
    if head >= tail {
        head - tail
    } else {
        size - (tail - head)
    }
}

pub struct SpscRing<const N: usize> {
    buffer: UnsafeCell<[u8; N]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    /// Live handles, 0 when the ring is free
    handles: AtomicU8,
}

// Safety: the producer only writes slots outside `tail..head`, the consumer only reads slots inside
// it, and index updates are published with release/acquire ordering.
unsafe impl<const N: usize> Sync for SpscRing<N> {}

impl<const N: usize> SpscRing<N> {
    const VALID: () = assert!(N >= 2, "ring needs at least two slots");

    pub const fn new() -> Self {
        let () = Self::VALID;
        Self {
            buffer: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            handles: AtomicU8::new(0),
        }
    }

    /// Total slots, including the one kept empty.
    pub const fn size(&self) -> usize {
        N
    }

    /// Claim the ring, emptying it.
    ///
    /// # Returns
    ///
    /// The producer and consumer handles, or `None` while a previous pair is still alive.
    pub fn try_split(&self) -> Option<(Producer<'_, N>, Consumer<'_, N>)> {
        if self
            .handles
            .compare_exchange(0, 2, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        self.head.store(0, Ordering::Release);
        self.tail.store(0, Ordering::Release);
        Some((Producer { ring: self }, Consumer { ring: self }))
    }

    pub fn is_claimed(&self) -> bool {
        self.handles.load(Ordering::Acquire) != 0
    }

    fn used(&self) -> usize {
        used_between(self.head.load(Ordering::Acquire), self.tail.load(Ordering::Acquire), N)
    }

    fn release(&self) {
        self.handles.fetch_sub(1, Ordering::AcqRel);
    }

    fn slots(&self) -> *mut u8 {
        self.buffer.get().cast::<u8>()
    }
}

impl<const N: usize> Default for SpscRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing half of a claimed ring.
pub struct Producer<'a, const N: usize> {
    ring: &'a SpscRing<N>,
}

impl<'a, const N: usize> Producer<'a, N> {
    /// Append as much of `data` as fits.
    ///
    /// # Returns
    ///
    /// The number of bytes written; the caller retries the rest later.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);
        let free = N - used_between(head, tail, N) - 1;
        let n = data.len().min(free);
        if n == 0 {
            return 0;
        }

        let first = n.min(N - head);
        // Safety: `head..head + n` (wrapping) lies in the free region the consumer does not read.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ring.slots().add(head), first);
            ptr::copy_nonoverlapping(data.as_ptr().add(first), self.ring.slots(), n - first);
        }
        self.ring.head.store((head + n) % N, Ordering::Release);
        n
    }

    /// Copy the oldest queued bytes into `out` without consuming them.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);
        let n = used_between(head, tail, N).min(out.len());
        for (i, slot) in out[..n].iter_mut().enumerate() {
            // Safety: only the producer writes slots, and it is not writing now.
            *slot = unsafe { self.ring.slots().add((tail + i) % N).read() };
        }
        n
    }

    pub fn used(&self) -> usize {
        self.ring.used()
    }

    pub fn free(&self) -> usize {
        N - self.ring.used() - 1
    }

    pub fn head(&self) -> usize {
        self.ring.head.load(Ordering::Relaxed)
    }

    pub fn tail(&self) -> usize {
        self.ring.tail.load(Ordering::Acquire)
    }

    pub const fn size(&self) -> usize {
        N
    }
}

impl<const N: usize> Drop for Producer<'_, N> {
    fn drop(&mut self) {
        self.ring.release();
    }
}

/// Reading half of a claimed ring.
pub struct Consumer<'a, const N: usize> {
    ring: &'a SpscRing<N>,
}

impl<'a, const N: usize> Consumer<'a, N> {
    /// Take the oldest byte.
    pub fn pop(&mut self) -> Option<u8> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        // Safety: `tail` is inside the region published by the producer.
        let byte = unsafe { self.ring.slots().add(tail).read() };
        self.ring.tail.store((tail + 1) % N, Ordering::Release);
        Some(byte)
    }

    /// Move queued bytes into `out`.
    pub fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let mut count = 0;
        while count < out.len() {
            match self.pop() {
                Some(byte) => {
                    out[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    pub fn used(&self) -> usize {
        self.ring.used()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.used() == 0
    }
}

impl<const N: usize> Drop for Consumer<'_, N> {
    fn drop(&mut self) {
        self.ring.release();
    }
}
