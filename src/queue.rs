//! A fixed-capacity, lock-free MPMC ring used to move events between the host's real-time threads
//! and the queue worker. Both directions of the plugin-client bridge run over one of these.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// Dmitry Vyukov's bounded MPMC queue. Each cell carries a sequence number that encodes whether it
/// currently holds a value and which "lap" of the ring it belongs to, so producers and consumers
/// never contend on more than a single compare-and-swap.
///
/// The capacity `N` must be a power of two and at least 2. This is checked at compile time when
/// the queue is instantiated.
///
/// Real-time safety: no operation allocates, blocks, or makes OS calls. Pushing from the audio
/// thread and popping from the worker thread is the intended (but not the only supported) usage.
pub struct MpmcQueue<T, const N: usize> {
    buffer: Box<[Cell<T>]>,
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
}

struct Cell<T> {
    sequence: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send, const N: usize> Send for MpmcQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for MpmcQueue<T, N> {}

impl<T, const N: usize> Default for MpmcQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> MpmcQueue<T, N> {
    // Referenced from `new()` so an invalid capacity fails the build instead of misbehaving at
    // runtime. The index mask below relies on this.
    const VALID_CAPACITY: () = assert!(
        N >= 2 && N & (N - 1) == 0,
        "capacity must be a power of two >= 2"
    );

    const MASK: u64 = (N as u64) - 1;

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::VALID_CAPACITY;

        let buffer = (0..N as u64)
            .map(|i| Cell {
                sequence: AtomicU64::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            buffer,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Try to enqueue a value. Returns the value back when the queue is full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[(pos & Self::MASK) as usize];
            let seq = cell.sequence.load(Ordering::Acquire);
            let dif = seq as i64 - pos as i64;
            if dif == 0 {
                // The cell is free on this lap, try to claim it
                match self.head.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*cell.value.get()).write(value) };
                        cell.sequence.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                // Queue is full
                return Err(value);
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Enqueue a value, discarding the oldest element when the queue is full. Used on producer
    /// paths that prefer dropping stale events over blocking. Returns `false` only when the queue
    /// stayed full through the retry, which means consumers and competing producers are churning
    /// faster than we can make room.
    pub fn push(&self, value: T) -> bool {
        match self.try_push(value) {
            Ok(()) => true,
            Err(value) => {
                if self.pop().is_none() {
                    return false;
                }
                self.try_push(value).is_ok()
            }
        }
    }

    /// Dequeue the oldest value, if any.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[(pos & Self::MASK) as usize];
            let seq = cell.sequence.load(Ordering::Acquire);
            let dif = seq as i64 - (pos + 1) as i64;
            if dif == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*cell.value.get()).assume_init_read() };
                        // Free the cell for the next lap
                        cell.sequence.store(pos + N as u64, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                // Queue is empty
                return None;
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Best-effort size. Exact only when no push or pop is in flight.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.saturating_sub(tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> Drop for MpmcQueue<T, N> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}
