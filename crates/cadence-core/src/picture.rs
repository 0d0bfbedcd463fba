//! Decoded picture queue.
//!
//! A fixed-capacity ring buffer between the video decode thread and the
//! refresh scheduler. Filling it is the load-shedding mechanism: when display
//! falls behind, the decode thread blocks in [`PictureQueue::push`] instead
//! of growing memory without bound.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::video::Picture;

/// Default number of picture slots.
pub const DEFAULT_PICTURE_QUEUE_SIZE: usize = 30;

/// Upper bound on a single blocking wait inside [`PictureQueue::push`].
const WAIT_QUANTUM: Duration = Duration::from_millis(10);

struct Ring {
    slots: Box<[Option<Picture>]>,
    rindex: usize,
    windex: usize,
    size: usize,
}

/// Bounded ring buffer of decoded frames.
///
/// The consumer side is two-phase: [`peek`](PictureQueue::peek) hands out the
/// head frame without removing it, and [`advance`](PictureQueue::advance)
/// retires the slot once presentation is done. The scheduler therefore never
/// holds the queue lock across the (potentially slow) present call, and a
/// concurrent push can never overwrite the slot being presented because the
/// occupied count still includes it.
pub struct PictureQueue {
    ring: Mutex<Ring>,
    not_full: Condvar,
    not_empty: Condvar,
    stopped: AtomicBool,
}

impl PictureQueue {
    /// Creates a queue with the given slot count.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "picture queue needs at least one slot");
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>();
        Self {
            ring: Mutex::new(Ring {
                slots: slots.into_boxed_slice(),
                rindex: 0,
                windex: 0,
                size: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Creates a queue with the default capacity.
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_PICTURE_QUEUE_SIZE)
    }

    /// Stores a frame at the write index, blocking while the queue is full.
    ///
    /// Any previous occupant of the slot is released before being
    /// overwritten. Returns false if the queue was stopped, in which case the
    /// frame is discarded.
    pub fn push(&self, picture: Picture) -> bool {
        let mut ring = self.ring.lock();
        while ring.size >= ring.slots.len() {
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            self.not_full.wait_for(&mut ring, WAIT_QUANTUM);
        }
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        let windex = ring.windex;
        ring.slots[windex] = Some(picture);
        ring.windex = (windex + 1) % ring.slots.len();
        ring.size += 1;
        self.not_empty.notify_one();
        true
    }

    /// Returns the head frame without removing it.
    ///
    /// The returned `Picture` shares its pixel data with the queued one, so
    /// the caller may present it after releasing the lock.
    pub fn peek(&self) -> Option<Picture> {
        let ring = self.ring.lock();
        if ring.size == 0 {
            return None;
        }
        ring.slots[ring.rindex].clone()
    }

    /// Retires the head slot after presentation, waking a blocked producer.
    ///
    /// No-op on an empty queue.
    pub fn advance(&self) {
        let mut ring = self.ring.lock();
        if ring.size == 0 {
            return;
        }
        let rindex = ring.rindex;
        ring.slots[rindex] = None;
        ring.rindex = (rindex + 1) % ring.slots.len();
        ring.size -= 1;
        self.not_full.notify_one();
    }

    /// Occupied slot count.
    pub fn len(&self) -> usize {
        self.ring.lock().size
    }

    /// Returns true if no frames are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count.
    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }

    /// Stops the queue, waking blocked producers so shutdown cannot deadlock.
    ///
    /// Remaining frames are released immediately.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let mut ring = self.ring.lock();
        for slot in ring.slots.iter_mut() {
            *slot = None;
        }
        ring.size = 0;
        ring.rindex = 0;
        ring.windex = 0;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Returns true once the queue has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Default for PictureQueue {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
