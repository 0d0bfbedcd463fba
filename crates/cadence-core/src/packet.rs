//! Compressed packet queue.
//!
//! One [`PacketQueue`] instance exists per elementary stream (audio, video).
//! The demuxer side pushes compressed packets in; the decode side pulls them
//! out. The queue decouples the two so neither can stall the other for more
//! than a bounded wait.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Upper bound on a single blocking wait inside [`PacketQueue::get`].
///
/// Waiters re-check the abort flag on every wakeup, so even a lost signal
/// delays shutdown by at most one quantum.
const WAIT_QUANTUM: Duration = Duration::from_millis(10);

/// Rational scale factor converting stream timestamp ticks to seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    /// Numerator (seconds per tick = num / den)
    pub num: u32,
    /// Denominator
    pub den: u32,
}

impl TimeBase {
    /// Microsecond ticks, the usual container resolution.
    pub const MICROS: TimeBase = TimeBase {
        num: 1,
        den: 1_000_000,
    };

    /// Creates a time base of `num / den` seconds per tick.
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Converts a tick count to seconds.
    pub fn to_seconds(&self, ticks: i64) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        ticks as f64 * self.num as f64 / self.den as f64
    }

    /// Seconds spanned by a single tick.
    pub fn tick_seconds(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }
}

/// A compressed bitstream unit.
///
/// The packet is exclusively owned by whichever queue currently holds it;
/// dequeueing transfers ownership to the decode loop, which drops it after
/// the decoder has consumed it.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Compressed payload bytes
    pub data: Vec<u8>,
    /// Decode timestamp in stream ticks. `None` means the bitstream carried
    /// no timestamp for this packet, which is distinct from a timestamp of 0.
    pub pts: Option<i64>,
    /// Scale converting `pts` ticks to seconds
    pub time_base: TimeBase,
}

impl Packet {
    /// Creates a packet with a known timestamp.
    pub fn new(data: Vec<u8>, pts: i64, time_base: TimeBase) -> Self {
        Self {
            data,
            pts: Some(pts),
            time_base,
        }
    }

    /// Creates a packet without a timestamp.
    pub fn untimed(data: Vec<u8>, time_base: TimeBase) -> Self {
        Self {
            data,
            pts: None,
            time_base,
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Timestamp in seconds, if the packet carried one.
    pub fn pts_seconds(&self) -> Option<f64> {
        self.pts.map(|t| self.time_base.to_seconds(t))
    }
}

/// Signal that a queue has been aborted and no longer accepts packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl std::fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "packet queue closed")
    }
}

impl std::error::Error for QueueClosed {}

/// Outcome of a dequeue attempt.
#[derive(Debug)]
pub enum Dequeue {
    /// A packet, in FIFO order
    Packet(Packet),
    /// Nothing buffered right now (non-blocking calls only)
    Empty,
    /// The feeder marked end of stream and the queue has drained
    Ended,
    /// The queue was aborted; no further packets will ever arrive
    Closed,
}

struct QueueInner {
    packets: VecDeque<Packet>,
    /// Running byte total of all queued payloads
    byte_size: usize,
    /// Bumped on every flush so consumers can discard stale work
    serial: u64,
    aborted: bool,
    ended: bool,
}

/// Thread-safe FIFO of compressed packets.
///
/// All mutations serialize through a single lock; blocked consumers are woken
/// by puts, by [`abort`](PacketQueue::abort), or by the bounded wait quantum
/// expiring, so a shutdown request is always observed promptly.
pub struct PacketQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl PacketQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                packets: VecDeque::new(),
                byte_size: 0,
                serial: 0,
                aborted: false,
                ended: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends a packet at the tail and wakes one blocked consumer.
    ///
    /// Once the queue has been aborted the packet is dropped and
    /// `Err(QueueClosed)` returned.
    pub fn put(&self, packet: Packet) -> Result<(), QueueClosed> {
        let mut inner = self.inner.lock();
        if inner.aborted {
            return Err(QueueClosed);
        }
        inner.byte_size += packet.size();
        inner.packets.push_back(packet);
        // Signal while still holding the lock so the wakeup cannot be lost.
        self.available.notify_one();
        Ok(())
    }

    /// Pops the head packet, blocking while the queue is empty.
    ///
    /// Returns [`Dequeue::Closed`] immediately (and on every subsequent call)
    /// once the queue has been aborted, and [`Dequeue::Ended`] once the
    /// feeder has finished and the backlog is drained.
    pub fn get(&self) -> Dequeue {
        let mut inner = self.inner.lock();
        loop {
            if inner.aborted {
                return Dequeue::Closed;
            }
            if let Some(packet) = inner.packets.pop_front() {
                inner.byte_size -= packet.size();
                return Dequeue::Packet(packet);
            }
            if inner.ended {
                return Dequeue::Ended;
            }
            self.available.wait_for(&mut inner, WAIT_QUANTUM);
        }
    }

    /// Pops the head packet without blocking.
    pub fn try_get(&self) -> Dequeue {
        let mut inner = self.inner.lock();
        if inner.aborted {
            return Dequeue::Closed;
        }
        if let Some(packet) = inner.packets.pop_front() {
            inner.byte_size -= packet.size();
            return Dequeue::Packet(packet);
        }
        if inner.ended {
            return Dequeue::Ended;
        }
        Dequeue::Empty
    }

    /// Sets the abort flag and wakes every blocked caller.
    ///
    /// Idempotent; queued packets are released on the spot.
    pub fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.aborted = true;
        inner.packets.clear();
        inner.byte_size = 0;
        self.available.notify_all();
    }

    /// Marks that the feeder will produce no more packets.
    ///
    /// Consumers drain the remaining backlog, then see [`Dequeue::Ended`].
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        inner.ended = true;
        self.available.notify_all();
    }

    /// Discards all queued packets and bumps the serial number.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.packets.len();
        inner.packets.clear();
        inner.byte_size = 0;
        inner.serial = inner.serial.wrapping_add(1);
        if dropped > 0 {
            tracing::debug!("PacketQueue::flush: dropped {} packets", dropped);
        }
    }

    /// Number of packets currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().packets.len()
    }

    /// Returns true if no packets are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes of queued payload.
    pub fn byte_size(&self) -> usize {
        self.inner.lock().byte_size
    }

    /// Current flush serial.
    pub fn serial(&self) -> u64 {
        self.inner.lock().serial
    }

    /// Returns true once the queue has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.inner.lock().aborted
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}
