//! Single-producer single-consumer byte ring.
//!
//! Layout: a header of five `u32` words `[capacity, read, write,
//! write_notify, read_notify]` followed by `capacity` data bytes. Frames are
//! `len: u32, type: u16, flags: u16, payload, zero pad to 4`, little-endian.
//! One byte is always left free so `read == write` means empty.
//!
//! When a frame does not fit before the end of the data region the producer
//! writes [`WRAP_MARKER`] in place of a length and continues at offset 0; the
//! consumer follows the marker. The write offset is published with release
//! ordering only after the whole frame is in place; the consumer reads it
//! with acquire ordering before touching the bytes.
//!
//! Each ring has exactly one [`RingWriter`] and one [`RingReader`]. Neither
//! is `Clone`; moving a handle moves the right to produce or consume.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub const FRAME_HEADER_BYTES: usize = 8;
pub const MIN_CAPACITY: usize = 1024;
pub const WRAP_MARKER: u32 = 0xFFFF_FFFF;
/// `flags` bit 0: the frame may be dropped under pressure.
pub const FLAG_DROPPABLE: u16 = 1 << 0;

const H_CAP: usize = 0;
const H_READ: usize = 1;
const H_WRITE: usize = 2;
const H_WNOTIFY: usize = 3;
const H_RNOTIFY: usize = 4;
const HEADER_WORDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    #[error("ring full")]
    Full,
    #[error("frame of {need} bytes can never fit a ring of {capacity} bytes")]
    TooLarge { need: usize, capacity: usize },
    #[error("ring capacity must be >= {MIN_CAPACITY} and a multiple of 4, got {0}")]
    InvalidCapacity(usize),
}

/// A dequeued frame. The payload is copied out of the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingMessage {
    pub msg_type: u16,
    pub flags: u16,
    pub payload: Vec<u8>,
}

impl RingMessage {
    pub fn is_droppable(&self) -> bool {
        self.flags & FLAG_DROPPABLE != 0
    }
}

/// Occupancy at one instant, as seen from either end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub capacity: usize,
    pub read: usize,
    pub write: usize,
    pub used: usize,
    pub free: usize,
}

struct SharedRing {
    header: [AtomicU32; HEADER_WORDS],
    data: Box<[UnsafeCell<u8>]>,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

// SAFETY: the data region is only written by the single producer, into bytes
// the consumer cannot reach until the release store of the write offset, and
// only read by the single consumer, from bytes the producer cannot reach until
// the release store of the read offset. Handle uniqueness guarantees one of each.
unsafe impl Sync for SharedRing {}

impl SharedRing {
    fn capacity(&self) -> usize {
        self.header[H_CAP].load(Ordering::Relaxed) as usize
    }

    fn data_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.data.as_ptr())
    }

    /// # Safety
    /// `at + src.len()` must be within the data region and the range must be
    /// owned by the producer.
    unsafe fn write_at(&self, at: usize, src: &[u8]) {
        debug_assert!(at + src.len() <= self.data.len());
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.data_ptr().add(at), src.len()) };
    }

    /// # Safety
    /// `at + dst.len()` must be within the data region and the range must be
    /// owned by the consumer.
    unsafe fn read_at(&self, at: usize, dst: &mut [u8]) {
        debug_assert!(at + dst.len() <= self.data.len());
        unsafe { ptr::copy_nonoverlapping(self.data_ptr().add(at), dst.as_mut_ptr(), dst.len()) };
    }

    unsafe fn read_u32(&self, at: usize) -> u32 {
        let mut b = [0u8; 4];
        unsafe { self.read_at(at, &mut b) };
        u32::from_le_bytes(b)
    }

    fn stats(&self) -> RingStats {
        let capacity = self.capacity();
        let read = self.header[H_READ].load(Ordering::Acquire) as usize;
        let write = self.header[H_WRITE].load(Ordering::Acquire) as usize;
        let used = if write >= read {
            write - read
        } else {
            capacity - (read - write)
        };
        RingStats {
            capacity,
            read,
            write,
            used,
            free: free_space(capacity, read, write),
        }
    }
}

fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

fn free_space(cap: usize, read: usize, write: usize) -> usize {
    if write >= read {
        cap - (write - read) - 1
    } else {
        read - write - 1
    }
}

/// Allocate a ring and return its two ends.
pub fn channel(capacity: usize) -> Result<(RingWriter, RingReader), RingError> {
    if capacity < MIN_CAPACITY || capacity % 4 != 0 || capacity > u32::MAX as usize {
        return Err(RingError::InvalidCapacity(capacity));
    }
    let shared = Arc::new(SharedRing {
        header: [
            AtomicU32::new(capacity as u32),
            AtomicU32::new(0),
            AtomicU32::new(0),
            AtomicU32::new(0),
            AtomicU32::new(0),
        ],
        data: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
        enqueued: AtomicU64::new(0),
        dequeued: AtomicU64::new(0),
    });
    Ok((
        RingWriter {
            ring: Arc::clone(&shared),
        },
        RingReader { ring: shared },
    ))
}

/// Producer end.
pub struct RingWriter {
    ring: Arc<SharedRing>,
}

impl RingWriter {
    /// Append one frame without blocking.
    pub fn enqueue(&mut self, msg_type: u16, flags: u16, payload: &[u8]) -> Result<(), RingError> {
        let ring = &*self.ring;
        let cap = ring.capacity();
        let need = FRAME_HEADER_BYTES + pad4(payload.len());
        if need + 1 > cap || payload.len() >= WRAP_MARKER as usize {
            return Err(RingError::TooLarge { need, capacity: cap });
        }

        let read = ring.header[H_READ].load(Ordering::Acquire) as usize;
        let mut write = ring.header[H_WRITE].load(Ordering::Relaxed) as usize;

        if write >= read && cap - write < need {
            // Wrapping onto offset 0 must not make write == read.
            if read == 0 {
                return Err(RingError::Full);
            }
            // SAFETY: write < cap and cap - write >= 4 since offsets and cap are
            // multiples of 4; bytes from write to cap are free.
            unsafe { ring.write_at(write, &WRAP_MARKER.to_le_bytes()) };
            write = 0;
            ring.header[H_WRITE].store(0, Ordering::Release);
            ring.header[H_WNOTIFY].fetch_add(1, Ordering::Release);
        }

        if free_space(cap, read, write) < need {
            return Err(RingError::Full);
        }

        let mut head = [0u8; FRAME_HEADER_BYTES];
        head[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        head[4..6].copy_from_slice(&msg_type.to_le_bytes());
        head[6..8].copy_from_slice(&flags.to_le_bytes());
        let pad = pad4(payload.len()) - payload.len();
        // SAFETY: free_space >= need, so [write, write + need) is free and lies
        // before cap (either write < read, or cap - write >= need).
        unsafe {
            ring.write_at(write, &head);
            ring.write_at(write + FRAME_HEADER_BYTES, payload);
            if pad > 0 {
                ring.write_at(write + FRAME_HEADER_BYTES + payload.len(), &[0u8; 3][..pad]);
            }
        }

        let next = write + need;
        let next = if next >= cap { 0 } else { next };
        ring.header[H_WRITE].store(next as u32, Ordering::Release);
        ring.header[H_WNOTIFY].fetch_add(1, Ordering::Release);
        ring.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }

    /// Frames consumed so far; bumps once per successful dequeue.
    pub fn read_notify(&self) -> u32 {
        self.ring.header[H_RNOTIFY].load(Ordering::Acquire)
    }

    pub fn enqueued(&self) -> u64 {
        self.ring.enqueued.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RingWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingWriter").field("stats", &self.stats()).finish()
    }
}

/// Consumer end.
pub struct RingReader {
    ring: Arc<SharedRing>,
}

impl RingReader {
    /// Take the oldest frame, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<RingMessage> {
        let ring = &*self.ring;
        let cap = ring.capacity();
        let mut read = ring.header[H_READ].load(Ordering::Relaxed) as usize;
        let write = ring.header[H_WRITE].load(Ordering::Acquire) as usize;
        if read == write {
            return None;
        }

        // SAFETY: read != write, so the consumer owns the bytes at read.
        if cap - read < FRAME_HEADER_BYTES || unsafe { ring.read_u32(read) } == WRAP_MARKER {
            read = 0;
            ring.header[H_READ].store(0, Ordering::Release);
            if read == write {
                return None;
            }
        }

        let mut head = [0u8; FRAME_HEADER_BYTES];
        // SAFETY: the producer published a complete frame at read.
        unsafe { ring.read_at(read, &mut head) };
        let len = u32::from_le_bytes([head[0], head[1], head[2], head[3]]) as usize;
        let msg_type = u16::from_le_bytes([head[4], head[5]]);
        let flags = u16::from_le_bytes([head[6], head[7]]);

        let mut payload = vec![0u8; len];
        // SAFETY: the frame never straddles cap.
        unsafe { ring.read_at(read + FRAME_HEADER_BYTES, &mut payload) };

        let next = read + FRAME_HEADER_BYTES + pad4(len);
        let next = if next >= cap { 0 } else { next };
        ring.header[H_READ].store(next as u32, Ordering::Release);
        ring.header[H_RNOTIFY].fetch_add(1, Ordering::Release);
        ring.dequeued.fetch_add(1, Ordering::Relaxed);

        Some(RingMessage {
            msg_type,
            flags,
            payload,
        })
    }

    pub fn is_empty(&self) -> bool {
        let s = self.ring.stats();
        s.read == s.write
    }

    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }

    /// Frames produced so far; bumps once per successful enqueue.
    pub fn write_notify(&self) -> u32 {
        self.ring.header[H_WNOTIFY].load(Ordering::Acquire)
    }

    pub fn dequeued(&self) -> u64 {
        self.ring.dequeued.load(Ordering::Relaxed)
    }
}

impl Iterator for RingReader {
    type Item = RingMessage;

    fn next(&mut self) -> Option<RingMessage> {
        self.dequeue()
    }
}

impl std::fmt::Debug for RingReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingReader").field("stats", &self.stats()).finish()
    }
}
