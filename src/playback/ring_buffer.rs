//! Ring buffer between the sample producer and the audio output.
//!
//! One producer thread (live generator or decoded buffer) writes,
//! one consumer (the audio device) reads. Capacity is fixed, so the
//! producer gets natural backpressure instead of unbounded queueing.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{BytebeatError, Result};

/// Largest permitted allocation: 64 MB of f32 samples.
const MAX_CAPACITY: usize = 64 * 1024 * 1024 / std::mem::size_of::<f32>();

/// Fixed-capacity circular sample buffer.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Mutex<Vec<f32>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    /// Create a buffer holding at least `requested_capacity` samples,
    /// rounded up to a power of two.
    pub fn new(requested_capacity: usize) -> Result<Self> {
        if requested_capacity == 0 {
            return Err(BytebeatError::Config(
                "ring buffer capacity must be greater than 0".into(),
            ));
        }
        let capacity = requested_capacity.next_power_of_two();
        if capacity > MAX_CAPACITY {
            return Err(BytebeatError::Config(format!(
                "ring buffer capacity {capacity} exceeds maximum {MAX_CAPACITY}"
            )));
        }
        Ok(RingBuffer {
            buffer: Mutex::new(vec![0.0; capacity]),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        })
    }

    /// Samples ready to be read.
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Free space for writing.
    pub fn available_write(&self) -> usize {
        self.capacity - 1 - self.available_read()
    }

    /// Write as many samples as fit; returns the count written
    /// (0 when full, never blocks).
    pub fn write(&self, samples: &[f32]) -> usize {
        let mut buf = self.buffer.lock();
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        let used = write.wrapping_sub(read);
        let free = self.capacity - 1 - used;
        let to_write = samples.len().min(free);

        for (i, &sample) in samples[..to_write].iter().enumerate() {
            buf[(write + i) & self.mask] = sample;
        }
        self.write_pos.store(write + to_write, Ordering::Release);
        to_write
    }

    /// Read up to `out.len()` samples; returns the count read.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let buf = self.buffer.lock();
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        let available = write.wrapping_sub(read);
        let to_read = out.len().min(available);

        for (i, slot) in out[..to_read].iter_mut().enumerate() {
            *slot = buf[(read + i) & self.mask];
        }
        self.read_pos.store(read + to_read, Ordering::Release);
        to_read
    }

    /// Discard all pending samples.
    pub fn clear(&self) {
        let _buf = self.buffer.lock();
        let write = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write, Ordering::Release);
    }
}
