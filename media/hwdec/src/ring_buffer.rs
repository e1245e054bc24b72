// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Byte buffer between the thread receiving compressed data and the consumer thread feeding the
//! decode engine.
//!
//! Both sides block by polling: a writer waits until its data fits, a reader waits until enough
//! bytes are queued. A flush interrupts both. The lock only covers the copy-and-advance sections
//! and is never held while sleeping.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use base::debug;
use base::Clock;
use remain::sorted;
use sync::Mutex;
use thiserror::Error as ThisError;

use crate::error::Error;
use crate::error::Result;
use crate::params::PipelineParams;

/// Reasons a transfer in or out of the ring buffer did not happen.
#[sorted]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum TransferError {
    #[error("ring buffer is flushing")]
    Flushing,
    #[error("transfer of {len} bytes can never fit a {capacity} byte buffer")]
    TooLarge { len: usize, capacity: usize },
}

struct Storage {
    data: Box<[u8]>,
    read_offset: usize,
    write_offset: usize,
}

impl Storage {
    fn unread(&self) -> usize {
        self.write_offset - self.read_offset
    }

    /// Moves the unread bytes to the start of the buffer.
    fn compact(&mut self) {
        if self.read_offset == 0 {
            return;
        }
        self.data.copy_within(self.read_offset..self.write_offset, 0);
        self.write_offset -= self.read_offset;
        self.read_offset = 0;
    }

    fn reset(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;
    }

    /// Appends `src` if it fits, compacting first when allowed to. Returns whether `src` was
    /// appended.
    fn try_append(&mut self, src: &[u8], low_water_mark: usize) -> bool {
        let capacity = self.data.len();
        if capacity - self.write_offset < src.len() {
            let unread = self.unread();
            if unread < low_water_mark || unread + src.len() <= capacity {
                self.compact();
            }
            if capacity - self.write_offset < src.len() {
                return false;
            }
        }
        let end = self.write_offset + src.len();
        self.data[self.write_offset..end].copy_from_slice(src);
        self.write_offset = end;
        true
    }

    fn try_take(&mut self, dst: &mut [u8]) -> bool {
        if self.unread() < dst.len() {
            return false;
        }
        let end = self.read_offset + dst.len();
        dst.copy_from_slice(&self.data[self.read_offset..end]);
        self.read_offset = end;
        if self.read_offset == self.write_offset {
            self.reset();
        }
        true
    }
}

/// Raises a waiting indicator for as long as it is alive.
struct WaitMarker<'a>(&'a AtomicBool);

impl<'a> WaitMarker<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        WaitMarker(flag)
    }
}

impl Drop for WaitMarker<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Fixed-capacity byte FIFO with blocking, flush-interruptible reads and writes.
///
/// Intended for one writer and one reader. Writes are applied in call order, and so are reads.
pub struct RingBuffer {
    storage: Mutex<Storage>,
    capacity: usize,
    low_water_mark: usize,
    /// Mirror of `write_offset - read_offset`, updated under the storage lock.
    available: AtomicUsize,
    flushing: AtomicBool,
    input_waiting: AtomicBool,
    output_waiting: AtomicBool,
    write_poll: Duration,
    read_poll: Duration,
    flush_poll: Duration,
    flush_wait_polls: u32,
    clock: Arc<dyn Clock>,
}

impl RingBuffer {
    /// Allocates a buffer of `params.buffer_capacity` bytes.
    pub fn new(params: &PipelineParams, clock: Arc<dyn Clock>) -> Result<Self> {
        let capacity = params.buffer_capacity;
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| Error::AllocationFailed {
                what: "ring buffer",
                size: capacity,
            })?;
        data.resize(capacity, 0u8);

        Ok(RingBuffer {
            storage: Mutex::new(Storage {
                data: data.into_boxed_slice(),
                read_offset: 0,
                write_offset: 0,
            }),
            capacity,
            low_water_mark: params.low_water_mark,
            available: AtomicUsize::new(0),
            flushing: AtomicBool::new(false),
            input_waiting: AtomicBool::new(false),
            output_waiting: AtomicBool::new(false),
            write_poll: params.write_poll(),
            read_poll: params.read_poll(),
            flush_poll: params.flush_poll(),
            flush_wait_polls: params.flush_wait_polls,
            clock,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes queued for reading.
    ///
    /// Read without taking the lock, so the value may be stale by the time it is used. For the
    /// single reader it is a lower bound: only the reader can make it shrink, outside of a flush.
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    /// Whether a writer is currently blocked waiting for space.
    pub fn is_input_waiting(&self) -> bool {
        self.input_waiting.load(Ordering::SeqCst)
    }

    /// Whether a reader is currently blocked waiting for data.
    pub fn is_output_waiting(&self) -> bool {
        self.output_waiting.load(Ordering::SeqCst)
    }

    /// Copies all of `data` into the buffer, blocking until there is room for it.
    ///
    /// Unread bytes are moved to the front of the buffer only when `data` does not fit in the
    /// tail, and then only if fewer than `low_water_mark` bytes are unread or the move makes
    /// `data` fit. Dropping below the low-water mark does not compact by itself.
    ///
    /// Fails with `TransferError::Flushing` if a flush is in progress or starts while waiting,
    /// and with `TransferError::TooLarge` if `data` is larger than the whole buffer.
    pub fn write(&self, data: &[u8]) -> std::result::Result<(), TransferError> {
        if data.len() > self.capacity {
            return Err(TransferError::TooLarge {
                len: data.len(),
                capacity: self.capacity,
            });
        }

        let mut waiting = None;
        loop {
            {
                let mut storage = self.storage.lock();
                // Checked under the lock so that a flush's cursor reset either precedes this
                // check or erases the bytes written here.
                if self.is_flushing() {
                    return Err(TransferError::Flushing);
                }
                if storage.try_append(data, self.low_water_mark) {
                    self.available.store(storage.unread(), Ordering::Release);
                    return Ok(());
                }
            }
            waiting.get_or_insert_with(|| WaitMarker::new(&self.input_waiting));
            self.clock.sleep(self.write_poll);
        }
    }

    /// Fills `buf` from the buffer, blocking until enough bytes are queued.
    ///
    /// Fails with `TransferError::Flushing` if a flush is in progress or starts while waiting, in
    /// which case nothing is consumed.
    pub fn read(&self, buf: &mut [u8]) -> std::result::Result<(), TransferError> {
        if buf.len() > self.capacity {
            return Err(TransferError::TooLarge {
                len: buf.len(),
                capacity: self.capacity,
            });
        }

        let mut waiting = None;
        loop {
            {
                let mut storage = self.storage.lock();
                if self.is_flushing() {
                    return Err(TransferError::Flushing);
                }
                if storage.try_take(buf) {
                    self.available.store(storage.unread(), Ordering::Release);
                    return Ok(());
                }
            }
            waiting.get_or_insert_with(|| WaitMarker::new(&self.output_waiting));
            self.clock.sleep(self.read_poll);
        }
    }

    /// Copies up to `buf.len()` queued bytes into `buf` without waiting. Returns the number of
    /// bytes copied, which is zero if the buffer is empty.
    pub fn read_some(&self, buf: &mut [u8]) -> std::result::Result<usize, TransferError> {
        let mut storage = self.storage.lock();
        if self.is_flushing() {
            return Err(TransferError::Flushing);
        }
        let len = buf.len().min(storage.unread());
        storage.try_take(&mut buf[..len]);
        self.available.store(storage.unread(), Ordering::Release);
        Ok(len)
    }

    /// Starts a flush: pending and future transfers fail until `end_flush()` and all queued bytes
    /// are dropped.
    ///
    /// Blocked readers and writers are given `flush_wait_polls` poll intervals to notice the flush
    /// before the cursors are reset regardless.
    pub fn begin_flush(&self) {
        self.flushing.store(true, Ordering::SeqCst);

        let mut polls = 0;
        while (self.is_input_waiting() || self.is_output_waiting()) && polls < self.flush_wait_polls
        {
            self.clock.sleep(self.flush_poll);
            polls += 1;
        }
        if self.is_input_waiting() || self.is_output_waiting() {
            debug!(
                "ring buffer flush stopped waiting after {} polls (input waiting: {}, output waiting: {})",
                polls,
                self.is_input_waiting(),
                self.is_output_waiting()
            );
        }

        let mut storage = self.storage.lock();
        storage.reset();
        self.available.store(0, Ordering::Release);
    }

    pub fn end_flush(&self) {
        self.flushing.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use base::FakeClock;
    use base::SystemClock;

    use super::*;

    fn small_params(capacity: usize) -> PipelineParams {
        PipelineParams {
            buffer_capacity: capacity,
            low_water_mark: capacity / 4,
            chunk_size: capacity,
            ..Default::default()
        }
    }

    fn new_buffer(capacity: usize) -> Arc<RingBuffer> {
        Arc::new(RingBuffer::new(&small_params(capacity), Arc::new(SystemClock::new())).unwrap())
    }

    fn pattern(start: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| start.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn fifo_order_preserved() {
        let ring = new_buffer(64);
        ring.write(&pattern(0, 10)).unwrap();
        ring.write(&pattern(10, 20)).unwrap();
        assert_eq!(ring.available(), 30);

        let mut first = [0u8; 15];
        ring.read(&mut first).unwrap();
        assert_eq!(&first[..], &pattern(0, 15)[..]);

        ring.write(&pattern(30, 30)).unwrap();
        let mut rest = [0u8; 45];
        ring.read(&mut rest).unwrap();
        assert_eq!(&rest[..], &pattern(15, 45)[..]);
        assert!(ring.is_empty());
    }

    #[test]
    fn write_compacts_when_tail_is_full() {
        let ring = new_buffer(32);
        ring.write(&pattern(0, 24)).unwrap();
        let mut buf = [0u8; 20];
        ring.read(&mut buf).unwrap();

        // Only 8 bytes left at the tail, but 4 unread bytes plus 16 fit after compaction.
        ring.write(&pattern(24, 16)).unwrap();
        let mut buf = [0u8; 20];
        ring.read(&mut buf).unwrap();
        assert_eq!(&buf[..], &pattern(20, 20)[..]);
    }

    #[test]
    fn read_some_takes_what_is_queued() {
        let ring = new_buffer(64);
        let mut buf = [0u8; 16];
        assert_eq!(ring.read_some(&mut buf), Ok(0));

        ring.write(&pattern(0, 10)).unwrap();
        assert_eq!(ring.read_some(&mut buf), Ok(10));
        assert_eq!(&buf[..10], &pattern(0, 10)[..]);
        assert!(ring.is_empty());

        ring.begin_flush();
        assert_eq!(ring.read_some(&mut buf), Err(TransferError::Flushing));
        ring.end_flush();
    }

    #[test]
    fn oversized_transfers_rejected() {
        let ring = new_buffer(16);
        assert_eq!(
            ring.write(&[0u8; 17]),
            Err(TransferError::TooLarge {
                len: 17,
                capacity: 16
            })
        );
        let mut buf = [0u8; 17];
        assert!(matches!(
            ring.read(&mut buf),
            Err(TransferError::TooLarge { .. })
        ));
    }

    #[test]
    fn flush_resets_and_rejects_writes() {
        let ring = new_buffer(64);
        ring.write(&pattern(0, 40)).unwrap();

        ring.begin_flush();
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.write(&[1, 2, 3]), Err(TransferError::Flushing));
        ring.end_flush();

        assert_eq!(ring.available(), 0);
        ring.write(&[7, 8]).unwrap();
        let mut buf = [0u8; 2];
        ring.read(&mut buf).unwrap();
        assert_eq!(buf, [7, 8]);
    }

    #[test]
    fn full_buffer_write_waits_for_reader() {
        let ring = new_buffer(1024);
        ring.write(&pattern(0, 1024)).unwrap();

        let writer_ring = Arc::clone(&ring);
        let writer = thread::spawn(move || writer_ring.write(&[0xaa]));

        let start = Instant::now();
        while !ring.is_input_waiting() {
            assert!(start.elapsed() < Duration::from_secs(5), "writer never blocked");
            thread::sleep(Duration::from_millis(1));
        }

        let mut buf = [0u8; 512];
        ring.read(&mut buf).unwrap();
        assert_eq!(&buf[..], &pattern(0, 512)[..]);

        assert_eq!(writer.join().unwrap(), Ok(()));
        assert!(!ring.is_input_waiting());
        assert_eq!(ring.available(), 513);

        let mut rest = [0u8; 513];
        ring.read(&mut rest).unwrap();
        assert_eq!(&rest[..512], &pattern(0, 1024)[512..]);
        assert_eq!(rest[512], 0xaa);
    }

    #[test]
    fn flush_unblocks_reader() {
        let ring = new_buffer(64);
        ring.write(&[1, 2, 3]).unwrap();

        let reader_ring = Arc::clone(&ring);
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader_ring.read(&mut buf)
        });

        let start = Instant::now();
        while !ring.is_output_waiting() {
            assert!(start.elapsed() < Duration::from_secs(5), "reader never blocked");
            thread::sleep(Duration::from_millis(1));
        }

        ring.begin_flush();
        assert_eq!(reader.join().unwrap(), Err(TransferError::Flushing));
        assert!(!ring.is_output_waiting());
        ring.end_flush();
        assert!(ring.is_empty());
    }

    #[test]
    fn flush_unblocks_writer() {
        let ring = new_buffer(64);
        ring.write(&pattern(0, 64)).unwrap();

        let writer_ring = Arc::clone(&ring);
        let writer = thread::spawn(move || writer_ring.write(&[1, 2, 3, 4, 5, 6, 7, 8]));

        let start = Instant::now();
        while !ring.is_input_waiting() {
            assert!(start.elapsed() < Duration::from_secs(5), "writer never blocked");
            thread::sleep(Duration::from_millis(1));
        }

        ring.begin_flush();
        assert_eq!(writer.join().unwrap(), Err(TransferError::Flushing));
        assert!(!ring.is_input_waiting());
        ring.end_flush();
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn flush_wait_is_bounded() {
        let clock = Arc::new(FakeClock::new());
        let params = PipelineParams {
            flush_wait_polls: 15,
            flush_poll_ms: 1,
            ..small_params(64)
        };
        let ring = RingBuffer::new(&params, clock.clone()).unwrap();

        // Simulate a waiter that never observes the flush.
        ring.output_waiting.store(true, Ordering::SeqCst);
        ring.begin_flush();
        assert_eq!(clock.nanos(), 15_000_000);
    }
}
