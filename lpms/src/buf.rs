//! Growable circular byte buffer used to de-frame the inbound stream
//!
//! `read` and `filled` only ever increase, the index of a byte in `data` is its cursor
//! value modulo the capacity. Bytes in `retained..filled` are never overwritten, this is
//! what allows a partially received frame to be rewound to its start marker.

use crate::{connection::Connection, error::LpmsResult};

pub const DEFAULT_CAPACITY: usize = 1024;
pub const MIN_CAPACITY: usize = 16;

#[derive(Debug)]
pub struct RingBuffer {
    data: Vec<u8>,
    read: usize,
    filled: usize,
    retained: usize,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        RingBuffer {
            data: vec![0; capacity.max(MIN_CAPACITY)],
            read: 0,
            filled: 0,
            retained: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Total number of bytes consumed so far
    #[cfg(test)]
    pub fn read_position(&self) -> usize {
        self.read
    }

    /// Bytes received but not yet consumed
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.filled - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.filled
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }

        let byte = self.data[self.read % self.data.len()];
        self.read += 1;

        Some(byte)
    }

    /// Protects everything from the last consumed byte onwards so [`Self::rewind`] can
    /// return to it
    pub fn mark_last(&mut self) {
        self.retained = self.read.saturating_sub(1);
    }

    /// Moves the read cursor back to the marked byte
    pub fn rewind(&mut self) {
        self.read = self.retained;
    }

    /// Drops the mark, consumed bytes may be overwritten again
    pub fn release(&mut self) {
        self.retained = self.read;
    }

    /// Grows the buffer so at least `size` bytes fit, keeps all unconsumed and marked bytes
    pub fn reserve(&mut self, size: usize) {
        if size <= self.data.len() {
            return;
        }

        let capacity = (self.data.len() * 2).max(size);
        let mut data = vec![0; capacity];
        for position in self.retained..self.filled {
            data[position % capacity] = self.data[position % self.data.len()];
        }

        self.data = data;
    }

    /// Number of bytes that can be received before wrapping or clobbering marked data
    fn writable(&self) -> usize {
        let capacity = self.data.len();
        let free = capacity - (self.filled - self.retained);
        let until_wrap = capacity - self.filled % capacity;

        free.min(until_wrap)
    }

    /// Moves up to `available` bytes from the connection into the buffer
    pub fn fill_from<C: Connection + ?Sized>(
        &mut self,
        connection: &C,
        available: usize,
    ) -> LpmsResult<usize> {
        let amount = available.min(self.writable());
        if amount == 0 {
            return Ok(0);
        }

        let offset = self.filled % self.data.len();
        let received = connection.read_into(&mut self.data[offset..offset + amount])?;
        self.filled += received;

        Ok(received)
    }

    /// Copies bytes into the buffer as if they had been received, returns how many fit
    #[cfg(test)]
    pub fn extend_from_slice(&mut self, mut bytes: &[u8]) -> usize {
        let mut total = 0;
        while !bytes.is_empty() {
            let amount = bytes.len().min(self.writable());
            if amount == 0 {
                break;
            }

            let offset = self.filled % self.data.len();
            self.data[offset..offset + amount].copy_from_slice(&bytes[..amount]);
            self.filled += amount;
            bytes = &bytes[amount..];
            total += amount;
        }

        total
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{RingBuffer, MIN_CAPACITY};

    #[test]
    fn minimum_capacity() {
        assert_eq!(RingBuffer::with_capacity(0).capacity(), MIN_CAPACITY);
    }

    #[test]
    fn wraparound() {
        let mut buffer = RingBuffer::with_capacity(16);

        for round in 0..10u8 {
            let bytes = [round; 10];
            assert_eq!(buffer.extend_from_slice(&bytes), 10);
            assert_eq!(buffer.pending(), 10);

            for _ in 0..10 {
                assert_eq!(buffer.pop(), Some(round));
                buffer.release();
            }
            assert_eq!(buffer.pop(), None);
        }

        assert_eq!(buffer.read_position(), 100);
    }

    #[test]
    fn does_not_overwrite_unread() {
        let mut buffer = RingBuffer::with_capacity(16);
        assert_eq!(buffer.extend_from_slice(&[1; 20]), 16);
        assert_eq!(buffer.pending(), 16);
    }

    #[test]
    fn rewind_to_mark() {
        let mut buffer = RingBuffer::with_capacity(16);
        buffer.extend_from_slice(&[9, 9, 0x3A, 1, 2, 3]);

        buffer.pop();
        buffer.pop();
        assert_eq!(buffer.pop(), Some(0x3A));
        buffer.mark_last();
        buffer.pop();
        buffer.pop();

        // Marked bytes are protected from new data
        assert_eq!(buffer.extend_from_slice(&[0; 16]), 12);

        buffer.rewind();
        assert_eq!(buffer.read_position(), 2);
        assert_eq!(buffer.pop(), Some(0x3A));
        assert_eq!(buffer.pop(), Some(1));
    }

    #[test]
    fn growth_keeps_contents_across_wrap() {
        let mut buffer = RingBuffer::with_capacity(16);
        buffer.extend_from_slice(&[0; 12]);
        for _ in 0..12 {
            buffer.pop();
        }
        buffer.release();

        // Wraps around the end of the backing storage
        let bytes = (0..10).collect::<Vec<u8>>();
        assert_eq!(buffer.extend_from_slice(&bytes), 10);
        assert_eq!(buffer.pop(), Some(0));
        buffer.mark_last();

        buffer.reserve(40);
        assert_eq!(buffer.capacity(), 40);

        buffer.rewind();
        let drained = std::iter::from_fn(|| buffer.pop()).collect::<Vec<_>>();
        assert_eq!(drained, bytes);
    }

    #[test]
    fn growth_is_geometric() {
        let mut buffer = RingBuffer::with_capacity(16);
        buffer.reserve(17);
        assert_eq!(buffer.capacity(), 32);
        buffer.reserve(20);
        assert_eq!(buffer.capacity(), 32);
    }
}
