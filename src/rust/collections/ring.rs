// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A fixed-size circular byte buffer. Producers write at the back, consumers read from the front.
pub struct RingBuffer {
    // Underlying storage. Its length is the capacity of the ring buffer.
    buffer: Box<[u8]>,
    // Indexes the first byte in the front of the ring buffer.
    head: usize,
    // Indexes the first empty slot after the byte in the back of the ring buffer.
    tail: usize,
    // Number of occupied bytes. Needed to tell a full ring from an empty one, since both have `head == tail`.
    len: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl RingBuffer {
    /// Creates a ring buffer that holds up to `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self, Fail> {
        if capacity == 0 {
            return Err(Fail::new(libc::EINVAL, "cannot create a ring buffer with zero capacity"));
        }

        let mut storage: Vec<u8> = Vec::new();
        if let Err(e) = storage.try_reserve_exact(capacity) {
            let cause: String = format!("failed to allocate ring buffer storage (capacity={}, error={:?})", capacity, e);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::ENOMEM, &cause));
        }
        storage.resize(capacity, 0);

        Ok(Self {
            buffer: storage.into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        })
    }

    /// Returns the capacity of the target ring buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the number of bytes that were written and not yet read.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns the number of bytes that may still be written.
    pub fn available(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Appends all of `bytes` at the back of the ring buffer. Nothing is written if they do not fit.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, Fail> {
        if bytes.len() > self.available() {
            let cause: String = format!(
                "insufficient space in ring buffer (requested={}, available={})",
                bytes.len(),
                self.available()
            );
            debug!("write(): {}", cause);
            return Err(Fail::new(libc::ENOBUFS, &cause));
        }

        let capacity: usize = self.capacity();
        let first: usize = bytes.len().min(capacity - self.tail);
        self.buffer[self.tail..self.tail + first].copy_from_slice(&bytes[..first]);
        self.buffer[..bytes.len() - first].copy_from_slice(&bytes[first..]);

        self.tail = (self.tail + bytes.len()) % capacity;
        self.len += bytes.len();
        Ok(bytes.len())
    }

    /// Removes up to `max_len` bytes from the front of the ring buffer.
    pub fn read(&mut self, max_len: usize) -> Vec<u8> {
        let bytes: Vec<u8> = self.peek(0, max_len);
        self.discard(bytes.len());
        bytes
    }

    /// Copies up to `max_len` bytes starting `offset` bytes past the front, without consuming them.
    pub fn peek(&self, offset: usize, max_len: usize) -> Vec<u8> {
        if offset >= self.len {
            return Vec::new();
        }
        let count: usize = max_len.min(self.len - offset);
        let capacity: usize = self.capacity();
        let start: usize = (self.head + offset) % capacity;
        let first: usize = count.min(capacity - start);

        let mut bytes: Vec<u8> = Vec::with_capacity(count);
        bytes.extend_from_slice(&self.buffer[start..start + first]);
        bytes.extend_from_slice(&self.buffer[..count - first]);
        bytes
    }

    /// Drops up to `count` bytes from the front of the ring buffer and returns how many were dropped.
    pub fn discard(&mut self, count: usize) -> usize {
        let count: usize = count.min(self.len);
        self.head = (self.head + count) % self.capacity();
        self.len -= count;
        count
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
