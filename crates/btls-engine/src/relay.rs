//! Bounded byte relay buffers.
//!
//! A relay buffer is a fixed-capacity FIFO byte queue standing in for
//! one direction of a socket: the caller moves ciphertext between the
//! wire and the relay, the backend reads and writes the relay as if it
//! were a file descriptor. Writes never block and never drop accepted
//! bytes; backpressure is expressed through `write_capacity`.

use std::collections::VecDeque;

use btls_types::EngineError;

use crate::alert::AlertLedger;

/// One direction of the in-memory transport.
#[derive(Debug)]
pub struct RelayBuffer {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl RelayBuffer {
    /// Create a relay buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self, EngineError> {
        if capacity == 0 {
            return Err(EngineError::Config(
                "relay buffer capacity must be non-zero".into(),
            ));
        }
        Ok(Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes available to read.
    pub fn read_capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes that a write can accept without truncation.
    pub fn write_capacity(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Append up to `write_capacity()` bytes from `data`, returning how
    /// many were accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.write_capacity());
        self.buf.extend(&data[..n]);
        n
    }

    /// Remove and return up to `max` bytes from the front.
    pub fn read(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.buf.len());
        self.buf.drain(..n).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// The buffer-backed descriptor handed to the backend: an inbound
/// relay (wire to backend), an outbound relay (backend to wire), and
/// the alert ledger both sides append to.
#[derive(Debug)]
pub struct BufferFd {
    pub inbound: RelayBuffer,
    pub outbound: RelayBuffer,
    pub alerts: AlertLedger,
}

impl BufferFd {
    pub fn new(capacity: usize) -> Result<Self, EngineError> {
        Ok(Self {
            inbound: RelayBuffer::new(capacity)?,
            outbound: RelayBuffer::new(capacity)?,
            alerts: AlertLedger::new(),
        })
    }
}
