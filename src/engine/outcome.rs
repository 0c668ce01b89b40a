use std::sync::{Mutex, MutexGuard};

use crate::transport::TransferStatus;

/// Terminal result of one armed receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Reply of the given length sits in the receive buffer.
    Completed(usize),
    Cancelled,
    NoDevice,
    TimedOut,
    IoError(i32),
}

/// Fixed-capacity reply buffer written by the completion callback.
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: Box<[u8]>,
}

impl ReceiveBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Copies `bytes` in from the start, truncated to capacity. Returns the
    /// number of bytes stored.
    fn fill(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
        n
    }

    fn prefix(&self, len: usize) -> &[u8] {
        &self.data[..len.min(self.data.len())]
    }
}

#[derive(Debug)]
struct Slot {
    outcome: Option<TransferOutcome>,
    buffer: ReceiveBuffer,
}

/// Single-slot cell shared between the completion callback and the wait loop.
#[derive(Debug)]
pub struct Completion {
    slot: Mutex<Slot>,
}

impl Completion {
    pub fn new(capacity: usize) -> Self {
        Self {
            slot: Mutex::new(Slot {
                outcome: None,
                buffer: ReceiveBuffer::new(capacity),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // plain data, safe to use after a poisoning panic
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.lock().buffer.capacity()
    }

    /// Clears the outcome before a new receive is armed.
    pub fn reset(&self) {
        self.lock().outcome = None;
    }

    /// Completion callback body: classify the transport status and publish it.
    pub fn record(&self, status: TransferStatus, data: &[u8]) {
        let mut slot = self.lock();
        let outcome = match status {
            TransferStatus::Completed => {
                let stored = slot.buffer.fill(data);
                if stored < data.len() {
                    tracing::warn!(
                        actual = data.len(),
                        capacity = stored,
                        "Reply larger than receive buffer"
                    );
                }
                TransferOutcome::Completed(data.len())
            }
            TransferStatus::Cancelled => TransferOutcome::Cancelled,
            TransferStatus::NoDevice => TransferOutcome::NoDevice,
            TransferStatus::TimedOut => TransferOutcome::TimedOut,
            other => TransferOutcome::IoError(other.code()),
        };
        tracing::trace!(?outcome, "Receive completed");
        slot.outcome = Some(outcome);
    }

    /// Takes the outcome if the callback has written one.
    pub fn take(&self) -> Option<TransferOutcome> {
        self.lock().outcome.take()
    }

    /// Copies the first `len` bytes of the last reply out of the buffer.
    pub fn reply(&self, len: usize) -> Vec<u8> {
        self.lock().buffer.prefix(len).to_vec()
    }
}
