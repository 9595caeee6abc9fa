//! Fixed-capacity batching
//!
//! The batcher is pure buffer state. It hands each full batch out by value, so the
//! caller owns it for the whole commit attempt and cannot push more records into it
//! meanwhile.

use std::num::NonZeroUsize;

use crate::record::Record;

/// Default number of records committed per transaction
pub const DEFAULT_BATCH_CAPACITY: usize = 100;

/// An ordered group of records committed as one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    sequence: u64,
    records: Vec<Record>,
}

impl Batch {
    /// 1-based position of this batch within its job
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Accumulates records in source order and emits full batches
#[derive(Debug)]
pub struct Batcher {
    capacity: NonZeroUsize,
    buffer: Vec<Record>,
    emitted: u64,
}

impl Batcher {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            buffer: Vec::with_capacity(capacity.get()),
            emitted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Records currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Batches emitted so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Buffer `record`; returns the batch once the buffer reaches capacity
    pub fn push(&mut self, record: Record) -> Option<Batch> {
        self.buffer.push(record);
        if self.buffer.len() < self.capacity.get() {
            return None;
        }
        let full = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.capacity.get()));
        Some(self.seal(full))
    }

    /// Flush the trailing short batch at end of source, if any
    pub fn finish(mut self) -> Option<Batch> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(self.seal(rest))
    }

    /// Drop the in-flight buffer without emitting it; returns how many records were dropped
    pub fn discard(self) -> usize {
        self.buffer.len()
    }

    fn seal(&mut self, records: Vec<Record>) -> Batch {
        self.emitted += 1;
        Batch {
            sequence: self.emitted,
            records,
        }
    }
}
