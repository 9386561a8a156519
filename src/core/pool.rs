// EN: src/core/pool.rs

//! Reusable log records.

use crate::constants::RECORD_POOL_CAPACITY;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

/// Everything the logger knows about one invocation. Only the logger holds
/// one, and only between acquire and release.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RequestInfo {
    pub command: String,
    pub args: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub error: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Scratch buffer the record is rendered into.
    pub(crate) line: String,
}

impl RequestInfo {
    /// Clears every field, keeping allocations.
    pub fn reset(&mut self) {
        self.command.clear();
        self.args.clear();
        self.start = None;
        self.duration = Duration::ZERO;
        self.error = None;
        self.metadata.clear();
        self.line.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.command.is_empty()
            && self.args.is_empty()
            && self.start.is_none()
            && self.duration.is_zero()
            && self.error.is_none()
            && self.metadata.is_empty()
            && self.line.is_empty()
    }
}

/// A bounded free list of [`RequestInfo`] records.
#[derive(Debug)]
pub struct RecordPool {
    free: Mutex<Vec<RequestInfo>>,
    capacity: usize,
}

impl Default for RecordPool {
    fn default() -> Self {
        Self::new(RECORD_POOL_CAPACITY)
    }
}

impl RecordPool {
    /// Creates a pool keeping at most `capacity` idle records.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Takes an idle record, or allocates one when none is left.
    pub fn acquire(&self) -> RequestInfo {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Resets `record` and returns it to the pool. Records beyond capacity
    /// are dropped.
    pub fn release(&self, mut record: RequestInfo) {
        record.reset();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(record);
        }
    }

    /// Number of idle records.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
