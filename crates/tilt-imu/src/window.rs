use crate::error::ImuError;
use crate::types::OrientationRecord;
use std::collections::{vec_deque, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Trailing window of orientation records, ordered by arrival.
///
/// After every append, records older than `newest - window_ms` are evicted
/// from the front. Timestamps are assumed non-decreasing and are not
/// re-sorted.
#[derive(Debug, Clone)]
pub struct TimeWindowBuffer {
    window_ms: f64,
    records: VecDeque<OrientationRecord>,
}

impl TimeWindowBuffer {
    pub fn new(window_ms: f64) -> Result<Self, ImuError> {
        if !(window_ms.is_finite() && window_ms >= 0.0) {
            return Err(ImuError::InvalidWindow(window_ms));
        }
        Ok(Self {
            window_ms,
            records: VecDeque::new(),
        })
    }

    pub fn append(&mut self, record: OrientationRecord) {
        self.records.push_back(record);

        let cutoff = record.elapsed_time_ms - self.window_ms;
        while self
            .records
            .front()
            .is_some_and(|front| front.elapsed_time_ms < cutoff)
        {
            self.records.pop_front();
        }
    }

    pub fn front(&self) -> Option<&OrientationRecord> {
        self.records.front()
    }

    pub fn back(&self) -> Option<&OrientationRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, OrientationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn window_ms(&self) -> f64 {
        self.window_ms
    }

    /// Time covered by the retained records.
    pub fn span_ms(&self) -> f64 {
        match (self.records.front(), self.records.back()) {
            (Some(front), Some(back)) => back.elapsed_time_ms - front.elapsed_time_ms,
            _ => 0.0,
        }
    }
}

impl<'a> IntoIterator for &'a TimeWindowBuffer {
    type Item = &'a OrientationRecord;
    type IntoIter = vec_deque::Iter<'a, OrientationRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// [`TimeWindowBuffer`] handle shared between the fusion stage and a sink.
#[derive(Debug, Clone)]
pub struct SharedTimeWindow {
    inner: Arc<Mutex<TimeWindowBuffer>>,
}

impl SharedTimeWindow {
    pub fn new(window_ms: f64) -> Result<Self, ImuError> {
        Ok(Self {
            inner: Arc::new(Mutex::new(TimeWindowBuffer::new(window_ms)?)),
        })
    }

    pub fn append(&self, record: OrientationRecord) {
        self.lock().append(record);
    }

    /// Append a batch under a single lock.
    pub fn extend(&self, records: impl IntoIterator<Item = OrientationRecord>) {
        let mut window = self.lock();
        for record in records {
            window.append(record);
        }
    }

    pub fn latest(&self) -> Option<OrientationRecord> {
        self.lock().back().copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn span_ms(&self) -> f64 {
        self.lock().span_ms()
    }

    /// Copy of the retained records, oldest first.
    pub fn snapshot(&self) -> Vec<OrientationRecord> {
        self.lock().iter().copied().collect()
    }

    // A panicking writer leaves the buffer structurally valid, so a
    // poisoned lock is still safe to read through.
    fn lock(&self) -> MutexGuard<'_, TimeWindowBuffer> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
