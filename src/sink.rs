use tracing::{debug, info};

use crate::db::Record;
use crate::error::FlushError;

/// A durable destination for records. One call writes one batch.
pub trait RecordStore {
    fn insert_many(&mut self, records: &[Record]) -> Result<usize, FlushError>;
}

impl<S: RecordStore + ?Sized> RecordStore for Box<S> {
    fn insert_many(&mut self, records: &[Record]) -> Result<usize, FlushError> {
        (**self).insert_many(records)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkSummary {
    pub written: usize,
    pub flushes: usize,
    /// Records still buffered when the store was released.
    pub unflushed: usize,
}

/// Buffers records and writes them to the store in batches of `capacity`.
///
/// The buffer only shrinks after the store confirms a write, so a failed flush
/// leaves every record in place for the next attempt. `close` does a last flush
/// and then releases the store whatever the outcome.
pub struct BatchSink<S: RecordStore> {
    store: Option<S>,
    buffer: Vec<Record>,
    capacity: usize,
    written: usize,
    flushes: usize,
    closed: Option<SinkSummary>,
}

impl<S: RecordStore> BatchSink<S> {
    /// A capacity of zero is treated as one.
    pub fn new(store: S, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            store: Some(store),
            buffer: Vec::with_capacity(capacity),
            capacity,
            written: 0,
            flushes: 0,
            closed: None,
        }
    }

    /// Append a record, flushing once the buffer reaches capacity.
    ///
    /// The record is buffered before the flush is attempted; an error here means
    /// the flush failed and everything is still pending.
    pub fn add(&mut self, record: Record) -> Result<(), FlushError> {
        if self.closed.is_some() {
            return Err(FlushError::Closed);
        }
        self.buffer.push(record);
        if self.buffer.len() >= self.capacity {
            self.flush()?;
        }
        Ok(())
    }

    /// Write everything buffered in one bulk insert. Returns how many records were written.
    pub fn flush(&mut self) -> Result<usize, FlushError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let store = self.store.as_mut().ok_or(FlushError::Closed)?;
        let inserted = store.insert_many(&self.buffer)?;
        let n = self.buffer.len();
        if inserted != n {
            debug!("Store reported {} rows for a batch of {}", inserted, n);
        }
        self.buffer.clear();
        self.written += n;
        self.flushes += 1;
        debug!("Flushed {} records ({} total)", n, self.written);
        Ok(n)
    }

    /// Final flush, then release the store. Calling it again does nothing.
    pub fn close(&mut self) -> Result<SinkSummary, FlushError> {
        if let Some(summary) = self.closed {
            return Ok(summary);
        }
        let result = self.flush();
        // Released on every path, including a failed final flush.
        self.store = None;
        let summary = SinkSummary {
            written: self.written,
            flushes: self.flushes,
            unflushed: self.buffer.len(),
        };
        self.closed = Some(summary);
        info!(
            "Sink closed: {} written in {} flushes, {} unflushed",
            summary.written, summary.flushes, summary.unflushed
        );
        result.map(|_| summary)
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// In-memory store that keeps every batch it accepted and can be told to fail.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryStore {
        pub batches: Rc<RefCell<Vec<Vec<Record>>>>,
        pub failures_left: Rc<RefCell<usize>>,
        pub attempts: Rc<RefCell<usize>>,
        pub dropped: Rc<RefCell<bool>>,
    }

    impl MemoryStore {
        pub fn failing(times: usize) -> Self {
            let store = Self::default();
            *store.failures_left.borrow_mut() = times;
            store
        }

        pub fn batch_sizes(&self) -> Vec<usize> {
            self.batches.borrow().iter().map(Vec::len).collect()
        }

        pub fn total(&self) -> usize {
            self.batches.borrow().iter().map(Vec::len).sum()
        }
    }

    impl RecordStore for MemoryStore {
        fn insert_many(&mut self, records: &[Record]) -> Result<usize, FlushError> {
            *self.attempts.borrow_mut() += 1;
            let mut left = self.failures_left.borrow_mut();
            if *left > 0 {
                *left -= 1;
                return Err(FlushError::Rejected {
                    records: records.len(),
                    reason: "connection reset".into(),
                });
            }
            self.batches.borrow_mut().push(records.to_vec());
            Ok(records.len())
        }
    }

    impl Drop for MemoryStore {
        fn drop(&mut self) {
            *self.dropped.borrow_mut() = true;
        }
    }

    pub(crate) fn record(i: usize) -> Record {
        Record {
            title: Some(format!("movie {}", i)),
            rating: Some(9.0),
            subject: None,
        }
    }

    #[test]
    fn conserves_records_across_auto_and_final_flush() {
        for (n, cap) in [(0, 3), (1, 3), (3, 3), (7, 3), (250, 100), (10, 1)] {
            let store = MemoryStore::default();
            let mut sink = BatchSink::new(store.clone(), cap);
            for i in 0..n {
                sink.add(record(i)).unwrap();
            }
            let summary = sink.close().unwrap();
            assert_eq!(store.total(), n, "n={} cap={}", n, cap);
            assert_eq!(summary.written, n);
            assert_eq!(summary.unflushed, 0);

            let flat: Vec<Record> = store.batches.borrow().concat();
            let expected: Vec<Record> = (0..n).map(record).collect();
            assert_eq!(flat, expected);
        }
    }

    #[test]
    fn exactly_capacity_triggers_one_flush() {
        let store = MemoryStore::default();
        let mut sink = BatchSink::new(store.clone(), 4);
        for i in 0..3 {
            sink.add(record(i)).unwrap();
        }
        assert!(store.batch_sizes().is_empty());

        sink.add(record(3)).unwrap();
        assert_eq!(store.batch_sizes(), vec![4]);
        assert_eq!(sink.pending(), 0);

        sink.add(record(4)).unwrap();
        assert_eq!(store.batch_sizes(), vec![4]);
        assert_eq!(sink.pending(), 1);
    }

    #[test]
    fn two_fifty_with_capacity_hundred() {
        let store = MemoryStore::default();
        let mut sink = BatchSink::new(store.clone(), 100);
        for i in 0..250 {
            sink.add(record(i)).unwrap();
        }
        assert_eq!(store.batch_sizes(), vec![100, 100]);
        sink.close().unwrap();
        assert_eq!(store.batch_sizes(), vec![100, 100, 50]);
    }

    #[test]
    fn close_twice_flushes_once() {
        let store = MemoryStore::default();
        let mut sink = BatchSink::new(store.clone(), 10);
        for i in 0..5 {
            sink.add(record(i)).unwrap();
        }
        let first = sink.close().unwrap();
        let second = sink.close().unwrap();
        assert_eq!(first, second);
        assert_eq!(*store.attempts.borrow(), 1);
        assert_eq!(store.batch_sizes(), vec![5]);
    }

    #[test]
    fn close_releases_store() {
        let store = MemoryStore::default();
        let dropped = Rc::clone(&store.dropped);
        let mut sink = BatchSink::new(store, 10);
        sink.add(record(0)).unwrap();
        assert!(!*dropped.borrow());
        sink.close().unwrap();
        assert!(*dropped.borrow());
    }

    #[test]
    fn failed_flush_keeps_buffer_for_retry() {
        let store = MemoryStore::failing(1);
        let mut sink = BatchSink::new(store.clone(), 3);
        sink.add(record(0)).unwrap();
        sink.add(record(1)).unwrap();
        assert!(matches!(sink.add(record(2)), Err(FlushError::Rejected { records: 3, .. })));
        assert_eq!(sink.pending(), 3);

        assert_eq!(sink.flush().unwrap(), 3);
        assert_eq!(store.batch_sizes(), vec![3]);
        assert_eq!(*store.attempts.borrow(), 2);
        assert_eq!(store.batches.borrow()[0], (0..3).map(record).collect::<Vec<_>>());
    }

    #[test]
    fn failed_final_flush_still_releases() {
        let store = MemoryStore::failing(usize::MAX);
        let dropped = Rc::clone(&store.dropped);
        let mut sink = BatchSink::new(store, 10);
        sink.add(record(0)).unwrap();
        sink.add(record(1)).unwrap();

        assert!(sink.close().is_err());
        assert!(*dropped.borrow());
        let again = sink.close().unwrap();
        assert_eq!(again.unflushed, 2);
        assert_eq!(again.written, 0);
    }

    #[test]
    fn add_after_close_is_refused() {
        let mut sink = BatchSink::new(MemoryStore::default(), 2);
        sink.close().unwrap();
        assert!(matches!(sink.add(record(0)), Err(FlushError::Closed)));
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn empty_flush_does_not_touch_store() {
        let store = MemoryStore::default();
        let mut sink = BatchSink::new(store.clone(), 2);
        assert_eq!(sink.flush().unwrap(), 0);
        sink.close().unwrap();
        assert_eq!(*store.attempts.borrow(), 0);
    }
}
