use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide monotonically increasing stamp.
#[derive(Debug)]
pub(crate) struct GlobalCounter(AtomicU64);

impl GlobalCounter {
    pub(crate) const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub(crate) fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel)
    }
}

/// Receiver side of a change notification.
pub(crate) enum DataHandler<T> {
    /// Queue-based: store for later retrieval
    Queue(flume::Sender<T>),

    /// Direct callback: process immediately
    Callback(Arc<dyn Fn(T) + Send + Sync>),
}

impl<T> DataHandler<T> {
    /// Deliver `data`. Returns false once a queue receiver has been dropped
    /// so the caller can forget the handler.
    pub(crate) fn handle(&self, data: T) -> bool {
        match self {
            DataHandler::Queue(tx) => tx.send(data).is_ok(),
            DataHandler::Callback(cb) => {
                cb(data);
                true
            }
        }
    }
}

impl<T> Clone for DataHandler<T> {
    fn clone(&self) -> Self {
        match self {
            DataHandler::Queue(tx) => DataHandler::Queue(tx.clone()),
            DataHandler::Callback(cb) => DataHandler::Callback(cb.clone()),
        }
    }
}
