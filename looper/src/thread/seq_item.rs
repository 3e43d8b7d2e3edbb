use std::sync::atomic::{AtomicU64, Ordering};

/// A payload stamped with the sequence id it was submitted under.
///
/// Every pending entry of a looper is a `SequencedItem`. Events carry their
/// event name; deferred calls leave `name` empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedItem<T> {
    pub id: u64,
    pub name: Option<String>,
    pub payload: T,
}

impl<T> SequencedItem<T> {
    pub fn new(id: u64, payload: T) -> Self {
        Self {
            id,
            name: None,
            payload,
        }
    }

    pub fn named(id: u64, name: impl Into<String>, payload: T) -> Self {
        Self {
            id,
            name: Some(name.into()),
            payload,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// Monotonic id source shared by all pending work of one looper.
///
/// Ids start at zero and never repeat within one counter.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The id the next call to `next` will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}
