//! # Thread-Local Registry
//!
//! Named thread-local slots. A slot is created once per name for the whole
//! process; each thread then stores its own value in it. Looking a slot up by
//! name takes a short lock, but a `LocalSlot` that has been resolved once can
//! be kept (for example in a `lazy_static`) and used without locking.
//!
//! The looper runtime uses this to publish "the looper running on this
//! thread" and "the event loop owned by this thread".

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;

use crate::thread::collections::ThreadSafeMap;

/// A value stored in a thread-local slot.
pub type LocalValue = Arc<dyn Any + Send + Sync>;

lazy_static! {
    static ref SLOTS: ThreadSafeMap<String, LocalSlot> = ThreadSafeMap::new();
}

static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static VALUES: RefCell<HashMap<usize, LocalValue>> = RefCell::new(HashMap::new());
}

/// Handle to a named thread-local slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalSlot {
    index: usize,
}

impl LocalSlot {
    /// Returns the slot for `name`, creating it on first use.
    pub fn named(name: &str) -> Self {
        if let Some(slot) = SLOTS.get(name) {
            return slot;
        }
        SLOTS.get_or_insert_with(name.to_string(), || LocalSlot {
            index: NEXT_SLOT.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Returns the slot for `name` only if some thread already created it.
    pub fn lookup(name: &str) -> Option<Self> {
        SLOTS.get(name)
    }

    /// Stores `value` for the calling thread, returning the previous value.
    pub fn set(&self, value: LocalValue) -> Option<LocalValue> {
        VALUES
            .try_with(|values| values.borrow_mut().insert(self.index, value))
            .ok()
            .flatten()
    }

    /// The calling thread's value, if it set one.
    pub fn get(&self) -> Option<LocalValue> {
        VALUES
            .try_with(|values| values.borrow().get(&self.index).cloned())
            .ok()
            .flatten()
    }

    /// Removes the calling thread's value.
    pub fn clear(&self) -> Option<LocalValue> {
        VALUES
            .try_with(|values| values.borrow_mut().remove(&self.index))
            .ok()
            .flatten()
    }
}

/// Publishes `value` under `name` for the calling thread.
pub fn set_local_data(name: &str, value: LocalValue) {
    LocalSlot::named(name).set(value);
}

/// The calling thread's value under `name`.
///
/// Returns `None` if no thread ever created the slot or if the calling thread
/// never set a value in it.
pub fn get_local_data(name: &str) -> Option<LocalValue> {
    LocalSlot::lookup(name)?.get()
}

/// Removes the calling thread's value under `name`.
pub fn clear_local_data(name: &str) {
    if let Some(slot) = LocalSlot::lookup(name) {
        slot.clear();
    }
}
