//! # Thread-Safe Collections
//!
//! Mutex-guarded containers used for the state a looper shares with producer
//! threads. Every public method acquires the collection's mutex, performs one
//! operation and releases it before returning. No method exposes the guard,
//! so callers can never hold a lock across calls.
//!
//! Values that leave a collection are either moved out or cloned; references
//! into the protected data never escape the lock.

use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

// A panicking user callback must not wedge the looper's shared state.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A double-ended FIFO queue guarded by a mutex.
pub struct ThreadSafeQueue<T> {
    data: Mutex<VecDeque<T>>,
}

impl<T> Default for ThreadSafeQueue<T> {
    fn default() -> Self {
        Self {
            data: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> fmt::Debug for ThreadSafeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeQueue")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> ThreadSafeQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&self, value: T) {
        lock(&self.data).push_back(value);
    }

    pub fn push_front(&self, value: T) {
        lock(&self.data).push_front(value);
    }

    /// Builds a value and appends it while the lock is held.
    ///
    /// `make` runs under the queue lock, so anything it computes (for example a
    /// sequence id) is ordered consistently with the queue itself. If `make`
    /// fails nothing is pushed.
    pub fn push_back_with<E>(&self, make: impl FnOnce() -> Result<T, E>) -> Result<(), E> {
        let mut data = lock(&self.data);
        let value = make()?;
        data.push_back(value);
        Ok(())
    }

    /// Removes the front element.
    ///
    /// # Panics
    /// Panics if the queue is empty.
    pub fn pop_front(&self) -> T {
        lock(&self.data)
            .pop_front()
            .unwrap_or_else(|| panic!("pop_front called on an empty ThreadSafeQueue"))
    }

    /// Removes the back element.
    ///
    /// # Panics
    /// Panics if the queue is empty.
    pub fn pop_back(&self) -> T {
        lock(&self.data)
            .pop_back()
            .unwrap_or_else(|| panic!("pop_back called on an empty ThreadSafeQueue"))
    }

    pub fn try_pop_front(&self) -> Option<T> {
        lock(&self.data).pop_front()
    }

    pub fn try_pop_back(&self) -> Option<T> {
        lock(&self.data).pop_back()
    }

    /// Runs `f` on the front element, if any, under the lock.
    pub fn peek_front<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        lock(&self.data).front().map(f)
    }

    /// Runs `f` on the back element, if any, under the lock.
    pub fn peek_back<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        lock(&self.data).back().map(f)
    }

    /// Snapshot of the current length; may be stale by the time it is used.
    pub fn len(&self) -> usize {
        lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.data).is_empty()
    }

    /// Removes every element and returns them in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        lock(&self.data).drain(..).collect()
    }

    pub fn clear(&self) {
        lock(&self.data).clear();
    }
}

impl<T: Clone> ThreadSafeQueue<T> {
    pub fn front(&self) -> Option<T> {
        self.peek_front(T::clone)
    }

    pub fn back(&self) -> Option<T> {
        self.peek_back(T::clone)
    }
}

/// A hash map guarded by a mutex.
pub struct ThreadSafeMap<K, V> {
    data: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for ThreadSafeMap<K, V> {
    fn default() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> fmt::Debug for ThreadSafeMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeMap")
            .field("len", &lock(&self.data).len())
            .finish()
    }
}

impl<K: Eq + Hash, V> ThreadSafeMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        lock(&self.data).insert(key, value)
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        lock(&self.data).remove(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        lock(&self.data).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.data).is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> ThreadSafeMap<K, V> {
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        lock(&self.data).get(key).cloned()
    }

    /// Returns the value for `key`, creating it with `init` if absent.
    ///
    /// `init` runs at most once per key: concurrent callers racing on the same
    /// missing key all observe the value built by whichever got the lock first.
    pub fn get_or_insert_with(&self, key: K, init: impl FnOnce() -> V) -> V {
        lock(&self.data).entry(key).or_insert_with(init).clone()
    }
}

/// A map from key to an ordered list of values, guarded by a mutex.
///
/// Used as the listener registry: values for one key keep insertion order.
pub struct ThreadSafeMultiMap<K, V> {
    data: Mutex<HashMap<K, Vec<V>>>,
}

impl<K, V> Default for ThreadSafeMultiMap<K, V> {
    fn default() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> fmt::Debug for ThreadSafeMultiMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeMultiMap")
            .field("keys", &lock(&self.data).len())
            .finish()
    }
}

impl<K: Eq + Hash, V> ThreadSafeMultiMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to the list for `key`.
    pub fn add(&self, key: K, value: V) {
        lock(&self.data).entry(key).or_default().push(value);
    }

    /// Removes every value stored under `key`, returning how many were removed.
    pub fn clear<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        lock(&self.data).remove(key).map_or(0, |values| values.len())
    }

    pub fn len_of<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        lock(&self.data).get(key).map_or(0, Vec::len)
    }

    /// Visits every value stored under `key`, in insertion order.
    ///
    /// The map's lock is held for the whole iteration. `f` must not call back
    /// into this map: the mutex is not reentrant and doing so deadlocks the
    /// calling thread.
    pub fn for_each<Q>(&self, key: &Q, mut f: impl FnMut(&V))
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let data = lock(&self.data);
        if let Some(values) = data.get(key) {
            for value in values {
                f(value);
            }
        }
    }
}

impl<K: Eq + Hash, V: Clone> ThreadSafeMultiMap<K, V> {
    /// Snapshot of the values stored under `key`, in insertion order.
    ///
    /// Unlike `for_each`, the lock is released before the caller touches the
    /// values, so they may freely re-enter the map.
    pub fn get<Q>(&self, key: &Q) -> Vec<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        lock(&self.data).get(key).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_queue_fifo_and_both_ends() {
        let queue = ThreadSafeQueue::new();
        queue.push_back(2);
        queue.push_back(3);
        queue.push_front(1);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.front(), Some(1));
        assert_eq!(queue.back(), Some(3));
        assert_eq!(queue.pop_front(), 1);
        assert_eq!(queue.pop_back(), 3);
        assert_eq!(queue.try_pop_front(), Some(2));
        assert_eq!(queue.try_pop_front(), None);
        assert!(queue.is_empty());
    }

    #[test]
    #[should_panic(expected = "empty ThreadSafeQueue")]
    fn test_pop_front_on_empty_panics() {
        let queue: ThreadSafeQueue<u8> = ThreadSafeQueue::new();
        queue.pop_front();
    }

    #[test]
    #[should_panic(expected = "empty ThreadSafeQueue")]
    fn test_pop_back_on_empty_panics() {
        let queue: ThreadSafeQueue<u8> = ThreadSafeQueue::new();
        queue.pop_back();
    }

    #[test]
    fn test_push_back_with_rejects() {
        let queue = ThreadSafeQueue::new();
        assert_eq!(queue.push_back_with(|| Ok::<_, ()>(10)), Ok(()));
        assert_eq!(queue.push_back_with(|| Err::<i32, _>("closed")), Err("closed"));
        assert_eq!(queue.drain(), vec![10]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_push_loses_nothing() {
        let queue = Arc::new(ThreadSafeQueue::new());
        let producers: Vec<_> = (0..8)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..500 {
                        queue.push_back((t, i));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let items = queue.drain();
        assert_eq!(items.len(), 4000);
        // Per-producer order survives interleaving.
        for t in 0..8 {
            let seq: Vec<_> = items.iter().filter(|(p, _)| *p == t).map(|(_, i)| *i).collect();
            assert_eq!(seq, (0..500).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_map_basic_operations() {
        let map = ThreadSafeMap::new();
        assert!(map.insert("a".to_string(), 1).is_none());
        assert_eq!(map.insert("a".to_string(), 2), Some(1));
        assert_eq!(map.get("a"), Some(2));
        assert!(map.contains_key("a"));
        assert_eq!(map.remove("a"), Some(2));
        assert!(map.is_empty());
    }

    #[test]
    fn test_map_get_or_insert_with_runs_init_once() {
        let map = Arc::new(ThreadSafeMap::new());
        let inits = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = Arc::clone(&map);
                let inits = Arc::clone(&inits);
                thread::spawn(move || {
                    map.get_or_insert_with("slot".to_string(), || {
                        inits.fetch_add(1, Ordering::SeqCst)
                    })
                })
            })
            .collect();

        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| *v == values[0]));
    }

    #[test]
    fn test_multimap_keeps_insertion_order() {
        let map = ThreadSafeMultiMap::new();
        map.add("tick".to_string(), 1);
        map.add("tick".to_string(), 2);
        map.add("other".to_string(), 9);
        map.add("tick".to_string(), 3);

        assert_eq!(map.get("tick"), vec![1, 2, 3]);
        assert_eq!(map.len_of("other"), 1);

        let mut visited = Vec::new();
        map.for_each("tick", |v| visited.push(*v));
        assert_eq!(visited, vec![1, 2, 3]);
    }

    #[test]
    fn test_multimap_clear_removes_whole_list() {
        let map = ThreadSafeMultiMap::new();
        map.add("tick".to_string(), 1);
        map.add("tick".to_string(), 2);

        assert_eq!(map.clear("tick"), 2);
        assert!(map.get("tick").is_empty());
        assert_eq!(map.clear("missing"), 0);
    }
}
