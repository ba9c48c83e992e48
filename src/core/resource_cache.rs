//! Thread-safe key -> lazily built resource cache.
//!
//! Two-level locking:
//! - the outer map lock is held only long enough to find or create the slot
//! - each slot has its own lock, held while the resource is being built
//!
//! So different keys never wait on each other's construction, and concurrent
//! requests for the same key build it at most once: late arrivals block on the
//! slot and then get the shared value. A failed construction leaves the slot
//! empty and the next caller tries again.

use log::{debug, trace};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Slot<V> = Arc<Mutex<Option<V>>>;

#[derive(Debug)]
pub struct ResourceCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    constructions: AtomicU64,
}

impl<K, V> Default for ResourceCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ResourceCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            constructions: AtomicU64::new(0),
        }
    }

    fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(key.clone()).or_default().clone()
    }

    /// Return the cached value for `key`, building it with `create` if absent.
    pub fn get_or_try_create<E, F>(&self, key: &K, create: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = self.slot(key);
        let mut value = slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(v) = value.as_ref() {
            trace!("ResourceCache: hit");
            return Ok(v.clone());
        }
        let created = create()?;
        self.constructions.fetch_add(1, Ordering::Relaxed);
        *value = Some(created.clone());
        Ok(created)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.get(key)?.clone()
        };
        let value = slot.lock().unwrap_or_else(|e| e.into_inner());
        value.clone()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.remove(key)?
        };
        let mut value = slot.lock().unwrap_or_else(|e| e.into_inner());
        value.take()
    }

    /// Drop every entry. Values still held by callers stay alive until they
    /// release them.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if !slots.is_empty() {
            debug!("ResourceCache: releasing {} entries", slots.len());
        }
        slots.clear();
    }

    /// Number of keys with a built value.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot<V>> = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.values().cloned().collect()
        };
        slots
            .iter()
            .filter(|s| s.try_lock().map(|v| v.is_some()).unwrap_or(false))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total successful constructions since creation.
    pub fn constructions(&self) -> u64 {
        self.constructions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_key_builds_once() {
        let cache: Arc<ResourceCache<String, Arc<u32>>> = Arc::new(ResourceCache::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_try_create(&"src".to_string(), || {
                            thread::sleep(Duration::from_millis(20));
                            Ok::<_, ()>(Arc::new(7))
                        })
                        .unwrap()
                })
            })
            .collect();

        let values: Vec<Arc<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.constructions(), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let cache: Arc<ResourceCache<u32, u32>> = Arc::new(ResourceCache::new());
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);

        let slow = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache
                    .get_or_try_create(&1, || {
                        started_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok::<_, ()>(1)
                    })
                    .unwrap()
            })
        };

        started_rx.recv().unwrap();
        // Key 1 is mid-construction; key 2 must still go through
        assert_eq!(cache.get_or_try_create(&2, || Ok::<_, ()>(2)), Ok(2));
        release_tx.send(()).unwrap();
        assert_eq!(slow.join().unwrap(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache: ResourceCache<u32, u32> = ResourceCache::new();
        assert_eq!(cache.get_or_try_create(&1, || Err("boom")), Err("boom"));
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.get_or_try_create(&1, || Ok::<_, &str>(5)), Ok(5));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache: ResourceCache<u32, u32> = ResourceCache::new();
        cache.get_or_try_create(&1, || Ok::<_, ()>(1)).unwrap();
        cache.get_or_try_create(&2, || Ok::<_, ()>(2)).unwrap();
        assert_eq!(cache.remove(&1), Some(1));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
