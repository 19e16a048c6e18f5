use std::collections::{HashMap, HashSet};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, StratumError};

/// Reference-counted cache keyed by u64.
///
/// Entries stay resident while pinned; when the last pin is released the
/// entry is evicted through the caller's write-back hook. A thread that asks
/// for a key another thread is currently loading parks on a condvar instead
/// of issuing a duplicate load.
pub struct RefCache<T: Clone> {
    state: Mutex<State<T>>,
    loaded: Condvar,
    capacity: usize,
}

struct State<T> {
    entries: HashMap<u64, T>,
    pins: HashMap<u64, u32>,
    loading: HashSet<u64>,
    count: usize,
}

impl<T: Clone> RefCache<T> {
    /// `capacity == 0` means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                pins: HashMap::new(),
                loading: HashSet::new(),
                count: 0,
            }),
            loaded: Condvar::new(),
            capacity,
        }
    }

    /// Returns a pinned handle, loading through `load` on a miss.
    ///
    /// Fails with `CacheFull` when the pool is at capacity; the load itself
    /// runs outside the cache lock.
    pub fn get_or_load(&self, key: u64, load: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        loop {
            if state.loading.contains(&key) {
                self.loaded.wait(&mut state);
                continue;
            }
            if let Some(entry) = state.entries.get(&key) {
                let entry = entry.clone();
                *state.pins.entry(key).or_insert(0) += 1;
                return Ok(entry);
            }
            if self.capacity > 0 && state.count == self.capacity {
                return Err(StratumError::CacheFull);
            }
            state.count += 1;
            state.loading.insert(key);
            break;
        }
        drop(state);

        let loaded = load();

        let mut state = self.state.lock();
        state.loading.remove(&key);
        match loaded {
            Ok(entry) => {
                state.entries.insert(key, entry.clone());
                state.pins.insert(key, 1);
                self.loaded.notify_all();
                Ok(entry)
            }
            Err(err) => {
                state.count -= 1;
                self.loaded.notify_all();
                Err(err)
            }
        }
    }

    /// Drops one pin; at zero the entry is evicted through `evict`.
    pub fn release(&self, key: u64, evict: impl FnOnce(&T)) {
        let mut state = self.state.lock();
        let Some(pins) = state.pins.get_mut(&key) else {
            return;
        };
        *pins -= 1;
        if *pins == 0 {
            state.pins.remove(&key);
            if let Some(entry) = state.entries.remove(&key) {
                state.count -= 1;
                // Write-back runs under the cache lock so a concurrent get
                // cannot observe a half-evicted entry.
                evict(&entry);
            }
        }
    }

    /// Evicts everything, pinned or not. For shutdown.
    pub fn close(&self, mut evict: impl FnMut(&T)) {
        let mut state = self.state.lock();
        let keys: Vec<u64> = state.entries.keys().copied().collect();
        for key in keys {
            if let Some(entry) = state.entries.remove(&key) {
                evict(&entry);
            }
            state.pins.remove(&key);
            state.count -= 1;
        }
    }

    #[cfg(test)]
    fn resident(&self) -> usize {
        self.state.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn get_pins_and_release_evicts() {
        let cache: RefCache<u64> = RefCache::new(4);
        let v = cache.get_or_load(1, || Ok(10)).unwrap();
        assert_eq!(v, 10);
        let _again = cache.get_or_load(1, || panic!("already cached")).unwrap();

        let evicted = AtomicUsize::new(0);
        cache.release(1, |_| {
            evicted.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(evicted.load(Ordering::SeqCst), 0, "still pinned once");
        cache.release(1, |_| {
            evicted.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(evicted.load(Ordering::SeqCst), 1);
        assert_eq!(cache.resident(), 0);
    }

    #[test]
    fn full_cache_rejects_new_keys() {
        let cache: RefCache<u64> = RefCache::new(1);
        let _held = cache.get_or_load(1, || Ok(1)).unwrap();
        assert!(matches!(
            cache.get_or_load(2, || Ok(2)),
            Err(StratumError::CacheFull)
        ));
    }

    #[test]
    fn failed_load_frees_the_slot() {
        let cache: RefCache<u64> = RefCache::new(1);
        let err = cache.get_or_load(1, || Err(StratumError::DatabaseBusy));
        assert!(err.is_err());
        assert!(cache.get_or_load(1, || Ok(5)).is_ok());
    }

    #[test]
    fn concurrent_getters_load_once() {
        let cache: Arc<RefCache<u64>> = Arc::new(RefCache::new(0));
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            handles.push(std::thread::spawn(move || {
                let v = cache
                    .get_or_load(42, || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        Ok(7)
                    })
                    .unwrap();
                assert_eq!(v, 7);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
