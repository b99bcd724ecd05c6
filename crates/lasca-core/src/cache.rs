use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Bounded in-memory cache with TTL expiry, used to memoize namespace
/// lookups on the enqueue path.
///
/// Entries expire `ttl` after insertion and are skipped lazily on read.
/// When the cache is at capacity, `put` evicts the entry closest to its
/// expiry time (tracked in a min-heap). Safe for concurrent use.
pub struct ObjectCache<V> {
    max_items: usize,
    ttl: Duration,
    inner: RwLock<Inner<V>>,
}

struct Inner<V> {
    items: HashMap<String, Entry<V>>,
    eviction: BinaryHeap<Reverse<EvictionEntry>>,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(PartialEq, Eq)]
struct EvictionEntry {
    expires_at: Instant,
    key: String,
}

impl Ord for EvictionEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.expires_at
            .cmp(&other.expires_at)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for EvictionEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<V: Clone> ObjectCache<V> {
    pub fn new(max_items: usize, ttl: Duration) -> Self {
        Self {
            max_items,
            ttl,
            inner: RwLock::new(Inner {
                items: HashMap::new(),
                eviction: BinaryHeap::new(),
            }),
        }
    }

    /// Insert or replace an item. Evicts the nearest-to-expire entry when
    /// the cache is at capacity.
    pub fn put(&self, key: &str, value: V) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        inner.remove(key);
        if inner.items.len() >= self.max_items {
            inner.evict(1);
        }

        let expires_at = Instant::now() + self.ttl;
        inner.items.insert(key.to_string(), Entry { value, expires_at });
        inner.eviction.push(Reverse(EvictionEntry {
            expires_at,
            key: key.to_string(),
        }));
    }

    /// Look up an item. Entries past their expiry time return `None`.
    pub fn get(&self, key: &str) -> Option<V> {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = inner.items.get(key)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Remove an item from both the map and the eviction heap.
    pub fn delete(&self, key: &str) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.remove(key);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.items.len()).unwrap_or(0)
    }

    #[cfg(test)]
    fn heap_len(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.eviction.len())
            .unwrap_or(0)
    }
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &str) {
        if self.items.remove(key).is_some() {
            self.eviction.retain(|Reverse(entry)| entry.key != key);
        }
    }

    fn evict(&mut self, n: usize) {
        for _ in 0..n {
            match self.eviction.pop() {
                Some(Reverse(entry)) => {
                    self.items.remove(&entry.key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: usize) -> String {
        format!("key-{n}")
    }

    #[test]
    fn capacity_is_bounded() {
        let max_items = 10;
        let cache = ObjectCache::new(max_items, Duration::from_secs(60));

        for i in 0..1_000 {
            cache.put(&key(i), i);
        }
        assert_eq!(cache.len(), max_items);

        // The most recent insert survives.
        assert_eq!(cache.get(&key(999)), Some(999));
    }

    #[test]
    fn delete_keeps_map_and_heap_in_sync() {
        let cache = ObjectCache::new(10, Duration::from_secs(60));
        for i in 0..5 {
            cache.put(&key(i), i);
        }

        cache.delete(&key(2));
        cache.delete(&key(3));

        assert_eq!(cache.get(&key(2)), None);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.heap_len(), cache.len());
    }

    #[test]
    fn put_replaces_existing_entry() {
        let cache = ObjectCache::new(10, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("a", 2);

        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.heap_len(), 1);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = ObjectCache::new(10, Duration::from_millis(30));
        cache.put("a", 1);
        assert_eq!(cache.get("a"), Some(1));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn eviction_removes_nearest_to_expire() {
        let cache = ObjectCache::new(2, Duration::from_secs(60));
        cache.put("old", 1);
        std::thread::sleep(Duration::from_millis(5));
        cache.put("mid", 2);
        std::thread::sleep(Duration::from_millis(5));
        cache.put("new", 3);

        assert_eq!(cache.get("old"), None);
        assert_eq!(cache.get("mid"), Some(2));
        assert_eq!(cache.get("new"), Some(3));
    }
}
