//! Persisted reverse-geocoding cache.
//!
//! Entries are kept in age order (oldest first). Re-inserting a key refreshes
//! it to the newest position and exceeding the capacity evicts from the oldest
//! end. The whole cache is written to a [`CacheStore`] as one JSON blob after
//! every change; store failures are logged and otherwise ignored.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Namespace under which the cache blob is stored.
pub const CACHE_NAMESPACE: &str = "stay-timeline.geocode-cache";

/// Default maximum number of cached places.
pub const DEFAULT_CACHE_CAPACITY: usize = 300;

/// A resolved place for one quantized coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub place_name: String,
    pub result: Option<serde_json::Value>,
}

/// Durable blob storage keyed by namespace.
pub trait CacheStore: Send + Sync {
    fn load(&self, namespace: &str) -> io::Result<Option<String>>;
    fn save(&self, namespace: &str, blob: &str) -> io::Result<()>;
}

/// Process-local store, mostly useful for tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, namespace: &str) -> io::Result<Option<String>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory store poisoned"))?;
        Ok(blobs.get(namespace).cloned())
    }

    fn save(&self, namespace: &str, blob: &str) -> io::Result<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory store poisoned"))?;
        blobs.insert(namespace.to_string(), blob.to_string());
        Ok(())
    }
}

/// One JSON file per namespace inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", namespace))
    }
}

impl CacheStore for FileStore {
    fn load(&self, namespace: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(namespace)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, namespace: &str, blob: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        // Write-then-rename so a crash never leaves a truncated blob
        let path = self.path_for(namespace);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, blob)?;
        fs::rename(tmp, path)
    }
}

/// Bounded, age-ordered geocode cache.
pub struct GeocodeCache {
    entries: Vec<(String, CacheEntry)>,
    capacity: usize,
    store: Option<Box<dyn CacheStore>>,
}

impl GeocodeCache {
    /// A cache that lives only in memory.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            store: None,
        }
    }

    /// Load the cache from `store`. Missing or unreadable blobs start empty.
    pub fn with_store(store: Box<dyn CacheStore>, capacity: usize) -> Self {
        let entries = match store.load(CACHE_NAMESPACE) {
            Ok(Some(blob)) => match serde_json::from_str::<Vec<(String, CacheEntry)>>(&blob) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("[GeocodeCache] Ignoring unreadable cache blob: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("[GeocodeCache] Failed to load cache: {}", e);
                Vec::new()
            }
        };

        let mut cache = Self {
            entries,
            capacity: capacity.max(1),
            store: Some(store),
        };
        cache.evict_overflow();
        debug!("[GeocodeCache] Loaded {} entries", cache.entries.len());
        cache
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, entry)| entry)
    }

    /// Insert or refresh `key` as the newest entry and persist the cache.
    pub fn insert(&mut self, key: &str, entry: CacheEntry) {
        self.entries.retain(|(k, _)| k != key);
        self.entries.push((key.to_string(), entry));
        self.evict_overflow();
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys from oldest to newest.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    fn evict_overflow(&mut self) {
        if self.entries.len() > self.capacity {
            let overflow = self.entries.len() - self.capacity;
            self.entries.drain(..overflow);
        }
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let blob = match serde_json::to_string(&self.entries) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("[GeocodeCache] Failed to serialize cache: {}", e);
                return;
            }
        };
        if let Err(e) = store.save(CACHE_NAMESPACE, &blob) {
            warn!("[GeocodeCache] Failed to persist cache: {}", e);
        }
    }
}

impl std::fmt::Debug for GeocodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodeCache")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(name: &str) -> CacheEntry {
        CacheEntry {
            place_name: name.to_string(),
            result: None,
        }
    }

    /// Shares one MemoryStore between cache instances.
    struct SharedStore(Arc<MemoryStore>);

    impl CacheStore for SharedStore {
        fn load(&self, namespace: &str) -> io::Result<Option<String>> {
            self.0.load(namespace)
        }
        fn save(&self, namespace: &str, blob: &str) -> io::Result<()> {
            self.0.save(namespace, blob)
        }
    }

    struct FailingStore;

    impl CacheStore for FailingStore {
        fn load(&self, _namespace: &str) -> io::Result<Option<String>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
        fn save(&self, _namespace: &str, _blob: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut cache = GeocodeCache::in_memory(2);
        cache.insert("a", entry("A"));
        cache.insert("b", entry("B"));
        cache.insert("c", entry("C"));
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["b", "c"]);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_reinsert_refreshes_age() {
        let mut cache = GeocodeCache::in_memory(2);
        cache.insert("a", entry("A"));
        cache.insert("b", entry("B"));
        cache.insert("a", entry("A2"));
        cache.insert("c", entry("C"));
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(cache.get("a").unwrap().place_name, "A2");
    }

    #[test]
    fn test_survives_reload() {
        let shared = Arc::new(MemoryStore::new());
        {
            let mut cache = GeocodeCache::with_store(Box::new(SharedStore(shared.clone())), 10);
            cache.insert("1.00000,2.00000", entry("Main Street 1, Town"));
        }
        let cache = GeocodeCache::with_store(Box::new(SharedStore(shared)), 10);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("1.00000,2.00000").unwrap().place_name,
            "Main Street 1, Town"
        );
    }

    #[test]
    fn test_corrupt_blob_loads_empty() {
        let store = MemoryStore::new();
        store.save(CACHE_NAMESPACE, "{not json").unwrap();
        let cache = GeocodeCache::with_store(Box::new(store), 10);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_failures_are_swallowed() {
        let mut cache = GeocodeCache::with_store(Box::new(FailingStore), 10);
        cache.insert("k", entry("Somewhere"));
        assert_eq!(cache.get("k").unwrap().place_name, "Somewhere");
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        assert_eq!(store.load(CACHE_NAMESPACE).unwrap(), None);
        store.save(CACHE_NAMESPACE, "[]").unwrap();
        assert_eq!(store.load(CACHE_NAMESPACE).unwrap().as_deref(), Some("[]"));
    }
}
