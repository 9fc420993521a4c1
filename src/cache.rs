use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::SystemTime,
};

use log::{debug, trace};

use crate::{MemoError, MemoItem, Result};

/// Parsed memos of one file, valid while the file's modification time is
/// unchanged.
#[derive(Debug, Clone)]
pub struct ParseCacheEntry {
    pub mod_time: SystemTime,
    pub memos: Vec<MemoItem>,
}

/// In-memory cache of parsed daily files, keyed by vault path.
///
/// Cloning shares the underlying map, so a watcher task can invalidate
/// entries the service reads.
#[derive(Debug, Clone, Default)]
pub struct ParseCache {
    entries: Arc<Mutex<HashMap<String, ParseCacheEntry>>>,
}

impl ParseCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ParseCacheEntry>>> {
        self.entries
            .lock()
            .map_err(|e| MemoError::LockAcquisitionFailed {
                message: format!("Failed to acquire lock on parse cache: {}", e),
            })
    }

    /// Cached memos for `path` if they were parsed at `mod_time`.
    pub fn get(&self, path: &str, mod_time: SystemTime) -> Result<Option<Vec<MemoItem>>> {
        let entries = self.lock()?;
        Ok(entries
            .get(path)
            .filter(|entry| entry.mod_time == mod_time)
            .map(|entry| entry.memos.clone()))
    }

    pub fn insert(&self, path: &str, mod_time: SystemTime, memos: Vec<MemoItem>) -> Result<()> {
        self.lock()?
            .insert(path.to_string(), ParseCacheEntry { mod_time, memos });
        Ok(())
    }

    /// Returns the cached memos for `path` at `mod_time`, computing and
    /// storing them on a miss. The lock is not held while `compute` runs.
    pub fn get_or_compute<F>(&self, path: &str, mod_time: SystemTime, compute: F) -> Result<Vec<MemoItem>>
    where
        F: FnOnce() -> Result<Vec<MemoItem>>,
    {
        if let Some(memos) = self.get(path, mod_time)? {
            trace!("Parse cache hit: {}", path);
            return Ok(memos);
        }

        trace!("Parse cache miss: {}", path);
        let memos = compute()?;
        self.insert(path, mod_time, memos.clone())?;
        Ok(memos)
    }

    /// Drops the entry for `path`. Returns whether one existed.
    pub fn invalidate(&self, path: &str) -> Result<bool> {
        let removed = self.lock()?.remove(path).is_some();
        if removed {
            debug!("Invalidated cached memos for {}", path);
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        let mut entries = self.lock()?;
        debug!("Clearing parse cache ({} entries)", entries.len());
        entries.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock()
            .map(|entries| entries.contains_key(path))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, time::Duration};

    use super::*;

    fn memo(id: &str) -> MemoItem {
        MemoItem {
            id: id.to_string(),
            file_path: "Daily/2024-03-10.md".to_string(),
            date_key: "2024-03-10".to_string(),
            created_at: 0,
            created_label: "2024-03-10 09:00".to_string(),
            content: "hello".to_string(),
            tags: Vec::new(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_hit_requires_same_mod_time() {
        let cache = ParseCache::new();
        let path = "Daily/2024-03-10.md";
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let t1 = t0 + Duration::from_secs(1);
        let calls = Cell::new(0);

        let compute = || {
            calls.set(calls.get() + 1);
            Ok(vec![memo("a")])
        };
        cache.get_or_compute(path, t0, compute).unwrap();
        cache.get_or_compute(path, t0, compute).unwrap();
        assert_eq!(calls.get(), 1);

        cache.get_or_compute(path, t1, compute).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_compute_caches_nothing() {
        let cache = ParseCache::new();
        let result = cache.get_or_compute("x.md", SystemTime::UNIX_EPOCH, || {
            Err(MemoError::EmptyContent)
        });
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = ParseCache::new();
        let shared = cache.clone();
        cache.insert("a.md", SystemTime::UNIX_EPOCH, vec![memo("a")]).unwrap();
        cache.insert("b.md", SystemTime::UNIX_EPOCH, Vec::new()).unwrap();

        assert!(shared.invalidate("a.md").unwrap());
        assert!(!cache.invalidate("a.md").unwrap());
        assert!(!cache.contains("a.md"));
        assert!(cache.contains("b.md"));

        shared.clear().unwrap();
        assert!(cache.is_empty());
    }
}
