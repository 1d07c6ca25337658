use std::collections::BTreeMap;
use std::sync::Mutex;

use log::debug;

use super::limiter::RateWindow;
use crate::error::StoreError;
use crate::modules::storage::{JsonFileStore, Store};

/// What a per-key update decided to do with the stored window
#[derive(Debug, Clone, PartialEq)]
pub enum WindowUpdate {
    /// Leave the stored window as it is
    Keep,
    Put(RateWindow),
    Remove,
}

/// Predicate marking windows that no longer affect any decision
pub type Stale<'a> = &'a dyn Fn(&RateWindow) -> bool;

/// Keyed storage for rate windows with atomic per-key updates
pub trait RateCache: Send + Sync {
    /// Apply `f` to the window under `key` as one atomic step.
    ///
    /// When `evict` is given, every window it marks stale is dropped in the
    /// same step. Backends skip the write when nothing changed.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&RateWindow>) -> WindowUpdate,
        evict: Option<Stale<'_>>,
    ) -> Result<(), StoreError>;
}

/// Returns whether `windows` changed
fn apply(
    windows: &mut BTreeMap<String, RateWindow>,
    key: &str,
    f: &mut dyn FnMut(Option<&RateWindow>) -> WindowUpdate,
    evict: Option<Stale<'_>>,
) -> bool {
    let mut changed = match f(windows.get(key)) {
        WindowUpdate::Keep => false,
        WindowUpdate::Put(window) => {
            windows.insert(key.to_string(), window);
            true
        }
        WindowUpdate::Remove => windows.remove(key).is_some(),
    };

    if let Some(stale) = evict {
        let before = windows.len();
        windows.retain(|_, window| !stale(window));
        let evicted = before - windows.len();
        if evicted > 0 {
            debug!("Evicted {} stale rate windows", evicted);
            changed = true;
        }
    }
    changed
}

/// Process-local cache
#[derive(Debug, Default)]
pub struct MemoryRateCache {
    windows: Mutex<BTreeMap<String, RateWindow>>,
}

impl MemoryRateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<RateWindow> {
        self.windows
            .lock()
            .ok()
            .and_then(|windows| windows.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.windows.lock().map(|windows| windows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RateCache for MemoryRateCache {
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&RateWindow>) -> WindowUpdate,
        evict: Option<Stale<'_>>,
    ) -> Result<(), StoreError> {
        let mut windows = self.windows.lock().map_err(|_| StoreError::Poisoned)?;
        apply(&mut windows, key, f, evict);
        Ok(())
    }
}

// Lets the CLI keep counters across invocations in the same JSON document
impl RateCache for JsonFileStore {
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&RateWindow>) -> WindowUpdate,
        evict: Option<Stale<'_>>,
    ) -> Result<(), StoreError> {
        self.transaction(&mut |records| apply(records.rate_windows_mut(), key, &mut *f, evict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn window(key: &str, count: u32) -> RateWindow {
        RateWindow {
            key: key.to_string(),
            count,
            window_start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            banned_until: None,
        }
    }

    #[test]
    fn test_memory_cache_update_and_remove() {
        let cache = MemoryRateCache::new();
        cache
            .update(
                "k",
                &mut |current| {
                    assert!(current.is_none());
                    WindowUpdate::Put(window("k", 1))
                },
                None,
            )
            .unwrap();
        assert_eq!(cache.get("k").map(|w| w.count), Some(1));

        cache.update("k", &mut |_| WindowUpdate::Remove, None).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_runs_in_the_same_step() {
        let cache = MemoryRateCache::new();
        for key in ["old-1", "old-2", "busy"] {
            let count = if key == "busy" { 9 } else { 1 };
            cache
                .update(key, &mut |_| WindowUpdate::Put(window(key, count)), None)
                .unwrap();
        }

        let stale: Stale<'_> = &|w: &RateWindow| w.count < 5;
        cache
            .update("new", &mut |_| WindowUpdate::Put(window("new", 7)), Some(stale))
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("busy").is_some());
        assert!(cache.get("new").is_some());
        assert!(cache.get("old-1").is_none());
    }

    #[test]
    fn test_file_store_keeps_windows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        JsonFileStore::new(&path)
            .update("k", &mut |_| WindowUpdate::Put(window("k", 3)), None)
            .unwrap();

        let mut seen = None;
        JsonFileStore::new(&path)
            .update(
                "k",
                &mut |current| {
                    seen = current.cloned();
                    WindowUpdate::Keep
                },
                None,
            )
            .unwrap();
        assert_eq!(seen.map(|w| w.count), Some(3));
    }

    #[test]
    fn test_file_store_skips_write_when_nothing_changed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::new(&path);
        store
            .update("k", &mut |_| WindowUpdate::Put(window("k", 3)), None)
            .unwrap();

        // Compact the document so a rewrite (always pretty-printed) would show
        let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        let compact = serde_json::to_string(&value).unwrap();
        fs::write(&path, &compact).unwrap();

        let keep_all: Stale<'_> = &|_: &RateWindow| false;
        store
            .update("k", &mut |_| WindowUpdate::Keep, Some(keep_all))
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), compact);
    }
}
