//! # Cache Module
//!
//! In-memory caches owned by the engine façade.
//!
//! ## Contents
//! - `PixmapCache` - bounded LRU of decoded presentation images
//! - `MetadataCache` - file/image metadata populated by database
//!   preload and thumbnail completions; reads never trigger I/O

use crate::events::PresentImage;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Cached file/image metadata for one canonical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Source image width in pixels (0 if unknown).
    pub width: u32,
    /// Source image height in pixels (0 if unknown).
    pub height: u32,
    /// File size in bytes.
    pub size_bytes: u64,
    /// File modification time, milliseconds since the Unix epoch.
    pub mtime_ms: i64,
}

/// Statistics about the pixmap cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixmapCacheStats {
    /// Number of entries currently cached.
    pub entries: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Approximate total bytes of cached pixel data.
    pub total_bytes: usize,
}

/// Bounded LRU cache of decoded presentation images.
///
/// Insertion-ordered; `touch` moves an entry to most-recently-used and
/// eviction always removes the least-recently-touched entry. Size never
/// exceeds the configured capacity.
pub struct PixmapCache {
    entries: HashMap<String, PresentImage>,
    order: VecDeque<String>,
    capacity: usize,
}

impl PixmapCache {
    /// Create a cache with the given capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Pure read; does not affect recency.
    pub fn get(&self, key: &str) -> Option<&PresentImage> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Move `key` to most-recently-used. Returns false if absent.
    pub fn touch(&mut self, key: &str) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).expect("position just found");
            self.order.push_back(k);
        }
        true
    }

    /// Insert (or replace) an entry as most-recently-used, evicting the
    /// least-recently-touched entry if over capacity.
    pub fn insert(&mut self, key: String, image: PresentImage) {
        if self.entries.insert(key.clone(), image).is_some() {
            if let Some(pos) = self.order.iter().position(|k| *k == key) {
                self.order.remove(pos);
            }
        }
        self.order.push_back(key);

        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<PresentImage> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys from least- to most-recently-used.
    pub fn keys_by_recency(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn stats(&self) -> PixmapCacheStats {
        PixmapCacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            total_bytes: self.entries.values().map(PresentImage::byte_size).sum(),
        }
    }
}

/// Metadata cache keyed by canonical path.
///
/// Populated only by database preload rows and thumbnail completions;
/// lookups are pure in-memory reads.
#[derive(Default)]
pub struct MetadataCache {
    entries: HashMap<String, FileInfo>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<FileInfo> {
        self.entries.get(key).copied()
    }

    /// Source resolution for a key, if known and non-zero.
    pub fn resolution(&self, key: &str) -> Option<(u32, u32)> {
        self.entries
            .get(key)
            .filter(|info| info.width > 0 && info.height > 0)
            .map(|info| (info.width, info.height))
    }

    pub fn insert(&mut self, key: String, info: FileInfo) {
        self.entries.insert(key, info);
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(n: u8) -> PresentImage {
        PresentImage {
            width: 1,
            height: 1,
            rgba: vec![n; 4],
        }
    }

    #[test]
    fn cache_never_exceeds_capacity() {
        let mut cache = PixmapCache::new(3);
        for i in 0..10u8 {
            cache.insert(format!("/img/{i}.jpg"), image(i));
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn eviction_removes_least_recently_touched() {
        let mut cache = PixmapCache::new(3);
        cache.insert("/a".into(), image(1));
        cache.insert("/b".into(), image(2));
        cache.insert("/c".into(), image(3));

        // Touch /a so /b becomes the eviction candidate
        assert!(cache.touch("/a"));
        cache.insert("/d".into(), image(4));

        assert!(cache.contains("/a"));
        assert!(!cache.contains("/b"));
        assert!(cache.contains("/c"));
        assert!(cache.contains("/d"));
    }

    #[test]
    fn touch_moves_entry_to_most_recently_used() {
        let mut cache = PixmapCache::new(3);
        cache.insert("/a".into(), image(1));
        cache.insert("/b".into(), image(2));

        cache.touch("/a");

        let order: Vec<_> = cache.keys_by_recency().collect();
        assert_eq!(order, vec!["/b", "/a"]);
    }

    #[test]
    fn touch_missing_key_returns_false() {
        let mut cache = PixmapCache::new(2);
        assert!(!cache.touch("/missing"));
    }

    #[test]
    fn reinsert_refreshes_recency() {
        let mut cache = PixmapCache::new(2);
        cache.insert("/a".into(), image(1));
        cache.insert("/b".into(), image(2));
        cache.insert("/a".into(), image(9));
        cache.insert("/c".into(), image(3));

        // /b was least recently used
        assert!(!cache.contains("/b"));
        assert_eq!(cache.get("/a").unwrap().rgba, vec![9; 4]);
    }

    #[test]
    fn get_is_a_pure_read() {
        let mut cache = PixmapCache::new(2);
        cache.insert("/a".into(), image(1));
        cache.insert("/b".into(), image(2));

        let _ = cache.get("/a");
        cache.insert("/c".into(), image(3));

        // /a was not touched by get, so it was evicted first
        assert!(!cache.contains("/a"));
    }

    #[test]
    fn stats_report_bytes() {
        let mut cache = PixmapCache::new(4);
        cache.insert("/a".into(), image(1));
        cache.insert("/b".into(), image(2));

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.total_bytes, 8);
    }

    #[test]
    fn metadata_resolution_requires_nonzero_dims() {
        let mut meta = MetadataCache::new();
        meta.insert(
            "/a".into(),
            FileInfo {
                width: 0,
                height: 0,
                size_bytes: 10,
                mtime_ms: 1,
            },
        );
        meta.insert(
            "/b".into(),
            FileInfo {
                width: 800,
                height: 600,
                size_bytes: 10,
                mtime_ms: 1,
            },
        );

        assert_eq!(meta.resolution("/a"), None);
        assert_eq!(meta.resolution("/b"), Some((800, 600)));
        assert_eq!(meta.resolution("/missing"), None);
    }
}
