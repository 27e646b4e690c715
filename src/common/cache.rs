use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::common::api::models::ChapterManifest;
use crate::common::config::DEFAULT_MANIFEST_CACHE_TTL_SECS;

#[derive(Debug, Clone)]
struct CacheEntry {
    manifest: ChapterManifest,
    stored_at: Instant,
}

/// 章节图片清单缓存，按章节 ID 存放，过期后读取时淘汰
#[derive(Debug)]
pub struct ManifestCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl Default for ManifestCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_MANIFEST_CACHE_TTL_SECS))
    }
}

impl ManifestCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, chapter_id: &str) -> Option<ChapterManifest> {
        {
            let entry = self.entries.get(chapter_id)?;
            if entry.stored_at.elapsed() < self.ttl {
                return Some(entry.manifest.clone());
            }
        }
        debug!("章节清单缓存已过期: {}", chapter_id);
        self.entries
            .remove_if(chapter_id, |_, entry| entry.stored_at.elapsed() >= self.ttl);
        None
    }

    /// 空清单不缓存
    pub fn insert(&self, manifest: ChapterManifest) {
        if manifest.is_empty() {
            return;
        }
        self.entries.insert(
            manifest.chapter_id.clone(),
            CacheEntry {
                manifest,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, chapter_id: &str) {
        self.entries.remove(chapter_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// 清理所有过期条目，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - self.entries.len()
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
    use crate::common::api::models::ChapterImage;

    fn manifest(id: &str, pages: usize) -> ChapterManifest {
        ChapterManifest {
            chapter_id: id.to_string(),
            scramble_id: 220980,
            images: (1..=pages)
                .map(|i| ChapterImage {
                    url: format!("https://img/{id}/{i:05}.webp"),
                    filename: format!("{i:05}.webp"),
                    filename_without_ext: format!("{i:05}"),
                    strip_count: 0,
                    index: i,
                })
                .collect(),
        }
    }

    #[test]
    fn hit_within_ttl() {
        let cache = ManifestCache::default();
        cache.insert(manifest("101", 3));
        assert_eq!(cache.get("101").unwrap().len(), 3);
        assert!(cache.get("102").is_none());
    }

    #[test]
    fn empty_manifest_is_not_cached() {
        let cache = ManifestCache::default();
        cache.insert(manifest("101", 0));
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_are_evicted() {
        let cache = ManifestCache::new(Duration::ZERO);
        cache.insert(manifest("101", 1));
        cache.insert(manifest("102", 1));
        assert!(cache.get("101").is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }
}
