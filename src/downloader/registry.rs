//! 章节任务表
//!
//! 所有章节进度和状态都以这里为准。每次插入分配一个新的代次，
//! 下载单元只能修改与自己代次相同的任务。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;

use super::models::DownloadEvent;
use super::task::ChapterDownloadTask;

#[derive(Debug, Clone)]
pub struct TrackedChapter {
    pub task: ChapterDownloadTask,
    pub root: PathBuf,
    generation: u64,
    in_flight: usize,
}

impl TrackedChapter {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 正在执行、尚未写回结果的工作单元数量
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

pub struct TaskRegistry {
    chapters: DashMap<String, TrackedChapter>,
    next_generation: AtomicU64,
    events: broadcast::Sender<DownloadEvent>,
}

impl TaskRegistry {
    pub fn new(events: broadcast::Sender<DownloadEvent>) -> Self {
        Self {
            chapters: DashMap::new(),
            next_generation: AtomicU64::new(1),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// 章节尚未登记时插入并返回新代次，已登记则返回 `None`
    pub fn insert_if_absent(&self, task: ChapterDownloadTask, root: &Path) -> Option<u64> {
        match self.chapters.entry(task.chapter_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let _ = self.events.send(DownloadEvent::Added(task.clone()));
                slot.insert(TrackedChapter {
                    task,
                    root: root.to_path_buf(),
                    generation,
                    in_flight: 0,
                });
                Some(generation)
            }
        }
    }

    /// 登记一个已完成的任务，已登记时返回现有任务
    pub fn insert_completed(&self, task: ChapterDownloadTask, root: &Path) -> ChapterDownloadTask {
        match self.chapters.entry(task.chapter_id.clone()) {
            Entry::Occupied(existing) => existing.get().task.clone(),
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let _ = self.events.send(DownloadEvent::Added(task.clone()));
                slot.insert(TrackedChapter {
                    task: task.clone(),
                    root: root.to_path_buf(),
                    generation,
                    in_flight: 0,
                });
                task
            }
        }
    }

    pub fn get(&self, chapter_id: &str) -> Option<ChapterDownloadTask> {
        self.chapters.get(chapter_id).map(|c| c.task.clone())
    }

    pub fn tracked(&self, chapter_id: &str) -> Option<TrackedChapter> {
        self.chapters.get(chapter_id).map(|c| c.value().clone())
    }

    pub fn contains(&self, chapter_id: &str) -> bool {
        self.chapters.contains_key(chapter_id)
    }

    /// 章节仍以该代次登记
    pub fn is_current(&self, chapter_id: &str, generation: u64) -> bool {
        self.chapters
            .get(chapter_id)
            .is_some_and(|c| c.generation == generation)
    }

    /// 工作单元开始执行：代次匹配时登记在途数量并修改任务
    pub fn begin_unit<R>(
        &self,
        chapter_id: &str,
        generation: u64,
        f: impl FnOnce(&mut TrackedChapter) -> R,
    ) -> Option<R> {
        self.modify(chapter_id, generation, |tracked| {
            tracked.in_flight += 1;
            f(tracked)
        })
    }

    /// 工作单元结束：代次匹配时写回结果，返回 `None` 表示任务已被移除或替换
    pub fn finish_unit<R>(
        &self,
        chapter_id: &str,
        generation: u64,
        f: impl FnOnce(&mut TrackedChapter) -> R,
    ) -> Option<R> {
        self.modify(chapter_id, generation, |tracked| {
            tracked.in_flight = tracked.in_flight.saturating_sub(1);
            f(tracked)
        })
    }

    pub fn update<R>(
        &self,
        chapter_id: &str,
        generation: u64,
        f: impl FnOnce(&mut ChapterDownloadTask) -> R,
    ) -> Option<R> {
        self.modify(chapter_id, generation, |tracked| f(&mut tracked.task))
    }

    // 持有分片锁时发送事件，移除之后不会再有该章节的事件
    fn modify<R>(
        &self,
        chapter_id: &str,
        generation: u64,
        f: impl FnOnce(&mut TrackedChapter) -> R,
    ) -> Option<R> {
        let mut entry = self.chapters.get_mut(chapter_id)?;
        if entry.generation != generation {
            return None;
        }
        let before = entry.task.clone();
        let result = f(entry.value_mut());
        debug_assert!(entry.task.finished <= entry.task.total);
        for event in DownloadEvent::diff(&before, &entry.task) {
            let _ = self.events.send(event);
        }
        Some(result)
    }

    pub fn remove(&self, chapter_id: &str) -> Option<TrackedChapter> {
        let (_, tracked) = self.chapters.remove(chapter_id)?;
        let _ = self.events.send(DownloadEvent::Removed {
            chapter_id: chapter_id.to_string(),
        });
        Some(tracked)
    }

    /// 按创建时间排序的任务快照
    pub fn snapshot(&self) -> Vec<ChapterDownloadTask> {
        let mut tasks: Vec<_> = self.chapters.iter().map(|c| c.task.clone()).collect();
        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.chapter_id.cmp(&b.chapter_id))
        });
        tasks
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::task::ChapterStatus;

    fn registry() -> (TaskRegistry, broadcast::Receiver<DownloadEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (TaskRegistry::new(tx), rx)
    }

    #[test]
    fn insert_is_idempotent() {
        let (registry, _rx) = registry();
        let root = Path::new("/tmp");
        let first = registry.insert_if_absent(ChapterDownloadTask::new("1", "a", "c"), root);
        let second = registry.insert_if_absent(ChapterDownloadTask::new("1", "b", "c"), root);
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(registry.get("1").unwrap().chapter_title, "a");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_generation_cannot_update() {
        let (registry, _rx) = registry();
        let root = Path::new("/tmp");
        let old = registry
            .insert_if_absent(ChapterDownloadTask::new("1", "a", "c"), root)
            .unwrap();
        registry.remove("1");
        let new = registry
            .insert_if_absent(ChapterDownloadTask::new("1", "a", "c"), root)
            .unwrap();
        assert_ne!(old, new);
        assert!(registry.update("1", old, |t| t.total = 5).is_none());
        assert!(registry.update("1", new, |t| t.total = 5).is_some());
        assert_eq!(registry.get("1").unwrap().total, 5);
    }

    #[test]
    fn in_flight_is_tracked_per_unit() {
        let (registry, _rx) = registry();
        let generation = registry
            .insert_if_absent(ChapterDownloadTask::new("1", "a", "c"), Path::new("/tmp"))
            .unwrap();
        registry.begin_unit("1", generation, |_| ()).unwrap();
        registry.begin_unit("1", generation, |_| ()).unwrap();
        registry.finish_unit("1", generation, |_| ()).unwrap();
        assert_eq!(registry.tracked("1").unwrap().in_flight(), 1);
    }

    #[test]
    fn events_follow_changes_and_stop_after_removal() {
        let (registry, mut rx) = registry();
        let generation = registry
            .insert_if_absent(ChapterDownloadTask::new("1", "a", "c"), Path::new("/tmp"))
            .unwrap();
        registry
            .update("1", generation, |t| t.transition(ChapterStatus::Fetching))
            .unwrap()
            .unwrap();
        registry.remove("1");
        assert!(registry.update("1", generation, |t| t.total = 3).is_none());

        assert!(matches!(rx.try_recv().unwrap(), DownloadEvent::Added(_)));
        assert_eq!(
            rx.try_recv().unwrap(),
            DownloadEvent::StatusChanged {
                chapter_id: "1".to_string(),
                from: ChapterStatus::Pending,
                to: ChapterStatus::Fetching,
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), DownloadEvent::Removed { .. }));
        assert!(rx.try_recv().is_err());
    }
}
