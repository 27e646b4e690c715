use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use itertools::Itertools;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::common::api::ComicSource;
use crate::common::cache::ManifestCache;
use crate::common::config::Settings;
use crate::common::storage::{DownloadRootProvider, FsImageStore, ImageStore, StoredImage, SystemPaths};

use super::core::DownloadCore;
use super::error::ConfigError;
use super::fetch::FetchJob;
use super::local::LocalDetector;
use super::models::{ChapterRef, ComicGroup, DownloadEvent, PipelineStats};
use super::registry::TaskRegistry;
use super::task::{ChapterDownloadTask, ChapterStatus};

const EVENT_CAPACITY: usize = 1024;

pub const UNKNOWN_COMIC_TITLE: &str = "未知作品";

/// 章节下载服务，每个应用实例构造一次
pub struct ChapterDownloader {
    core: Arc<DownloadCore>,
    local: LocalDetector,
    download_dir: RwLock<Option<PathBuf>>,
    paths: Arc<dyn DownloadRootProvider>,
}

impl ChapterDownloader {
    pub fn new(source: Arc<dyn ComicSource>, settings: &Settings) -> Self {
        Self::with_collaborators(
            source,
            Arc::new(FsImageStore::new()),
            Arc::new(SystemPaths),
            settings,
        )
    }

    pub fn with_collaborators(
        source: Arc<dyn ComicSource>,
        store: Arc<dyn ImageStore>,
        paths: Arc<dyn DownloadRootProvider>,
        settings: &Settings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let core = DownloadCore::new(
            source,
            store,
            TaskRegistry::new(events),
            ManifestCache::new(settings.manifest_cache_ttl()),
            settings.fetch_concurrency,
            settings.download_concurrency,
            settings.skip_existing,
        );
        Self {
            core: Arc::new(core),
            local: LocalDetector::new(),
            download_dir: RwLock::new(settings.download_dir.clone()),
            paths,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.core.registry.subscribe()
    }

    /// 配置的下载目录，未配置时使用系统默认目录
    pub fn download_root(&self) -> Result<PathBuf, ConfigError> {
        let configured = self
            .download_dir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty());
        configured
            .or_else(|| self.paths.default_download_root())
            .ok_or(ConfigError::NoDownloadRoot)
    }

    fn search_roots(&self, preferred: Option<PathBuf>) -> Vec<PathBuf> {
        let configured = self
            .download_dir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        preferred
            .into_iter()
            .chain(configured)
            .chain(self.paths.default_download_root())
            .filter(|dir| !dir.as_os_str().is_empty())
            .unique()
            .collect()
    }

    /// 提交章节下载，返回新加入的章节数。已在任务列表中的章节不做任何改变。
    ///
    /// 无法确定下载目录时立即返回错误，不会发起任何请求。
    pub fn submit(&self, comic_title: &str, chapters: &[ChapterRef]) -> Result<usize, ConfigError> {
        let root = self.download_root()?;
        let comic_title = match comic_title.trim() {
            "" => UNKNOWN_COMIC_TITLE,
            title => title,
        };

        let mut added = 0;
        for chapter in chapters {
            let chapter_id = chapter.id.trim();
            if chapter_id.is_empty() {
                continue;
            }
            let chapter_title = match chapter.title.trim() {
                "" => format!("章节 {}", chapter_id),
                title => title.to_string(),
            };
            let task = ChapterDownloadTask::new(chapter_id, &chapter_title, comic_title);
            match self.core.registry.insert_if_absent(task, &root) {
                Some(generation) => {
                    self.core.fetch_pool.push(FetchJob {
                        chapter_id: chapter_id.to_string(),
                        generation,
                    });
                    added += 1;
                }
                None => debug!("章节 {} 已在任务列表中", chapter_id),
            }
        }

        if added > 0 {
            info!("《{}》新增 {} 个章节下载任务", comic_title, added);
            self.core.fetch_pool.pump(&self.core);
        }
        Ok(added)
    }

    /// 取消并移除章节任务。正在进行的请求不会中断，但其结果会被丢弃。
    pub fn cancel(&self, chapter_id: &str) -> bool {
        let Some(tracked) = self.core.registry.tracked(chapter_id) else {
            return false;
        };
        let generation = tracked.generation();
        self.core.tombstones.add(chapter_id, generation);
        let Some(removed) = self.core.registry.remove(chapter_id) else {
            self.core.tombstones.arm(chapter_id, generation, 0);
            return false;
        };
        if removed.generation() != generation {
            self.core.tombstones.arm(chapter_id, generation, 0);
            self.core.tombstones.add(chapter_id, removed.generation());
        }
        self.core
            .tombstones
            .arm(chapter_id, removed.generation(), removed.in_flight());

        let dropped = self.core.drop_queued(chapter_id, removed.generation());
        info!(
            "已取消章节 {} (移除排队任务 {} 个，在途任务 {} 个)",
            chapter_id,
            dropped,
            removed.in_flight()
        );
        true
    }

    /// 重新下载失败的章节，已存在的图片按 `skip_existing` 处理
    pub fn retry(&self, chapter_id: &str) -> Result<bool, ConfigError> {
        let Some(task) = self.core.registry.get(chapter_id) else {
            return Ok(false);
        };
        if task.status != ChapterStatus::Error {
            return Ok(false);
        }
        self.download_root()?;
        self.cancel(chapter_id);
        let added = self.submit(
            &task.comic_title,
            &[ChapterRef::new(chapter_id, task.chapter_title.clone())],
        )?;
        Ok(added > 0)
    }

    pub fn retry_failed(&self) -> Result<usize, ConfigError> {
        let failed: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|t| t.status == ChapterStatus::Error)
            .collect();
        let mut restarted = 0;
        for task in failed {
            if self.retry(&task.chapter_id)? {
                restarted += 1;
            }
        }
        Ok(restarted)
    }

    /// 本地已有该章节图片时直接登记为已完成
    pub async fn reconcile(
        &self,
        chapter_id: &str,
        chapter_title: &str,
        comic_title: &str,
    ) -> Option<ChapterDownloadTask> {
        if chapter_id.is_empty() || chapter_title.is_empty() || comic_title.is_empty() {
            return None;
        }
        if let Some(task) = self.core.registry.get(chapter_id) {
            return Some(task);
        }
        let roots = self.search_roots(None);
        if roots.is_empty() {
            warn!("没有可用的下载目录，无法检查本地章节 {}", chapter_id);
            return None;
        }
        self.local
            .reconcile(&self.core, roots, chapter_id, chapter_title, comic_title)
            .await
    }

    pub fn set_fetch_concurrency(&self, limit: usize) {
        self.core.fetch_pool.set_limit(limit, &self.core);
    }

    pub fn set_download_concurrency(&self, limit: usize) {
        self.core.download_pool.set_limit(limit, &self.core);
    }

    /// 只影响之后提交的章节
    pub fn set_download_dir(&self, dir: Option<PathBuf>) {
        *self
            .download_dir
            .write()
            .unwrap_or_else(PoisonError::into_inner) = dir;
    }

    pub fn set_skip_existing(&self, skip: bool) {
        self.core.set_skip_existing(skip);
    }

    pub fn clear_manifest_cache(&self) {
        self.core.cache.clear();
    }

    pub fn get(&self, chapter_id: &str) -> Option<ChapterDownloadTask> {
        self.core.registry.get(chapter_id)
    }

    pub fn snapshot(&self) -> Vec<ChapterDownloadTask> {
        self.core.registry.snapshot()
    }

    /// 按作品分组，作品顺序与章节顺序都按创建时间
    pub fn comic_groups(&self) -> Vec<ComicGroup> {
        let mut groups: Vec<ComicGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for task in self.snapshot() {
            let slot = *index.entry(task.comic_title.clone()).or_insert_with(|| {
                groups.push(ComicGroup {
                    comic_title: task.comic_title.clone(),
                    chapters: Vec::new(),
                    finished_chapters: 0,
                    total_chapters: 0,
                });
                groups.len() - 1
            });
            let group = &mut groups[slot];
            group.total_chapters += 1;
            if task.status == ChapterStatus::Completed {
                group.finished_chapters += 1;
            }
            group.chapters.push(task);
        }
        groups
    }

    pub fn total_chapters(&self) -> usize {
        self.core.registry.len()
    }

    pub fn finished_chapters(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|t| t.status == ChapterStatus::Completed)
            .count()
    }

    /// 是否还有未进入终态的章节
    pub fn has_active_tasks(&self) -> bool {
        self.snapshot().iter().any(|t| !t.status.is_terminal())
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            fetch_queued: self.core.fetch_pool.queued(),
            fetch_active: self.core.fetch_pool.active(),
            fetch_limit: self.core.fetch_pool.limit(),
            download_queued: self.core.download_pool.queued(),
            download_active: self.core.download_pool.active(),
            download_limit: self.core.download_pool.limit(),
        }
    }

    /// 已完成章节在磁盘上的图片
    pub async fn downloaded_images(&self, chapter_id: &str) -> std::io::Result<Vec<StoredImage>> {
        let Some(tracked) = self.core.registry.tracked(chapter_id) else {
            return Ok(Vec::new());
        };
        if tracked.task.status != ChapterStatus::Completed {
            return Ok(Vec::new());
        }
        let roots = self.search_roots(Some(tracked.root.clone()));
        self.core
            .store
            .list_images(
                &roots,
                &tracked.task.comic_dir_name,
                &tracked.task.chapter_dir_name,
            )
            .await
    }

    /// 等待所有章节进入终态
    pub async fn wait_idle(&self) {
        let mut events = self.subscribe();
        while self.has_active_tasks() {
            match tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
                Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) | Err(_) => continue,
                Ok(Err(RecvError::Closed)) => break,
            }
        }
    }
}
