use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::common::api::ComicSource;
use crate::common::cache::ManifestCache;
use crate::common::naming::{extension_of, image_filename};
use crate::common::storage::ImageStore;
use crate::descramble::{self, ReconstructedImage};

use super::cancel::TombstoneSet;
use super::error::DownloadError;
use super::fetch::FetchJob;
use super::pool::{Worker, WorkerPool};
use super::registry::TaskRegistry;
use super::task::{ChapterStatus, ImageDownloadTask};

/// 两个调度池共享的下载状态
pub struct DownloadCore {
    pub(crate) source: Arc<dyn ComicSource>,
    pub(crate) store: Arc<dyn ImageStore>,
    pub(crate) registry: TaskRegistry,
    pub(crate) tombstones: TombstoneSet,
    pub(crate) cache: ManifestCache,
    pub(crate) fetch_pool: WorkerPool<FetchJob>,
    pub(crate) download_pool: WorkerPool<ImageDownloadTask>,
    skip_existing: AtomicBool,
}

/// 图片落盘位置
struct ImageTarget {
    root: PathBuf,
    comic_dir: String,
    chapter_dir: String,
}

impl DownloadCore {
    pub(crate) fn new(
        source: Arc<dyn ComicSource>,
        store: Arc<dyn ImageStore>,
        registry: TaskRegistry,
        cache: ManifestCache,
        fetch_concurrency: usize,
        download_concurrency: usize,
        skip_existing: bool,
    ) -> Self {
        Self {
            source,
            store,
            registry,
            tombstones: TombstoneSet::new(),
            cache,
            fetch_pool: WorkerPool::new("章节获取", fetch_concurrency),
            download_pool: WorkerPool::new("图片下载", download_concurrency),
            skip_existing: AtomicBool::new(skip_existing),
        }
    }

    pub(crate) fn skip_existing(&self) -> bool {
        self.skip_existing.load(Ordering::Relaxed)
    }

    pub(crate) fn set_skip_existing(&self, skip: bool) {
        self.skip_existing.store(skip, Ordering::Relaxed);
    }

    /// 移除某一代次尚未开始的获取和下载任务，同一章节更新代次的任务保留
    pub(crate) fn drop_queued(&self, chapter_id: &str, generation: u64) -> usize {
        let fetch_dropped = self
            .fetch_pool
            .retain(|job| job.chapter_id != chapter_id || job.generation != generation);
        let download_dropped = self
            .download_pool
            .retain(|task| task.chapter_id != chapter_id || task.generation != generation);
        fetch_dropped + download_dropped
    }

    /// 下载、还原并保存一张图片；返回 `Ok(None)` 表示章节中途被取消
    async fn download_image(
        &self,
        task: &ImageDownloadTask,
        target: &ImageTarget,
    ) -> Result<Option<PathBuf>, DownloadError> {
        if self.skip_existing()
            && self
                .store
                .exists(&target.root, &target.comic_dir, &target.chapter_dir, &task.filename)
                .await
        {
            debug!("图片已存在，跳过下载: {}", task.id);
            return Ok(Some(PathBuf::from(&task.filename)));
        }

        let bytes = self.source.fetch_image(&task.url).await?;
        if !self.registry.is_current(&task.chapter_id, task.generation) {
            return Ok(None);
        }

        let (data, filename) = if task.strip_count > 0 {
            self.reconstruct(task, bytes).await?
        } else {
            (bytes, task.filename.clone())
        };
        if !self.registry.is_current(&task.chapter_id, task.generation) {
            return Ok(None);
        }

        let path = self
            .store
            .write_image(
                &target.root,
                &target.comic_dir,
                &target.chapter_dir,
                &filename,
                &data,
            )
            .await?;
        Ok(Some(path))
    }

    /// 本地拼接失败时尝试远端还原
    async fn reconstruct(
        &self,
        task: &ImageDownloadTask,
        bytes: Vec<u8>,
    ) -> Result<(Vec<u8>, String), DownloadError> {
        let strips = task.strip_count;
        let local = tokio::task::spawn_blocking(move || descramble::reconstruct(&bytes, strips)).await?;
        match local {
            Ok(image) => {
                let filename = reconstructed_filename(task, &image);
                Ok((image.data, filename))
            }
            Err(e) => {
                warn!("图片 {} 本地还原失败: {}", task.id, e);
                match self.source.reconstruct_remote(&task.as_chapter_image()).await? {
                    Some(data) => Ok((data, task.filename.clone())),
                    None => Err(e.into()),
                }
            }
        }
    }
}

/// 还原后格式与原扩展名不一致时按实际格式命名
fn reconstructed_filename(task: &ImageDownloadTask, image: &ReconstructedImage) -> String {
    let original = extension_of(&task.filename).map(|e| e.to_ascii_lowercase());
    let same = match original.as_deref() {
        Some("jpg" | "jpeg") => image.extension() == "jpg",
        Some(ext) => ext == image.extension(),
        None => false,
    };
    if same {
        task.filename.clone()
    } else {
        image_filename(task.index, &format!("image.{}", image.extension()))
    }
}

#[async_trait]
impl Worker<ImageDownloadTask> for DownloadCore {
    async fn process(self: Arc<Self>, task: ImageDownloadTask) {
        let started = self.registry.begin_unit(&task.chapter_id, task.generation, |tracked| {
            if matches!(
                tracked.task.status,
                ChapterStatus::Queued | ChapterStatus::Fetching
            ) {
                let _ = tracked.task.transition(ChapterStatus::Downloading);
            }
            ImageTarget {
                root: tracked.root.clone(),
                comic_dir: tracked.task.comic_dir_name.clone(),
                chapter_dir: tracked.task.chapter_dir_name.clone(),
            }
        });
        let Some(target) = started else {
            debug!("章节 {} 已移除，丢弃图片任务 {}", task.chapter_id, task.id);
            return;
        };

        let result = self.download_image(&task, &target).await;

        let applied = self
            .registry
            .finish_unit(&task.chapter_id, task.generation, |tracked| match &result {
                Ok(Some(_)) => {
                    tracked.task.record_finished_image();
                    if tracked.task.status == ChapterStatus::Completed {
                        debug!("章节 {} 下载完成", tracked.task.chapter_id);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if tracked.task.fail(e.to_string()) {
                        warn!("章节 {} 下载失败: {}", tracked.task.chapter_id, e);
                    }
                }
            });

        if applied.is_none() && self.tombstones.observe(&task.chapter_id, task.generation) {
            debug!("章节 {} 已取消，丢弃图片 {} 的结果", task.chapter_id, task.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::api::error::ApiError;
    use crate::common::api::models::ChapterManifest;
    use crate::common::storage::FsImageStore;
    use image::ImageFormat;
    use tokio::sync::broadcast;

    struct Offline;

    #[async_trait]
    impl ComicSource for Offline {
        async fn chapter_manifest(&self, chapter_id: &str) -> Result<ChapterManifest, ApiError> {
            Err(ApiError::InvalidChapterId(chapter_id.to_string()))
        }

        async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, ApiError> {
            Err(ApiError::InvalidUrl(url.to_string()))
        }
    }

    fn core() -> DownloadCore {
        let (events, _) = broadcast::channel(16);
        DownloadCore::new(
            Arc::new(Offline),
            Arc::new(FsImageStore::new()),
            TaskRegistry::new(events),
            ManifestCache::default(),
            2,
            10,
            true,
        )
    }

    fn task(filename: &str) -> ImageDownloadTask {
        ImageDownloadTask {
            id: "1-2".to_string(),
            chapter_id: "1".to_string(),
            generation: 1,
            url: String::new(),
            filename: filename.to_string(),
            index: 2,
            total: 3,
            strip_count: 4,
            original_filename: filename.to_string(),
        }
    }

    fn image(format: ImageFormat) -> ReconstructedImage {
        ReconstructedImage {
            data: Vec::new(),
            format,
        }
    }

    #[test]
    fn keeps_name_when_format_matches() {
        assert_eq!(reconstructed_filename(&task("002.webp"), &image(ImageFormat::WebP)), "002.webp");
        assert_eq!(reconstructed_filename(&task("002.jpeg"), &image(ImageFormat::Jpeg)), "002.jpeg");
    }

    #[test]
    fn renames_when_format_changes() {
        assert_eq!(reconstructed_filename(&task("002.webp"), &image(ImageFormat::Png)), "002.png");
    }

    #[test]
    fn drop_queued_keeps_newer_generation() {
        let core = core();
        core.fetch_pool.push(FetchJob {
            chapter_id: "7".to_string(),
            generation: 1,
        });
        core.fetch_pool.push(FetchJob {
            chapter_id: "7".to_string(),
            generation: 2,
        });
        core.fetch_pool.push(FetchJob {
            chapter_id: "8".to_string(),
            generation: 1,
        });
        let mut stale = task("001.png");
        stale.chapter_id = "7".to_string();
        let mut fresh = task("002.png");
        fresh.chapter_id = "7".to_string();
        fresh.generation = 2;
        core.download_pool.push(stale);
        core.download_pool.push(fresh);

        assert_eq!(core.drop_queued("7", 1), 2);
        assert_eq!(core.fetch_pool.queued(), 2);
        assert_eq!(core.download_pool.queued(), 1);
        assert_eq!(core.drop_queued("7", 2), 2);
        assert_eq!(core.fetch_pool.queued(), 1);
        assert!(core.download_pool.is_idle());
    }
}
