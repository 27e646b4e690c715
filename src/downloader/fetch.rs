use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::common::api::models::ChapterManifest;

use super::core::DownloadCore;
use super::error::FetchError;
use super::pool::Worker;
use super::task::{ChapterStatus, ImageDownloadTask};

/// 章节获取队列中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub chapter_id: String,
    pub generation: u64,
}

impl DownloadCore {
    /// 先查缓存，再请求远端；空清单视为失败且不缓存
    pub(crate) async fn load_manifest(&self, chapter_id: &str) -> Result<ChapterManifest, FetchError> {
        if let Some(manifest) = self.cache.get(chapter_id) {
            debug!("命中章节清单缓存: {}", chapter_id);
            return Ok(manifest);
        }
        let manifest = self.source.chapter_manifest(chapter_id).await?;
        if manifest.is_empty() {
            return Err(FetchError::NoImages);
        }
        self.cache.insert(manifest.clone());
        Ok(manifest)
    }
}

#[async_trait]
impl Worker<FetchJob> for DownloadCore {
    async fn process(self: Arc<Self>, job: FetchJob) {
        let FetchJob {
            chapter_id,
            generation,
        } = job;

        let started = self.registry.begin_unit(&chapter_id, generation, |tracked| {
            tracked.task.transition(ChapterStatus::Fetching).is_ok()
        });
        match started {
            None => {
                debug!("章节 {} 已移除，跳过获取", chapter_id);
                return;
            }
            Some(false) => {
                warn!("章节 {} 状态异常，跳过获取", chapter_id);
                self.registry.finish_unit(&chapter_id, generation, |_| ());
                return;
            }
            Some(true) => debug!("开始获取章节 {}", chapter_id),
        }

        let result = self.load_manifest(&chapter_id).await;

        // 图片任务在任务表锁内入队，取消时清理队列不会漏掉
        let applied = self
            .registry
            .finish_unit(&chapter_id, generation, |tracked| match &result {
                Ok(manifest) => {
                    let total = manifest.len();
                    tracked.task.total = total;
                    tracked.task.finished = 0;
                    self.download_pool.extend(manifest.images.iter().enumerate().map(
                        |(position, image)| {
                            ImageDownloadTask::from_image(
                                &chapter_id,
                                generation,
                                image,
                                position + 1,
                                total,
                            )
                        },
                    ));
                    let _ = tracked.task.transition(ChapterStatus::Queued);
                    info!("章节 {} 共 {} 张图片", tracked.task.chapter_title, total);
                    true
                }
                Err(e) => {
                    tracked.task.fail(e.to_string());
                    warn!("章节 {} 获取失败: {}", chapter_id, e);
                    false
                }
            });

        match applied {
            Some(true) => self.download_pool.pump(&self),
            Some(false) => {}
            None => {
                if self.tombstones.observe(&chapter_id, generation) {
                    debug!("章节 {} 已取消，丢弃获取结果", chapter_id);
                }
            }
        }
    }
}
