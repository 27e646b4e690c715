use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, info, warn};

use super::core::DownloadCore;
use super::task::ChapterDownloadTask;

type PendingProbe = Shared<BoxFuture<'static, Option<ChapterDownloadTask>>>;

/// 把磁盘上已下载完整的章节登记为已完成，不访问远端
///
/// 同一章节的并发探测会合并为一次。
#[derive(Default)]
pub struct LocalDetector {
    pending: Mutex<HashMap<String, PendingProbe>>,
}

impl LocalDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reconcile(
        &self,
        core: &Arc<DownloadCore>,
        roots: Vec<PathBuf>,
        chapter_id: &str,
        chapter_title: &str,
        comic_title: &str,
    ) -> Option<ChapterDownloadTask> {
        if chapter_id.is_empty() || chapter_title.is_empty() || comic_title.is_empty() {
            return None;
        }
        if let Some(task) = core.registry.get(chapter_id) {
            return Some(task);
        }

        let probe = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.get(chapter_id) {
                Some(probe) => {
                    debug!("章节 {} 正在检查本地文件，复用结果", chapter_id);
                    probe.clone()
                }
                None => {
                    let probe = probe_chapter(
                        Arc::clone(core),
                        roots,
                        chapter_id.to_string(),
                        chapter_title.to_string(),
                        comic_title.to_string(),
                    )
                    .boxed()
                    .shared();
                    pending.insert(chapter_id.to_string(), probe.clone());
                    probe
                }
            }
        };

        let result = probe.clone().await;
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(chapter_id).is_some_and(|p| p.ptr_eq(&probe)) {
            pending.remove(chapter_id);
        }
        result
    }

    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

async fn probe_chapter(
    core: Arc<DownloadCore>,
    roots: Vec<PathBuf>,
    chapter_id: String,
    chapter_title: String,
    comic_title: String,
) -> Option<ChapterDownloadTask> {
    let root = roots.first()?.clone();
    let candidate = ChapterDownloadTask::new(&chapter_id, &chapter_title, &comic_title);
    let images = match core
        .store
        .list_images(&roots, &candidate.comic_dir_name, &candidate.chapter_dir_name)
        .await
    {
        Ok(images) => images,
        Err(e) => {
            warn!("检查本地章节 {} 失败: {}", chapter_id, e);
            return None;
        }
    };
    if images.is_empty() {
        return None;
    }

    info!("章节 {} 已存在 {} 张图片，标记为已完成", chapter_title, images.len());
    let task = ChapterDownloadTask::completed_locally(&chapter_id, &chapter_title, &comic_title, images.len());
    Some(core.registry.insert_completed(task, &root))
}
