use serde::{Deserialize, Serialize};

use super::task::{ChapterDownloadTask, ChapterStatus};

/// 提交下载时的章节引用
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

impl ChapterRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// 章节任务的变化通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Added(ChapterDownloadTask),
    StatusChanged {
        chapter_id: String,
        from: ChapterStatus,
        to: ChapterStatus,
    },
    Progress {
        chapter_id: String,
        finished: usize,
        total: usize,
    },
    Failed {
        chapter_id: String,
        message: String,
    },
    Removed {
        chapter_id: String,
    },
}

impl DownloadEvent {
    pub fn chapter_id(&self) -> &str {
        match self {
            DownloadEvent::Added(task) => &task.chapter_id,
            DownloadEvent::StatusChanged { chapter_id, .. }
            | DownloadEvent::Progress { chapter_id, .. }
            | DownloadEvent::Failed { chapter_id, .. }
            | DownloadEvent::Removed { chapter_id } => chapter_id,
        }
    }

    /// 比较同一章节修改前后的任务，生成对应的事件
    pub(crate) fn diff(before: &ChapterDownloadTask, after: &ChapterDownloadTask) -> Vec<DownloadEvent> {
        let mut events = Vec::new();
        if before.status != after.status {
            events.push(DownloadEvent::StatusChanged {
                chapter_id: after.chapter_id.clone(),
                from: before.status,
                to: after.status,
            });
        }
        if before.finished != after.finished || before.total != after.total {
            events.push(DownloadEvent::Progress {
                chapter_id: after.chapter_id.clone(),
                finished: after.finished,
                total: after.total,
            });
        }
        if before.error.is_none() {
            if let Some(message) = &after.error {
                events.push(DownloadEvent::Failed {
                    chapter_id: after.chapter_id.clone(),
                    message: message.clone(),
                });
            }
        }
        events
    }
}

/// 按作品分组的章节任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComicGroup {
    pub comic_title: String,
    pub chapters: Vec<ChapterDownloadTask>,
    pub finished_chapters: usize,
    pub total_chapters: usize,
}

/// 两个调度池的运行情况
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub fetch_queued: usize,
    pub fetch_active: usize,
    pub fetch_limit: usize,
    pub download_queued: usize,
    pub download_active: usize,
    pub download_limit: usize,
}
