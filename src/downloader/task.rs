use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::common::api::models::ChapterImage;
use crate::common::naming::{image_filename, sanitize_segment};

/// 章节下载状态
///
/// `Pending → Fetching → Queued → Downloading → Completed`，
/// `Error` 可由 `Fetching`、`Queued`、`Downloading` 进入。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    Pending,
    Fetching,
    Queued,
    Downloading,
    Completed,
    Error,
}

impl ChapterStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChapterStatus::Completed | ChapterStatus::Error)
    }

    pub fn can_transition_to(self, next: ChapterStatus) -> bool {
        use ChapterStatus::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Fetching, Queued)
                | (Fetching, Downloading)
                | (Queued, Downloading)
                | (Downloading, Completed)
                | (Fetching | Queued | Downloading, Error)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ChapterStatus::Pending => "等待中",
            ChapterStatus::Fetching => "获取中",
            ChapterStatus::Queued => "排队中",
            ChapterStatus::Downloading => "下载中",
            ChapterStatus::Completed => "已完成",
            ChapterStatus::Error => "失败",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ChapterStatus,
    pub to: ChapterStatus,
}

/// 一个章节的下载任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterDownloadTask {
    pub chapter_id: String,
    pub chapter_title: String,
    pub comic_title: String,
    pub status: ChapterStatus,
    pub total: usize,
    pub finished: usize,
    pub error: Option<String>,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    pub comic_dir_name: String,
    pub chapter_dir_name: String,
}

impl ChapterDownloadTask {
    pub fn new(chapter_id: &str, chapter_title: &str, comic_title: &str) -> Self {
        Self {
            chapter_id: chapter_id.to_string(),
            chapter_title: chapter_title.to_string(),
            comic_title: comic_title.to_string(),
            status: ChapterStatus::Pending,
            total: 0,
            finished: 0,
            error: None,
            created_at: now_millis(),
            comic_dir_name: sanitize_segment(comic_title),
            chapter_dir_name: sanitize_segment(chapter_title),
        }
    }

    /// 本地已存在的章节
    pub fn completed_locally(chapter_id: &str, chapter_title: &str, comic_title: &str, count: usize) -> Self {
        Self {
            status: ChapterStatus::Completed,
            total: count,
            finished: count,
            ..Self::new(chapter_id, chapter_title, comic_title)
        }
    }

    pub fn transition(&mut self, next: ChapterStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// 进入失败状态，已失败的任务保留第一条错误信息
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.transition(ChapterStatus::Error).is_err() {
            return false;
        }
        self.error = Some(message.into());
        true
    }

    /// 完成一张图片，`finished` 不会超过 `total`
    pub fn record_finished_image(&mut self) {
        if self.finished < self.total {
            self.finished += 1;
        }
        if self.finished >= self.total && self.status == ChapterStatus::Downloading {
            self.status = ChapterStatus::Completed;
        }
    }

    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.finished as f64 / self.total as f64
    }
}

/// 单张图片的下载任务，只引用所属章节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDownloadTask {
    /// `章节ID-页码`
    pub id: String,
    pub chapter_id: String,
    /// 所属章节任务的代次
    pub generation: u64,
    pub url: String,
    pub filename: String,
    pub index: usize,
    pub total: usize,
    pub strip_count: u32,
    pub original_filename: String,
}

impl ImageDownloadTask {
    pub fn from_image(chapter_id: &str, generation: u64, image: &ChapterImage, position: usize, total: usize) -> Self {
        let index = if image.index > 0 { image.index } else { position };
        let original_filename = if image.filename.is_empty() {
            format!("{}.png", position)
        } else {
            image.filename.clone()
        };
        Self {
            id: format!("{}-{}", chapter_id, index),
            chapter_id: chapter_id.to_string(),
            generation,
            url: image.url.clone(),
            filename: image_filename(index, &original_filename),
            index,
            total,
            strip_count: image.strip_count,
            original_filename,
        }
    }

    pub fn as_chapter_image(&self) -> ChapterImage {
        ChapterImage {
            url: self.url.clone(),
            filename: self.original_filename.clone(),
            filename_without_ext: crate::common::naming::strip_extension(&self.original_filename).to_string(),
            strip_count: self.strip_count,
            index: self.index,
        }
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_only() {
        let mut task = ChapterDownloadTask::new("101", "第1话", "作品");
        assert_eq!(task.status, ChapterStatus::Pending);
        assert!(task.transition(ChapterStatus::Queued).is_err());
        task.transition(ChapterStatus::Fetching).unwrap();
        task.transition(ChapterStatus::Queued).unwrap();
        assert!(task.transition(ChapterStatus::Fetching).is_err());
        task.transition(ChapterStatus::Downloading).unwrap();
        task.transition(ChapterStatus::Completed).unwrap();
        assert!(task.status.is_terminal());
        assert!(task.transition(ChapterStatus::Error).is_err());
    }

    #[test]
    fn pending_cannot_fail_directly() {
        let mut task = ChapterDownloadTask::new("101", "第1话", "作品");
        assert!(!task.fail("boom"));
        assert_eq!(task.status, ChapterStatus::Pending);
        assert!(task.error.is_none());
    }

    #[test]
    fn first_error_message_wins() {
        let mut task = ChapterDownloadTask::new("101", "第1话", "作品");
        task.transition(ChapterStatus::Fetching).unwrap();
        assert!(task.fail("first"));
        assert!(!task.fail("second"));
        assert_eq!(task.error.as_deref(), Some("first"));
    }

    #[test]
    fn finished_never_exceeds_total() {
        let mut task = ChapterDownloadTask::new("101", "第1话", "作品");
        task.total = 2;
        task.status = ChapterStatus::Downloading;
        task.record_finished_image();
        assert_eq!(task.status, ChapterStatus::Downloading);
        task.record_finished_image();
        task.record_finished_image();
        assert_eq!(task.finished, 2);
        assert_eq!(task.status, ChapterStatus::Completed);
    }

    #[test]
    fn errored_chapter_keeps_counting_but_stays_errored() {
        let mut task = ChapterDownloadTask::new("101", "第1话", "作品");
        task.total = 1;
        task.status = ChapterStatus::Downloading;
        task.fail("网络错误");
        task.record_finished_image();
        assert_eq!(task.finished, 1);
        assert_eq!(task.status, ChapterStatus::Error);
    }

    #[test]
    fn directory_names_are_sanitized() {
        let task = ChapterDownloadTask::new("1", "第1话: 开端", "a/b");
        assert_eq!(task.comic_dir_name, "a_b");
        assert_eq!(task.chapter_dir_name, "第1话_ 开端");
    }

    #[test]
    fn image_task_naming() {
        let image = ChapterImage {
            url: "https://img/00003.webp".to_string(),
            filename: "00003.webp".to_string(),
            filename_without_ext: "00003".to_string(),
            strip_count: 6,
            index: 3,
        };
        let task = ImageDownloadTask::from_image("350000", 7, &image, 2, 10);
        assert_eq!(task.id, "350000-3");
        assert_eq!(task.filename, "003.webp");
        assert_eq!(task.generation, 7);
        assert_eq!(task.total, 10);
        assert_eq!(task.as_chapter_image(), image);
    }
}
