use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::models::DownloadEvent;
use super::task::ChapterStatus;

/// 每个章节一条进度条，由下载事件驱动
pub struct ChapterProgress {
    multi_pb: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: ProgressStyle,
}

impl Default for ChapterProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ChapterProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("{prefix:.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        Self {
            multi_pb: MultiProgress::new(),
            bars: HashMap::new(),
            style,
        }
    }

    pub fn handle(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Added(task) => {
                let pb = self.multi_pb.add(ProgressBar::new(task.total as u64));
                pb.set_style(self.style.clone());
                pb.set_prefix(task.chapter_title.clone());
                pb.set_position(task.finished as u64);
                if task.status == ChapterStatus::Completed {
                    pb.finish_with_message("已存在");
                } else {
                    pb.set_message(task.status.label());
                }
                self.bars.insert(task.chapter_id.clone(), pb);
            }
            DownloadEvent::StatusChanged { chapter_id, to, .. } => {
                if let Some(pb) = self.bars.get(chapter_id) {
                    match to {
                        ChapterStatus::Completed => pb.finish_with_message(to.label()),
                        ChapterStatus::Error => {}
                        _ => pb.set_message(to.label()),
                    }
                }
            }
            DownloadEvent::Progress {
                chapter_id,
                finished,
                total,
            } => {
                if let Some(pb) = self.bars.get(chapter_id) {
                    pb.set_length(*total as u64);
                    pb.set_position(*finished as u64);
                }
            }
            DownloadEvent::Failed {
                chapter_id,
                message,
            } => {
                if let Some(pb) = self.bars.get(chapter_id) {
                    pb.abandon_with_message(format!("失败: {}", message));
                }
            }
            DownloadEvent::Removed { chapter_id } => {
                if let Some(pb) = self.bars.remove(chapter_id) {
                    pb.finish_and_clear();
                    self.multi_pb.remove(&pb);
                }
            }
        }
    }

    /// 在后台消费事件，直到通道关闭或任务被中止
    pub fn spawn(mut self, mut events: broadcast::Receiver<DownloadEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.handle(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("进度事件积压，跳过 {} 条", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
