//! 章节下载流水线
//!
//! 提交的章节先进入获取队列拿到图片清单，再拆成图片任务进入下载队列。
//! 两个队列各自限制并发，进度统一记录在任务表中。

pub mod cancel;
pub mod core;
pub mod error;
pub mod fetch;
pub mod local;
pub mod manager;
pub mod models;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod task;

pub use error::{ConfigError, DownloadError, FetchError};
pub use manager::ChapterDownloader;
pub use models::{ChapterRef, ComicGroup, DownloadEvent, PipelineStats};
pub use task::{ChapterDownloadTask, ChapterStatus, ImageDownloadTask};
