use colored::*;

use crate::downloader::task::{ChapterDownloadTask, ChapterStatus};

/// 终端输出工具
pub struct PrettyLogger;

impl PrettyLogger {
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    pub fn error(message: impl AsRef<str>) {
        eprintln!("{} {}", "✗".red().bold(), message.as_ref());
    }

    /// 显示步骤开始
    pub fn step_start(step: impl AsRef<str>) {
        println!("\n{} {}", "▶".cyan().bold(), step.as_ref().bold());
    }

    /// 显示作品信息
    pub fn comic_info(title: impl AsRef<str>, chapters: usize) {
        println!(
            "{} {} ({} 个章节)",
            "📚".magenta().bold(),
            title.as_ref().bold(),
            chapters.to_string().cyan()
        );
    }

    /// 显示目录
    pub fn file_info(label: impl AsRef<str>, path: impl AsRef<str>) {
        println!("{} {}: {}", "📁".blue().bold(), label.as_ref().bold(), path.as_ref());
    }

    /// 一行章节状态
    pub fn chapter_line(task: &ChapterDownloadTask) {
        let label = match task.status {
            ChapterStatus::Completed => task.status.label().green(),
            ChapterStatus::Error => task.status.label().red(),
            _ => task.status.label().yellow(),
        };
        let mut line = format!(
            "  [{}] {} {}/{}",
            label,
            task.chapter_title,
            task.finished,
            task.total
        );
        if let Some(error) = &task.error {
            line.push_str(&format!(" {}", error.bright_black()));
        }
        println!("{}", line);
    }

    pub fn separator() {
        println!("{}", "─".repeat(50).bright_black());
    }

    /// 居中标题
    pub fn title(text: impl AsRef<str>) {
        let text = text.as_ref();
        let width = text.chars().count();
        let padding = 48usize.saturating_sub(width) / 2;
        let rest = 48usize.saturating_sub(width + padding);
        println!(
            "{} {} {}",
            "─".repeat(padding).bright_black(),
            text.bold(),
            "─".repeat(rest).bright_black()
        );
    }

    /// 下载总结
    pub fn completion_summary(finished: usize, failed: usize, total: usize) {
        if failed == 0 {
            println!("\n{}", "🎉 下载完成！".green().bold());
        } else {
            println!("\n{}", "下载结束，部分章节失败".yellow().bold());
        }
        println!("  完成 {} / 共 {}", finished.to_string().green(), total);
        if failed > 0 {
            println!("  失败 {}", failed.to_string().red());
        }
    }
}

#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::success(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::warning(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::error(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_step {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::step_start(format!($($arg)*))
    };
}
