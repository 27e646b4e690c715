use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info};

use jm_downloader::common::api::client::JmClient;
use jm_downloader::common::config::Settings;
use jm_downloader::common::logger::PrettyLogger;
use jm_downloader::downloader::progress::ChapterProgress;
use jm_downloader::downloader::{ChapterDownloader, ChapterRef, ChapterStatus};
use jm_downloader::{log_info, log_step, log_success, log_warning};

mod cli;

/// 合并配置文件和命令行参数
fn load_settings(args: &cli::Cli) -> Result<Settings> {
    let mut settings = Settings::load(&args.config)?;
    if let Some(dir) = &args.output_dir {
        settings.download_dir = Some(dir.clone());
    }
    if let Some(n) = args.fetch_concurrency {
        settings.fetch_concurrency = n;
    }
    if let Some(n) = args.concurrency {
        settings.download_concurrency = n;
    }
    if args.overwrite {
        settings.skip_existing = false;
    }
    if let Some(proxy) = &args.proxy {
        settings.api.proxy_url = proxy.clone();
        settings.api.api_proxy_enabled = true;
    }
    Ok(settings.normalized())
}

/// 确定作品名和要下载的章节
async fn resolve_chapters(args: &cli::Cli, client: &JmClient) -> Result<(String, Vec<ChapterRef>)> {
    if let Some(album_id) = &args.album {
        let album = client
            .album(album_id)
            .await
            .with_context(|| format!("获取作品信息失败: {}", album_id))?;
        let chapters = album
            .chapters
            .iter()
            .map(|c| ChapterRef::new(c.id.clone(), c.title.clone()))
            .collect();
        let title = args.comic.clone().unwrap_or(album.title);
        return Ok((title, chapters));
    }

    let chapters = args
        .chapters
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| ChapterRef::new(id, format!("章节 {}", id)))
        .collect();
    let title = args
        .comic
        .clone()
        .unwrap_or_else(|| jm_downloader::downloader::manager::UNKNOWN_COMIC_TITLE.to_string());
    Ok((title, chapters))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // 进度条期间只输出警告，--verbose 时输出调试日志
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_target(false)
        .init();

    let settings = load_settings(&args)?;
    debug!("配置: {:?}", settings);

    let client = Arc::new(JmClient::new(settings.api.clone(), settings.request_timeout())?);
    let downloader = ChapterDownloader::new(client.clone(), &settings);
    let root = downloader.download_root()?;
    PrettyLogger::file_info("下载目录", root.display().to_string());

    log_step!("获取章节列表");
    let (comic_title, chapters) = resolve_chapters(&args, &client).await?;
    if chapters.is_empty() {
        bail!("没有要下载的章节");
    }
    PrettyLogger::comic_info(&comic_title, chapters.len());

    let progress = ChapterProgress::new().spawn(downloader.subscribe());

    let mut pending = Vec::new();
    for chapter in chapters {
        match downloader.reconcile(&chapter.id, &chapter.title, &comic_title).await {
            Some(task) => debug!("章节 {} 本地已存在 {} 张图片", task.chapter_title, task.total),
            None => pending.push(chapter),
        }
    }
    let existing = downloader.total_chapters();

    log_step!("开始下载");
    let added = downloader.submit(&comic_title, &pending)?;
    info!("新增 {} 个章节，本地已有 {} 个", added, existing);

    downloader.wait_idle().await;
    for attempt in 1..=args.retries {
        let restarted = downloader.retry_failed()?;
        if restarted == 0 {
            break;
        }
        log_warning!("第 {} 次重试，重新下载 {} 个失败章节", attempt, restarted);
        downloader.wait_idle().await;
    }
    progress.abort();

    PrettyLogger::separator();
    for group in downloader.comic_groups() {
        PrettyLogger::title(&group.comic_title);
        for task in &group.chapters {
            PrettyLogger::chapter_line(task);
        }
    }

    let failed = downloader
        .snapshot()
        .iter()
        .filter(|t| t.status == ChapterStatus::Error)
        .count();
    let finished = downloader.finished_chapters();
    let total = downloader.total_chapters();
    PrettyLogger::completion_summary(finished, failed, total);

    if existing > 0 {
        log_info!("跳过 {} 个本地已存在的章节", existing);
    }
    if failed > 0 {
        bail!("{} 个章节下载失败", failed);
    }
    log_success!("全部章节已保存到 {}", root.display());
    Ok(())
}
