//! 本地图片存储
//!
//! 下载的图片按 `根目录/作品/章节/序号.扩展名` 落盘。

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::debug;

use crate::common::naming::{compare_natural, is_image_file, sanitize_segment};

/// 已落盘的图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub filename: String,
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
}

#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
    /// 写入一张图片，必要时创建目录，返回最终路径
    async fn write_image(
        &self,
        root: &Path,
        comic_dir: &str,
        chapter_dir: &str,
        filename: &str,
        data: &[u8],
    ) -> std::io::Result<PathBuf>;

    /// 列出章节目录下的图片，按文件名自然排序。
    /// 多个根目录时使用第一个包含作品目录的根目录。
    async fn list_images(
        &self,
        roots: &[PathBuf],
        comic_dir: &str,
        chapter_dir: &str,
    ) -> std::io::Result<Vec<StoredImage>>;

    /// 目标文件是否已存在且非空
    async fn exists(&self, root: &Path, comic_dir: &str, chapter_dir: &str, filename: &str) -> bool;
}

/// 基于本地文件系统的存储
#[derive(Debug, Clone, Default)]
pub struct FsImageStore;

impl FsImageStore {
    pub fn new() -> Self {
        Self
    }

    /// 章节目录。章节名与作品名相同时直接使用作品目录，写入和列出都遵循这一规则
    pub fn chapter_path(root: &Path, comic_dir: &str, chapter_dir: &str) -> PathBuf {
        let comic_path = root.join(sanitize_segment(comic_dir));
        if comic_dir == chapter_dir {
            return comic_path;
        }
        comic_path.join(sanitize_segment(chapter_dir))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn write_image(
        &self,
        root: &Path,
        comic_dir: &str,
        chapter_dir: &str,
        filename: &str,
        data: &[u8],
    ) -> std::io::Result<PathBuf> {
        let chapter_path = Self::chapter_path(root, comic_dir, chapter_dir);
        tokio::fs::create_dir_all(&chapter_path).await?;
        let target = chapter_path.join(sanitize_segment(filename));
        tokio::fs::write(&target, data).await?;
        debug!("图片已保存: {}", target.display());
        Ok(target)
    }

    async fn list_images(
        &self,
        roots: &[PathBuf],
        comic_dir: &str,
        chapter_dir: &str,
    ) -> std::io::Result<Vec<StoredImage>> {
        let mut chapter_path = None;
        for root in roots {
            let comic_path = root.join(sanitize_segment(comic_dir));
            if tokio::fs::metadata(&comic_path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
            {
                chapter_path = Some(Self::chapter_path(root, comic_dir, chapter_dir));
                break;
            }
        }
        let Some(chapter_path) = chapter_path else {
            return Ok(Vec::new());
        };

        let mut entries = match tokio::fs::read_dir(&chapter_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut images = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !is_image_file(&filename) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            images.push(StoredImage {
                filename,
                path: entry.path(),
                modified: meta.modified().ok(),
            });
        }
        images.sort_by(|a, b| compare_natural(&a.filename, &b.filename));
        Ok(images)
    }

    async fn exists(&self, root: &Path, comic_dir: &str, chapter_dir: &str, filename: &str) -> bool {
        let target = Self::chapter_path(root, comic_dir, chapter_dir).join(sanitize_segment(filename));
        tokio::fs::metadata(&target)
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }
}

/// 系统路径提供者
pub trait DownloadRootProvider: Send + Sync + 'static {
    /// 系统默认下载目录
    fn default_download_root(&self) -> Option<PathBuf>;
}

/// 从用户主目录推导 `Downloads`
#[derive(Debug, Clone, Default)]
pub struct SystemPaths;

impl DownloadRootProvider for SystemPaths {
    fn default_download_root(&self) -> Option<PathBuf> {
        let home = std::env::var_os("HOME")
            .filter(|h| !h.is_empty())
            .or_else(|| std::env::var_os("USERPROFILE").filter(|h| !h.is_empty()))?;
        Some(PathBuf::from(home).join("Downloads"))
    }
}
