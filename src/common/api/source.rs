use async_trait::async_trait;

use super::error::ApiError;
use super::models::{ChapterImage, ChapterManifest};

/// 远端漫画源。下载流水线只依赖这个接口。
#[async_trait]
pub trait ComicSource: Send + Sync + 'static {
    /// 获取章节的图片清单
    async fn chapter_manifest(&self, chapter_id: &str) -> Result<ChapterManifest, ApiError>;

    /// 下载一张图片的原始字节
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, ApiError>;

    /// 由远端直接提供还原后的图片，本地还原失败时才会调用。
    /// 默认不支持。
    async fn reconstruct_remote(&self, _image: &ChapterImage) -> Result<Option<Vec<u8>>, ApiError> {
        Ok(None)
    }
}
