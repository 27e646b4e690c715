use std::path::PathBuf;

use thiserror::Error;

use crate::common::api::error::ApiError;
use crate::descramble::DescrambleError;

/// 获取章节图片清单失败
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Api(#[from] ApiError),

    #[error("章节没有图片")]
    NoImages,
}

/// 单张图片下载失败
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("下载失败：{0}")]
    Network(#[from] ApiError),

    #[error("图片拼接失败: {0}")]
    Reconstruct(#[from] DescrambleError),

    #[error("图片拼接任务异常: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("保存图片失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 配置错误，会在任何网络请求之前中止整批下载
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("请先在设置中配置下载目录")]
    NoDownloadRoot,

    #[error("读取配置文件失败 {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("配置文件格式错误 {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
