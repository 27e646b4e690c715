use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use jm_downloader::common::config::DEFAULT_CONFIG_FILE;

/// 漫画章节下载器
#[derive(Parser, Debug)]
#[command(name = "jmdl")]
#[command(version = "0.1")]
#[command(about = "按章节下载漫画图片，自动还原分割的图片", long_about = None)]
#[command(group(ArgGroup::new("target").required(true).args(["chapters", "album"])))]
pub struct Cli {
    /// 章节 ID，多个用逗号分隔
    #[arg(long, value_name = "ID", value_delimiter = ',')]
    pub chapters: Vec<String>,

    /// 作品 ID，下载作品的全部章节
    #[arg(long, value_name = "ID")]
    pub album: Option<String>,

    /// 作品名，用于下载目录 (使用 --chapters 时)
    #[arg(long, value_name = "TITLE")]
    pub comic: Option<String>,

    /// 下载根目录，覆盖配置文件
    #[arg(long, value_name = "DIR")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,

    /// 配置文件
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// 同时获取章节清单的数量
    #[arg(long, value_name = "N")]
    pub fetch_concurrency: Option<usize>,

    /// 同时下载图片的数量
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// 重新下载已存在的图片
    #[arg(long)]
    pub overwrite: bool,

    /// 失败章节的重试次数
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub retries: usize,

    /// 接口代理前缀
    #[arg(long, value_name = "URL")]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub proxy: Option<String>,

    /// 输出调试日志
    #[arg(short, long)]
    pub verbose: bool,
}
