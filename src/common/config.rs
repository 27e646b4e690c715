use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::downloader::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "jmdl.json";
pub const DEFAULT_FETCH_CONCURRENCY: usize = 2;
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 10;
/// 章节清单缓存 24 小时
pub const DEFAULT_MANIFEST_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// 远端接口配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub api_domain: String,
    pub image_domain: String,
    pub app_token_secret: String,
    pub app_token_secret2: String,
    pub app_data_secret: String,
    pub app_version: String,
    pub proxy_url: String,
    pub api_proxy_enabled: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_domain: "www.cdnzack.cc".to_string(),
            image_domain: "cdn-msp2.jmapiproxy2.cc".to_string(),
            app_token_secret: "18comicAPP".to_string(),
            app_token_secret2: "18comicAPPContent".to_string(),
            app_data_secret: "185Hcomic3PAPP7R".to_string(),
            app_version: "2.0.6".to_string(),
            proxy_url: String::new(),
            api_proxy_enabled: false,
        }
    }
}

/// 下载器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 下载根目录，未设置时使用系统下载目录
    pub download_dir: Option<PathBuf>,
    pub fetch_concurrency: usize,
    pub download_concurrency: usize,
    /// 已存在的同名图片视为完成
    pub skip_existing: bool,
    pub request_timeout_secs: u64,
    pub manifest_cache_ttl_secs: u64,
    pub api: ApiSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: None,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            skip_existing: true,
            request_timeout_secs: 30,
            manifest_cache_ttl_secs: DEFAULT_MANIFEST_CACHE_TTL_SECS,
            api: ApiSettings::default(),
        }
    }
}

impl Settings {
    /// 读取配置文件，文件不存在时使用默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("配置文件不存在，使用默认配置: {}", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings: Settings = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!("已加载配置文件: {}", path.display());
        Ok(settings.normalized())
    }

    /// 并发数至少为 1
    pub fn normalized(mut self) -> Self {
        self.fetch_concurrency = self.fetch_concurrency.max(1);
        self.download_concurrency = self.download_concurrency.max(1);
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn manifest_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.manifest_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.fetch_concurrency, 2);
        assert_eq!(settings.download_concurrency, 10);
    }

    #[test]
    fn partial_file_keeps_defaults_and_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jmdl.json");
        std::fs::write(
            &path,
            r#"{"download_dir": "/tmp/comics", "fetch_concurrency": 0, "api": {"app_version": "1.7.5"}}"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.download_dir, Some(PathBuf::from("/tmp/comics")));
        assert_eq!(settings.fetch_concurrency, 1);
        assert_eq!(settings.download_concurrency, 10);
        assert_eq!(settings.api.app_version, "1.7.5");
        assert_eq!(settings.api.app_token_secret, "18comicAPP");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jmdl.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
