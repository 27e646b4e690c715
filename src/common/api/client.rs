use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use aes::Aes256;
use aes::cipher::{BlockDecryptMut, KeyInit, block_padding::Pkcs7};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cookie_store::CookieStore;
use flate2::read::GzDecoder;
use lazy_static::lazy_static;
use md5::{Digest, Md5};
use regex::Regex;
use reqwest::{
    Client, ClientBuilder, Response,
    header::{ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT},
};
use reqwest_cookie_store::CookieStoreMutex;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};
use url::Url;

use super::ComicSource;
use super::error::ApiError;
use super::models::{AlbumInfo, ApiEnvelope, ChapterImage, ChapterManifest};
use crate::common::config::ApiSettings;
use crate::common::naming::strip_extension;
use crate::descramble::{DEFAULT_SCRAMBLE_THRESHOLD, strip_count};

lazy_static! {
    static ref SCRAMBLE_ID_PATTERN: Regex = Regex::new(r"var scramble_id = (\d+);").unwrap();
}

type Aes256EcbDec = ecb::Decryptor<Aes256>;

// 自动携带 Cookie 的漫画源客户端
#[derive(Debug, Clone)]
pub struct JmClient {
    pub inner: Client,
    pub cookie_store: Arc<CookieStoreMutex>,
    settings: ApiSettings,
}

impl JmClient {
    pub fn new(settings: ApiSettings, timeout: Duration) -> Result<Self, ApiError> {
        let cookie_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let inner = ClientBuilder::new()
            .timeout(timeout)
            .cookie_provider(Arc::clone(&cookie_store))
            .default_headers(Self::get_default_headers())
            .build()?;

        Ok(Self {
            inner,
            cookie_store,
            settings,
        })
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9"));
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36"));
        headers
    }

    pub fn settings(&self) -> &ApiSettings {
        &self.settings
    }

    /// 请求令牌: md5(时间戳 + 密钥)
    pub fn generate_token(&self, timestamp: i64, for_scramble_id: bool) -> String {
        let secret = if for_scramble_id {
            &self.settings.app_token_secret2
        } else {
            &self.settings.app_token_secret
        };
        md5_hex(&format!("{}{}", timestamp, secret))
    }

    fn token_param(&self, timestamp: i64) -> String {
        format!("{},{}", timestamp, self.settings.app_version)
    }

    /// 解密接口返回的 data 字段 (AES-256-ECB, PKCS7, base64)
    pub fn decrypt_data(&self, timestamp: i64, encrypted: &str) -> Result<String, ApiError> {
        let key = md5_hex(&format!("{}{}", timestamp, self.settings.app_data_secret));
        let cipher_bytes = BASE64
            .decode(encrypted.trim())
            .map_err(|e| ApiError::Decrypt(e.to_string()))?;

        let plain = Aes256EcbDec::new_from_slice(key.as_bytes())
            .map_err(|e| ApiError::Decrypt(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&cipher_bytes)
            .map_err(|e| ApiError::Decrypt(e.to_string()))?;

        String::from_utf8(plain).map_err(|e| ApiError::Decrypt(e.to_string()))
    }

    /// 组装接口地址，启用代理时把原地址编码后拼到代理后面
    pub fn build_api_url(&self, path: &str, params: &[(&str, String)]) -> Result<String, ApiError> {
        let raw = format!("https://{}{}", self.settings.api_domain, path);
        let url = Url::parse_with_params(&raw, params)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))?;

        if self.settings.api_proxy_enabled && !self.settings.proxy_url.is_empty() {
            return Ok(format!(
                "{}{}&type=api",
                self.settings.proxy_url,
                urlencoding::encode(url.as_str())
            ));
        }
        Ok(url.to_string())
    }

    pub fn image_url(&self, chapter_id: &str, filename: &str) -> String {
        format!(
            "https://{}/media/photos/{}/{}",
            self.settings.image_domain, chapter_id, filename
        )
    }

    fn try_decompress(raw: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        let mut decoder = GzDecoder::new(raw);
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded)?;
        Ok(decoded)
    }

    // 检查响应状态
    fn check_response_status(response: &Response, url: &str) -> Result<(), ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        warn!("非成功状态码: {}, URL: {}", status, url);
        Err(ApiError::from_status(status))
    }

    async fn send_signed(&self, url: &str, for_scramble_id: bool) -> Result<(Response, i64), ApiError> {
        let timestamp = OffsetDateTime::now_utc().unix_timestamp();
        let resp = self
            .inner
            .get(url)
            .header("token", self.generate_token(timestamp, for_scramble_id))
            .header("tokenparam", self.token_param(timestamp))
            .header(ACCEPT_ENCODING, "gzip")
            .send()
            .await?;
        Self::check_response_status(&resp, url)?;
        Ok((resp, timestamp))
    }

    async fn read_body(resp: Response) -> Result<String, ApiError> {
        let raw = resp.bytes().await?;
        let body = match Self::try_decompress(&raw) {
            Ok(data) => data,
            Err(_) => raw.to_vec(), // 解压失败则原样使用
        };
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// 调用加密接口，返回 data 已解密的完整响应
    pub async fn api_request(&self, path: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = self.build_api_url(path, params)?;
        debug!("API 请求: {}", url);

        let (resp, timestamp) = self.send_signed(&url, false).await?;
        let text = Self::read_body(resp).await?;
        let mut json: Value = serde_json::from_str(&text)?;

        let envelope: ApiEnvelope = serde_json::from_value(json.clone())?;
        if let Some(code) = envelope.code {
            if code != 200 {
                return Err(ApiError::ApiError(
                    code,
                    envelope.msg.unwrap_or_else(|| "未知错误".to_string()),
                ));
            }
        }

        if let Value::String(encrypted) = &envelope.data {
            if !encrypted.is_empty() {
                let decoded = match self.decrypt_data(timestamp, encrypted) {
                    Ok(plain) => serde_json::from_str::<Value>(&plain).ok(),
                    Err(e) => {
                        debug!("data 解密失败，尝试按明文解析: {}", e);
                        None
                    }
                }
                .or_else(|| serde_json::from_str::<Value>(encrypted).ok());

                if let (Some(decoded), Some(obj)) = (decoded, json.as_object_mut()) {
                    obj.insert("data".to_string(), decoded);
                }
            }
        }

        Ok(json)
    }

    /// 从章节阅读模板中取 scramble_id，失败时使用默认值
    async fn fetch_scramble_id(&self, chapter_id: &str) -> u64 {
        let timestamp = OffsetDateTime::now_utc().unix_timestamp();
        let params = [
            ("id", chapter_id.to_string()),
            ("v", timestamp.to_string()),
            ("mode", "vertical".to_string()),
            ("page", "0".to_string()),
            ("app_img_shunt", "1".to_string()),
            ("express", "off".to_string()),
        ];

        let result = async {
            let url = self.build_api_url("/chapter_view_template", &params)?;
            let (resp, _) = self.send_signed(&url, true).await?;
            Self::read_body(resp).await
        }
        .await;

        match result {
            Ok(body) => parse_scramble_id(&body).unwrap_or(DEFAULT_SCRAMBLE_THRESHOLD),
            Err(e) => {
                warn!("获取 scramble_id 失败，使用默认值: {}", e);
                DEFAULT_SCRAMBLE_THRESHOLD
            }
        }
    }

    /// 获取作品信息和章节列表
    pub async fn album(&self, album_id: &str) -> Result<AlbumInfo, ApiError> {
        let resp = self.api_request("/album", &[("id", album_id.to_string())]).await?;
        let data = match resp.get("data") {
            Some(data) if data.is_object() => data,
            _ => &resp,
        };
        AlbumInfo::from_value(album_id, data)
            .ok_or_else(|| ApiError::InvalidResponse(format!("作品数据不完整: {}", album_id)))
    }
}

#[async_trait]
impl ComicSource for JmClient {
    async fn chapter_manifest(&self, chapter_id: &str) -> Result<ChapterManifest, ApiError> {
        let numeric_id: u64 = chapter_id
            .trim()
            .parse()
            .map_err(|_| ApiError::InvalidChapterId(chapter_id.to_string()))?;

        let scramble_id = self.fetch_scramble_id(chapter_id).await;
        let resp = self.api_request("/chapter", &[("id", chapter_id.to_string())]).await?;

        let filenames = extract_image_filenames(&resp).ok_or_else(|| {
            let preview: String = resp.to_string().chars().take(200).collect();
            ApiError::InvalidResponse(format!("章节数据中没有图片列表。返回的数据: {}", preview))
        })?;

        let images = build_chapter_images(numeric_id, scramble_id, &filenames, |name| {
            self.image_url(chapter_id, name)
        });
        debug!(
            "章节 {} 共 {} 张图片, scramble_id={}",
            chapter_id,
            images.len(),
            scramble_id
        );

        Ok(ChapterManifest {
            chapter_id: chapter_id.to_string(),
            scramble_id,
            images,
        })
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let resp = self.inner.get(url).send().await?;
        Self::check_response_status(&resp, url)?;
        Ok(resp.bytes().await?.to_vec())
    }
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) fn parse_scramble_id(body: &str) -> Option<u64> {
    SCRAMBLE_ID_PATTERN
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// 章节数据可能在 data 里，也可能直接在顶层
pub(crate) fn extract_image_filenames(resp: &Value) -> Option<Vec<String>> {
    let chapter = match resp.get("data") {
        Some(data) if data.is_object() => data,
        _ => resp,
    };
    let images = chapter.get("images")?.as_array()?;
    Some(
        images
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

pub(crate) fn build_chapter_images(
    chapter_id: u64,
    scramble_id: u64,
    filenames: &[String],
    url_for: impl Fn(&str) -> String,
) -> Vec<ChapterImage> {
    filenames
        .iter()
        .enumerate()
        .map(|(idx, filename)| {
            let stem = strip_extension(filename).to_string();
            ChapterImage {
                url: url_for(filename),
                filename: filename.clone(),
                strip_count: strip_count(scramble_id, chapter_id, &stem),
                filename_without_ext: stem,
                index: idx + 1,
            }
        })
        .collect()
}
