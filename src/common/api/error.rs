use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("网络请求失败: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("响应解析失败: {0}")]
    InvalidResponse(String),

    #[error("未授权：请先登录或 Cookie 已过期")]
    Unauthorized,

    #[error("HTTP {0}: {1}")]
    HttpStatus(u16, String),

    #[error("API 返回错误: code={0}, message={1}")]
    ApiError(i64, String),

    #[error("解密失败: {0}")]
    Decrypt(String),

    #[error("无效的章节 ID: {0}")]
    InvalidChapterId(String),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}

impl ApiError {
    /// 由 HTTP 状态码构造错误
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return ApiError::Unauthorized;
        }
        ApiError::HttpStatus(
            status.as_u16(),
            status.canonical_reason().unwrap_or("").to_string(),
        )
    }
}
