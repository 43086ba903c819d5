use thiserror::Error;

/**
 * \brief 适配层错误。
 * \details 只有 `test_connection` 会把它交给调用方；生成与语气分析会转换为可展示的文本。
 */
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("no active AI provider configured")]
    NoActiveProvider,

    #[error("provider {provider} has no API key")]
    MissingCredential { provider: String },

    /** \brief 厂商返回非 2xx；`message` 优先取厂商自身的错误信息 */
    #[error("{message}")]
    VendorHttp { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AdapterError {
    /** \brief 厂商 HTTP 状态码（若有）。 */
    pub fn status(&self) -> Option<u16> {
        match self {
            AdapterError::VendorHttp { status, .. } => Some(*status),
            AdapterError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/**
 * \brief 存储层可区分的错误，HTTP 层据此映射状态码。
 */
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{0}")]
    Invalid(String),
}
