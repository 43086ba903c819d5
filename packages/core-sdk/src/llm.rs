use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::AdapterError;
use crate::models::{ProviderConfig, ProviderName};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;
const CHAT_TEMPERATURE: f64 = 0.7;

/** \brief 厂商响应中缺少文本字段时返回的占位文本。 */
pub const NO_RESPONSE_TEXT: &str = "No response text";

/**
 * \brief 厂商协议族；每一族各自负责构造请求与提取文本。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    Gemini,
    Anthropic,
    OpenAICompatible,
}

/**
 * \brief 随请求发送的站点标识（OpenRouter 需要）。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub site_origin: String,
    pub app_title: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            site_origin: "http://localhost:5173".to_string(),
            app_title: "Marketing AI".to_string(),
        }
    }
}

/** \brief 已构造、待发送的厂商请求。 */
#[derive(Debug)]
pub struct VendorRequest {
    pub url: String,
    pub query: Vec<(&'static str, String)>,
    pub headers: HeaderMap,
    pub body: Value,
}

pub fn protocol_for(name: &ProviderName) -> WireProtocol {
    match name {
        ProviderName::Gemini => WireProtocol::Gemini,
        ProviderName::Anthropic => WireProtocol::Anthropic,
        _ => WireProtocol::OpenAICompatible,
    }
}

/**
 * \brief 各厂商默认 API 根地址。
 */
pub fn default_base_url(name: &ProviderName) -> &'static str {
    match name {
        ProviderName::Gemini => "https://generativelanguage.googleapis.com/v1beta/models",
        ProviderName::Anthropic => "https://api.anthropic.com/v1",
        ProviderName::Groq => "https://api.groq.com/openai/v1",
        ProviderName::DeepSeek => "https://api.deepseek.com/v1",
        ProviderName::OpenRouter => "https://openrouter.ai/api/v1",
        ProviderName::Perplexity => "https://api.perplexity.ai",
        ProviderName::OpenAI | ProviderName::Custom(_) => "https://api.openai.com/v1",
    }
}

/**
 * \brief 计算最终基地址：覆盖值优先，并去掉末尾斜杠。
 */
pub fn resolve_base_url(config: &ProviderConfig) -> String {
    config
        .base_url_override()
        .unwrap_or_else(|| default_base_url(&config.provider_name))
        .trim_end_matches('/')
        .to_string()
}

impl WireProtocol {
    fn label(self) -> &'static str {
        match self {
            WireProtocol::Gemini => "Gemini API",
            WireProtocol::Anthropic => "Anthropic API",
            WireProtocol::OpenAICompatible => "API",
        }
    }

    /**
     * \brief 构造单轮 user 提示的厂商请求。
     */
    pub fn build_request(
        self,
        config: &ProviderConfig,
        api_key: &str,
        prompt: &str,
        identity: &ClientIdentity,
    ) -> Result<VendorRequest, AdapterError> {
        let base = resolve_base_url(config);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let request = match self {
            WireProtocol::Gemini => VendorRequest {
                url: format!("{}/{}:generateContent", base, config.model_name),
                query: vec![("key", api_key.to_string())],
                headers,
                body: json!({
                    "contents": [{ "parts": [{ "text": prompt }] }]
                }),
            },
            WireProtocol::Anthropic => {
                headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
                headers.insert(
                    "anthropic-version",
                    HeaderValue::from_static(ANTHROPIC_VERSION),
                );
                VendorRequest {
                    url: format!("{}/messages", base),
                    query: Vec::new(),
                    headers,
                    body: json!({
                        "model": config.model_name,
                        "max_tokens": ANTHROPIC_MAX_TOKENS,
                        "messages": [{ "role": "user", "content": prompt }],
                    }),
                }
            }
            WireProtocol::OpenAICompatible => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", api_key))?,
                );
                if config.provider_name == ProviderName::OpenRouter {
                    headers.insert(
                        HeaderName::from_static("http-referer"),
                        HeaderValue::from_str(&identity.site_origin)?,
                    );
                    headers.insert(
                        HeaderName::from_static("x-title"),
                        HeaderValue::from_str(&identity.app_title)?,
                    );
                }
                VendorRequest {
                    url: format!("{}/chat/completions", base),
                    query: Vec::new(),
                    headers,
                    body: json!({
                        "model": config.model_name,
                        "messages": [{ "role": "user", "content": prompt }],
                        "temperature": CHAT_TEMPERATURE,
                    }),
                }
            }
        };
        Ok(request)
    }

    /**
     * \brief 从成功响应中取出文本；字段缺失或为空返回 None。
     */
    pub fn extract_text(self, v: &Value) -> Option<String> {
        let pointer = match self {
            WireProtocol::Gemini => "/candidates/0/content/parts/0/text",
            WireProtocol::Anthropic => "/content/0/text",
            WireProtocol::OpenAICompatible => "/choices/0/message/content",
        };
        v.pointer(pointer)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
    }
}

/**
 * \brief 非流式调用，返回完整回复。
 * \details 网络错误与非 2xx 响应以错误返回；响应缺少文本字段时返回 `NO_RESPONSE_TEXT`。
 */
pub async fn complete(
    client: &Client,
    config: &ProviderConfig,
    identity: &ClientIdentity,
    prompt: &str,
) -> Result<String, AdapterError> {
    let api_key = config
        .credential()
        .ok_or_else(|| AdapterError::MissingCredential {
            provider: config.provider_name.to_string(),
        })?;
    let protocol = protocol_for(&config.provider_name);
    let request = protocol.build_request(config, api_key, prompt, identity)?;

    tracing::debug!(
        target: "llm",
        provider = %config.provider_name,
        model = %config.model_name,
        url = %request.url,
        prompt_len = prompt.len(),
        "dispatch"
    );

    let resp = client
        .post(&request.url)
        .query(&request.query)
        .headers(request.headers)
        .json(&request.body)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let message = vendor_error_message(&text).unwrap_or_else(|| {
            format!(
                "{} error: {} {}",
                protocol.label(),
                status.as_u16(),
                status.canonical_reason().unwrap_or_default()
            )
            .trim_end()
            .to_string()
        });
        return Err(AdapterError::VendorHttp {
            status: status.as_u16(),
            message,
        });
    }

    let v: Value = resp.json().await?;
    Ok(protocol
        .extract_text(&v)
        .unwrap_or_else(|| NO_RESPONSE_TEXT.to_string()))
}

fn vendor_error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    let message = v
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| v.get("error").and_then(Value::as_str))
        .or_else(|| v.get("message").and_then(Value::as_str))?
        .trim();
    if message.is_empty() {
        None
    } else {
        Some(message.to_string())
    }
}
