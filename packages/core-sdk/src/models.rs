use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/** \brief 未指定语气时的默认值。 */
pub const DEFAULT_TONE: &str = "Professional";

/**
 * \brief 模型服务厂商标识。
 * \details 已知厂商之外的名称原样保留，按 OpenAI 兼容协议处理。
 */
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderName {
    Gemini,
    Anthropic,
    OpenAI,
    OpenRouter,
    DeepSeek,
    Groq,
    Perplexity,
    Custom(String),
}

impl ProviderName {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderName::Gemini => "gemini",
            ProviderName::Anthropic => "anthropic",
            ProviderName::OpenAI => "openai",
            ProviderName::OpenRouter => "openrouter",
            ProviderName::DeepSeek => "deepseek",
            ProviderName::Groq => "groq",
            ProviderName::Perplexity => "perplexity",
            ProviderName::Custom(name) => name,
        }
    }
}

impl From<&str> for ProviderName {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => ProviderName::Gemini,
            "anthropic" | "claude" => ProviderName::Anthropic,
            "openai" => ProviderName::OpenAI,
            "openrouter" => ProviderName::OpenRouter,
            "deepseek" => ProviderName::DeepSeek,
            "groq" => ProviderName::Groq,
            "perplexity" => ProviderName::Perplexity,
            _ => ProviderName::Custom(value.trim().to_string()),
        }
    }
}

impl From<String> for ProviderName {
    fn from(value: String) -> Self {
        ProviderName::from(value.as_str())
    }
}

impl From<ProviderName> for String {
    fn from(value: ProviderName) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/**
 * \brief Provider 配置模型。
 */
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /** \brief 存储主键；未保存的配置（例如表单中的测试）为空 */
    #[serde(default)]
    pub id: Option<i64>,
    /** \brief 厂商标识，决定使用哪种协议 */
    pub provider_name: ProviderName,
    /** \brief API Key，可缺省 */
    #[serde(default)]
    pub api_key: Option<String>,
    /** \brief 模型名 */
    pub model_name: String,
    /** \brief API 基地址覆盖；为空时使用厂商默认值 */
    #[serde(default)]
    pub base_url: Option<String>,
    /** \brief 是否为当前激活配置 */
    #[serde(default)]
    pub is_active: bool,
}

impl ProviderConfig {
    pub fn new(provider_name: impl Into<ProviderName>, model_name: impl Into<String>) -> Self {
        Self {
            id: None,
            provider_name: provider_name.into(),
            api_key: None,
            model_name: model_name.into(),
            base_url: None,
            is_active: false,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /**
     * \brief 可用的凭证；空白字符串视为缺失。
     */
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /** \brief 非空的基地址覆盖。 */
    pub fn base_url_override(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("provider_name", &self.provider_name)
            .field("api_key", &self.credential().map(|_| "***"))
            .field("model_name", &self.model_name)
            .field("base_url", &self.base_url)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/** \brief 目标内容平台。 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    TikTok,
    YouTube,
    Instagram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::TikTok => "tiktok",
            Platform::YouTube => "youtube",
            Platform::Instagram => "instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "facebook" => Ok(Platform::Facebook),
            "tiktok" => Ok(Platform::TikTok),
            "youtube" => Ok(Platform::YouTube),
            "instagram" => Ok(Platform::Instagram),
            "" => Err(AdapterError::InvalidRequest("platform is required".into())),
            other => Err(AdapterError::InvalidRequest(format!(
                "unknown platform: {}",
                other
            ))),
        }
    }
}

/**
 * \brief 一次内容生成请求（不持久化）。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub platform: Platform,
    pub topic: String,
    pub tone: String,
}

impl GenerationRequest {
    /**
     * \brief 构造请求并校验输入。
     * \param tone 为空或空白时使用默认语气
     */
    pub fn new(
        platform: Platform,
        topic: impl Into<String>,
        tone: Option<&str>,
    ) -> Result<Self, AdapterError> {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(AdapterError::InvalidRequest("topic is required".into()));
        }
        let tone = tone
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TONE)
            .to_string();
        Ok(Self {
            platform,
            topic,
            tone,
        })
    }
}

/** \brief 语气分析结果。 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToneAnalysis {
    pub tone: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/** \brief 批量生成时单个平台的产出。 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedDraft {
    pub platform: Platform,
    pub text: String,
}

/**
 * \brief 已保存的生成内容。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub id: i64,
    pub platform: Platform,
    pub text: String,
    /** \brief RFC 3339 UTC 时间 */
    pub created_at: String,
}

/** \brief 活动周期。 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignPeriod {
    Week,
    #[default]
    Month,
}

impl CampaignPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignPeriod::Week => "week",
            CampaignPeriod::Month => "month",
        }
    }
}

impl FromStr for CampaignPeriod {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "week" | "weekly" => Ok(CampaignPeriod::Week),
            "month" | "monthly" => Ok(CampaignPeriod::Month),
            other => Err(AdapterError::InvalidRequest(format!(
                "unknown campaign period: {}",
                other
            ))),
        }
    }
}

/**
 * \brief 客户营销活动。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub client_name: String,
    pub period: CampaignPeriod,
    pub start_date: String,
    pub brand_voice: Option<String>,
    pub target_audience: Option<String>,
    pub goals: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

/**
 * \brief 新建活动的输入；`copy_from` 用于沿用历史活动的品牌设定。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCampaign {
    pub client_name: String,
    #[serde(default)]
    pub period: CampaignPeriod,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub brand_voice: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub goals: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub copy_from: Option<i64>,
}

/** \brief 活动字段的部分更新；为空的字段保持不变。 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignPatch {
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub period: Option<CampaignPeriod>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub brand_voice: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub goals: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/** \brief 活动中的排期帖子。 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignPost {
    pub id: i64,
    pub campaign_id: i64,
    pub platform: Platform,
    pub post_date: String,
    pub caption: String,
    pub tone: Option<String>,
    pub hashtags: Option<String>,
}

/** \brief 新增帖子的输入。 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub platform: Platform,
    /** \brief 为空时取当前时间 */
    #[serde(default)]
    pub post_date: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub hashtags: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPatch {
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub post_date: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub hashtags: Option<String>,
}
