use std::{pin::Pin, sync::Arc, time::Duration};

use anyhow::Result;
use async_stream::try_stream;
use futures_util::Stream;
use reqwest::Client;

use crate::campaign;
use crate::error::AdapterError;
use crate::llm::{self, ClientIdentity};
use crate::models::{
    Campaign, CampaignPost, GeneratedDraft, GenerationRequest, Platform, ProviderConfig,
    ToneAnalysis,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECTION_TEST_PROMPT: &str = "Say 'Success'";

/** \brief 无法解析语气分析结果时的占位值。 */
pub const FALLBACK_TONE: &str = "Undetermined";

/**
 * \brief 当前激活配置的读取接口。
 * \details 每次生成请求都会重新读取，适配层不缓存配置。
 */
pub trait ActiveConfigSource: Send + Sync {
    fn active_config(&self) -> Result<Option<ProviderConfig>>;
}

impl ActiveConfigSource for Option<ProviderConfig> {
    fn active_config(&self) -> Result<Option<ProviderConfig>> {
        Ok(self.clone())
    }
}

impl<T: ActiveConfigSource + ?Sized> ActiveConfigSource for Arc<T> {
    fn active_config(&self) -> Result<Option<ProviderConfig>> {
        (**self).active_config()
    }
}

/**
 * \brief 与厂商无关的内容生成适配器。
 */
pub struct ContentAdapter<S> {
    source: S,
    client: Client,
    identity: ClientIdentity,
    simulated_latency: Duration,
}

impl<S: ActiveConfigSource> ContentAdapter<S> {
    pub fn new(source: S) -> Result<Self, AdapterError> {
        Self::with_timeout(source, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(source: S, timeout: Duration) -> Result<Self, AdapterError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            source,
            client,
            identity: ClientIdentity::default(),
            simulated_latency: Duration::ZERO,
        })
    }

    pub fn identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = identity;
        self
    }

    /** \brief 模拟模式下返回占位结果前的等待时间。 */
    pub fn simulated_latency(mut self, latency: Duration) -> Self {
        self.simulated_latency = latency;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /**
     * \brief 生成单条平台内容。
     * \details 未配置可用凭证时返回模拟内容且不发请求；厂商失败转换为可展示的错误文本。
     */
    pub async fn generate_content(&self, request: &GenerationRequest) -> String {
        let Some(config) = self.usable_config() else {
            tracing::info!(
                target: "adapter",
                platform = %request.platform,
                "simulating generation, no active provider configured"
            );
            self.pause().await;
            return simulated_content(request);
        };

        let prompt = content_prompt(request);
        match llm::complete(&self.client, &config, &self.identity, &prompt).await {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(
                    target: "adapter",
                    provider = %config.provider_name,
                    status = ?err.status(),
                    "generation failed: {}",
                    err
                );
                format!(
                    "Error generating content: {}. Please check Admin AI Settings.",
                    err
                )
            }
        }
    }

    /**
     * \brief 分析文本语气，永不返回错误。
     */
    pub async fn analyze_tone(&self, content: &str) -> ToneAnalysis {
        let Some(config) = self.usable_config() else {
            self.pause().await;
            return ToneAnalysis {
                tone: "Simulated Analysis (No API Key)".to_string(),
                keywords: vec![
                    "simulation".to_string(),
                    "test".to_string(),
                    "placeholder".to_string(),
                ],
            };
        };

        let prompt = format!(
            "Analyze the tone of the following text. Return ONLY a JSON object with two keys: \"tone\" (string description) and \"keywords\" (array of strings). Text: \"{}\"",
            content
        );
        match llm::complete(&self.client, &config, &self.identity, &prompt).await {
            Ok(response) => parse_tone_analysis(&response).unwrap_or_else(|| {
                tracing::warn!(target: "adapter", "tone analysis response was not a JSON object");
                ToneAnalysis {
                    tone: FALLBACK_TONE.to_string(),
                    keywords: Vec::new(),
                }
            }),
            Err(err) => {
                tracing::error!(target: "adapter", "tone analysis failed: {}", err);
                ToneAnalysis {
                    tone: "Error".to_string(),
                    keywords: Vec::new(),
                }
            }
        }
    }

    /**
     * \brief 用调用方提供的配置做连通性测试，错误原样返回。
     */
    pub async fn test_connection(&self, config: &ProviderConfig) -> Result<bool, AdapterError> {
        let text = llm::complete(&self.client, config, &self.identity, CONNECTION_TEST_PROMPT)
            .await
            .inspect_err(|err| {
                tracing::warn!(
                    target: "adapter",
                    provider = %config.provider_name,
                    "connection test failed: {}",
                    err
                )
            })?;
        Ok(text.to_lowercase().contains("success"))
    }

    /**
     * \brief 测试当前激活配置（包括本地覆盖配置）。
     */
    pub async fn test_active_connection(&self) -> Result<bool, AdapterError> {
        let config = match self.source.active_config() {
            Ok(Some(config)) => config,
            Ok(None) => return Err(AdapterError::NoActiveProvider),
            Err(err) => {
                tracing::warn!(target: "adapter", "reading active provider failed: {:#}", err);
                return Err(AdapterError::NoActiveProvider);
            }
        };
        self.test_connection(&config).await
    }

    /**
     * \brief 按平台顺序逐个生成，上一条完成后才发起下一条。
     */
    pub fn generate_batch<'a>(
        &'a self,
        platforms: Vec<Platform>,
        topic: String,
        tone: Option<String>,
    ) -> Pin<Box<dyn Stream<Item = Result<GeneratedDraft, AdapterError>> + Send + 'a>> {
        let s = try_stream! {
            if platforms.is_empty() {
                Err::<(), _>(AdapterError::InvalidRequest(
                    "select at least one platform".into(),
                ))?;
            }
            for platform in platforms {
                let request = GenerationRequest::new(platform, topic.as_str(), tone.as_deref())?;
                let text = self.generate_content(&request).await;
                yield GeneratedDraft { platform, text };
            }
        };
        Box::pin(s)
    }

    /**
     * \brief 根据活动简报为排期帖子生成文案。
     */
    pub async fn generate_caption(&self, campaign: &Campaign, post: &CampaignPost) -> String {
        let tone = campaign::effective_tone(campaign, post);
        let brief = campaign::caption_brief(campaign, post);
        match GenerationRequest::new(post.platform, brief, tone.as_deref()) {
            Ok(request) => self.generate_content(&request).await,
            Err(err) => err.to_string(),
        }
    }

    fn usable_config(&self) -> Option<ProviderConfig> {
        match self.source.active_config() {
            Ok(Some(config)) if config.credential().is_some() => Some(config),
            Ok(Some(config)) => {
                tracing::debug!(
                    target: "adapter",
                    provider = %config.provider_name,
                    "active provider has no API key"
                );
                None
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(target: "adapter", "reading active provider failed: {:#}", err);
                None
            }
        }
    }

    async fn pause(&self) {
        if !self.simulated_latency.is_zero() {
            tokio::time::sleep(self.simulated_latency).await;
        }
    }
}

fn content_prompt(request: &GenerationRequest) -> String {
    format!(
        "Generate a {} post about \"{}\". The tone should be {}. Include hashtags.",
        request.platform, request.topic, request.tone
    )
}

fn simulated_content(request: &GenerationRequest) -> String {
    format!(
        "[SIMULATED {} CONTENT]\nTopic: {}\nTone: {}\n\n(This is a placeholder. Please configure a valid API Key in Admin > AI Settings to generate real content.)",
        request.platform.as_str().to_uppercase(),
        request.topic,
        request.tone
    )
}

/**
 * \brief 取出文本中第一个配平的 `{...}` 片段，跳过字符串内的花括号。
 */
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_tone_analysis(response: &str) -> Option<ToneAnalysis> {
    let object = extract_json_object(response)?;
    let analysis: ToneAnalysis = serde_json::from_str(object).ok()?;
    if analysis.tone.trim().is_empty() {
        return None;
    }
    Some(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(config: Option<ProviderConfig>) -> ContentAdapter<Option<ProviderConfig>> {
        ContentAdapter::new(config).expect("build adapter")
    }

    fn request(platform: Platform, topic: &str) -> GenerationRequest {
        GenerationRequest::new(platform, topic, None).expect("valid request")
    }

    fn openai_body(text: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": text}}]})
    }

    #[tokio::test]
    async fn test_generate_gemini_extracts_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-pro:generateContent"))
            .and(query_param("key", "g-key"))
            .and(body_partial_json(json!({"contents": [{"parts": [{
                "text": "Generate a facebook post about \"Coffee\". The tone should be Professional. Include hashtags."
            }]}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "X"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("gemini", "gemini-pro")
            .with_api_key("g-key")
            .with_base_url(format!("{}/models/", server.uri()));
        let text = adapter(Some(cfg))
            .generate_content(&request(Platform::Facebook, "Coffee"))
            .await;
        assert_eq!(text, "X");
    }

    #[tokio::test]
    async fn test_generate_anthropic_extracts_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "a-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(json!({"model": "claude-3", "max_tokens": 1024})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Claude says hi"}]
            })))
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("anthropic", "claude-3")
            .with_api_key("a-key")
            .with_base_url(format!("{}/v1", server.uri()));
        let text = adapter(Some(cfg))
            .generate_content(&request(Platform::TikTok, "Launch"))
            .await;
        assert_eq!(text, "Claude says hi");
    }

    #[tokio::test]
    async fn test_generate_openai_compatible_normalizes_base_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer o-key"))
            .and(body_partial_json(json!({"model": "gpt-4o", "temperature": 0.7})))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_body("Post #coffee")))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("openai", "gpt-4o")
            .with_api_key("o-key")
            .with_base_url(format!("{}/v1/", server.uri()));
        let text = adapter(Some(cfg))
            .generate_content(&request(Platform::YouTube, "Coffee"))
            .await;
        assert_eq!(text, "Post #coffee");
    }

    #[tokio::test]
    async fn test_generate_without_config_simulates() {
        let text = adapter(None)
            .generate_content(&request(Platform::Facebook, "Summer menu"))
            .await;
        assert!(text.contains("[SIMULATED"));
        assert!(text.contains("FACEBOOK"));
        assert!(text.contains("Summer menu"));
    }

    #[tokio::test]
    async fn test_generate_without_key_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_body("nope")))
            .expect(0)
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("openai", "gpt-4o").with_base_url(server.uri());
        let text = adapter(Some(cfg))
            .generate_content(&request(Platform::Instagram, "Sale"))
            .await;
        assert!(text.starts_with("[SIMULATED INSTAGRAM CONTENT]"));
    }

    #[tokio::test]
    async fn test_generate_vendor_error_becomes_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached"}
            })))
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("groq", "llama")
            .with_api_key("k")
            .with_base_url(server.uri());
        let text = adapter(Some(cfg))
            .generate_content(&request(Platform::Facebook, "Sale"))
            .await;
        assert!(text.starts_with("Error generating content:"));
        assert!(text.contains("Rate limit reached"));
    }

    #[tokio::test]
    async fn test_generate_missing_field_yields_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("deepseek", "chat")
            .with_api_key("k")
            .with_base_url(server.uri());
        let text = adapter(Some(cfg))
            .generate_content(&request(Platform::Facebook, "Sale"))
            .await;
        assert_eq!(text, llm::NO_RESPONSE_TEXT);
    }

    #[tokio::test]
    async fn test_generate_is_repeatable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_body("same")))
            .expect(2)
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("openai", "gpt-4o")
            .with_api_key("k")
            .with_base_url(server.uri());
        let adapter = adapter(Some(cfg));
        let req = request(Platform::Facebook, "Coffee");
        let first = adapter.generate_content(&req).await;
        let second = adapter.generate_content(&req).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_analyze_tone_strips_code_fence() {
        let server = MockServer::start().await;
        let fenced = "Here you go:\n```json\n{\"tone\":\"Playful\",\"keywords\":[\"fun\",\"brand\"]}\n```";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_body(fenced)))
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("openai", "gpt-4o")
            .with_api_key("k")
            .with_base_url(server.uri());
        let analysis = adapter(Some(cfg)).analyze_tone("We love fun!").await;
        assert_eq!(
            analysis,
            ToneAnalysis {
                tone: "Playful".into(),
                keywords: vec!["fun".into(), "brand".into()],
            }
        );
    }

    #[tokio::test]
    async fn test_analyze_tone_non_json_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(openai_body("It sounds upbeat.")),
            )
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("openai", "gpt-4o")
            .with_api_key("k")
            .with_base_url(server.uri());
        let analysis = adapter(Some(cfg)).analyze_tone("text").await;
        assert!(!analysis.tone.is_empty());
        assert!(analysis.keywords.is_empty());
    }

    #[tokio::test]
    async fn test_analyze_tone_vendor_error_yields_error_tone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": {"message": "upstream exploded"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("groq", "llama")
            .with_api_key("k")
            .with_base_url(server.uri());
        let analysis = adapter(Some(cfg)).analyze_tone("text").await;
        assert_eq!(
            analysis,
            ToneAnalysis {
                tone: "Error".to_string(),
                keywords: Vec::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_analyze_tone_without_key_is_simulated() {
        let analysis = adapter(None).analyze_tone("text").await;
        assert!(analysis.tone.contains("Simulated"));
        assert_eq!(analysis.keywords.len(), 3);
    }

    #[tokio::test]
    async fn test_connection_success_and_failure_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_body("Success!")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer meh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_body("Failure")))
            .mount(&server)
            .await;

        let adapter = adapter(None);
        let ok = ProviderConfig::new("openai", "m")
            .with_api_key("ok")
            .with_base_url(server.uri());
        let meh = ok.clone().with_api_key("meh");
        assert!(adapter.test_connection(&ok).await.expect("test ok"));
        assert!(!adapter.test_connection(&meh).await.expect("test meh"));
    }

    #[tokio::test]
    async fn test_connection_propagates_vendor_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Invalid API key provided"}
            })))
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("anthropic", "claude")
            .with_api_key("bad")
            .with_base_url(server.uri());
        let err = adapter(None)
            .test_connection(&cfg)
            .await
            .expect_err("401 must fail");
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("Invalid API key provided"));
    }

    #[tokio::test]
    async fn test_connection_without_body_message_uses_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("perplexity", "sonar")
            .with_api_key("k")
            .with_base_url(server.uri());
        let err = adapter(None).test_connection(&cfg).await.expect_err("503");
        assert!(err.to_string().contains("503 Service Unavailable"));
    }

    #[tokio::test]
    async fn test_connection_requires_key() {
        let cfg = ProviderConfig::new("openai", "m");
        let err = adapter(None).test_connection(&cfg).await.expect_err("no key");
        assert!(matches!(err, AdapterError::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn test_active_connection_needs_active_provider() {
        let err = adapter(None)
            .test_active_connection()
            .await
            .expect_err("nothing active");
        assert!(matches!(err, AdapterError::NoActiveProvider));
    }

    #[tokio::test]
    async fn test_active_connection_uses_source_config() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_body("Success")))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = ProviderConfig::new("deepseek", "deepseek-chat")
            .with_api_key("k")
            .with_base_url(server.uri());
        assert!(adapter(Some(cfg))
            .test_active_connection()
            .await
            .expect("active test"));
    }

    #[tokio::test]
    async fn test_generate_batch_keeps_platform_order() {
        let drafts: Vec<_> = adapter(None)
            .generate_batch(
                vec![Platform::YouTube, Platform::Facebook],
                "Coffee".into(),
                Some("Witty".into()),
            )
            .collect()
            .await;
        assert_eq!(drafts.len(), 2);
        let first = drafts[0].as_ref().expect("draft 1");
        let second = drafts[1].as_ref().expect("draft 2");
        assert_eq!(first.platform, Platform::YouTube);
        assert!(first.text.contains("YOUTUBE"));
        assert!(first.text.contains("Tone: Witty"));
        assert_eq!(second.platform, Platform::Facebook);
    }

    #[tokio::test]
    async fn test_generate_batch_rejects_empty_input() {
        let adapter = adapter(None);
        let drafts: Vec<_> = adapter
            .generate_batch(Vec::new(), "Coffee".into(), None)
            .collect()
            .await;
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].is_err());

        let drafts: Vec<_> = adapter
            .generate_batch(vec![Platform::Facebook], " ".into(), None)
            .collect()
            .await;
        assert!(matches!(drafts[0], Err(AdapterError::InvalidRequest(_))));
    }

    #[test]
    fn test_extract_json_object_is_balanced() {
        let text = r#"note {"tone":"Calm {really}","keywords":["a"]} trailing {"x":1}"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"tone":"Calm {really}","keywords":["a"]}"#)
        );
        assert_eq!(extract_json_object(r#"{"a":{"b":"\"}"}}"#), Some(r#"{"a":{"b":"\"}"}}"#));
        assert!(extract_json_object("no braces").is_none());
        assert!(extract_json_object("{ unterminated").is_none());
    }

    #[test]
    fn test_parse_tone_analysis_defaults_keywords() {
        let analysis = parse_tone_analysis(r#"{"tone":"Warm"}"#).expect("parsed");
        assert_eq!(analysis.tone, "Warm");
        assert!(analysis.keywords.is_empty());
        assert!(parse_tone_analysis(r#"{"tone":""}"#).is_none());
    }
}
