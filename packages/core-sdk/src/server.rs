use std::{convert::Infallible, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, get_service, post, put},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;

use crate::{
    adapter::ContentAdapter,
    campaign::effective_tone,
    config::AppConfig,
    db,
    error::{AdapterError, StoreError},
    models::{
        Campaign, CampaignPatch, CampaignPost, GeneratedContent, GenerationRequest, NewCampaign,
        NewPost, Platform, PostPatch, ProviderConfig, ToneAnalysis,
    },
    settings::SettingsSource,
    telemetry,
};

type ApiError = (StatusCode, String);
type ApiResult<T> = Result<Json<T>, ApiError>;

/**
 * \brief 路由共享状态。
 */
#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    adapter: Arc<ContentAdapter<SettingsSource>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let source = SettingsSource::from_config(&config);
        let adapter = ContentAdapter::with_timeout(source, config.request_timeout)?
            .identity(config.identity.clone())
            .simulated_latency(config.simulated_latency);
        Ok(Self {
            config: Arc::new(config),
            adapter: Arc::new(adapter),
        })
    }

    fn open_db(&self) -> Result<Connection, ApiError> {
        db::open(&self.config.db_path).map_err(api_error)
    }
}

/**
 * \brief 启动本地 HTTP 服务，提供静态前端与 API。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str, config: AppConfig) -> Result<()> {
    {
        let conn = db::open(&config.db_path)?;
        db::migrate(&conn)?;
        telemetry::set_enabled(db::get_telemetry_enabled(&conn)?);
    }
    let app = router(AppState::new(config)?);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "server", "listening on http://{}", addr);
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief 组装 API 路由；未匹配的路径回落到静态前端目录。
 */
pub fn router(state: AppState) -> Router {
    let static_handler = if state.config.ui_dir.exists() {
        ServeDir::new(&state.config.ui_dir)
    } else {
        ServeDir::new(&state.config.ui_fallback)
    }
    .append_index_html_on_directories(true);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/telemetry", get(get_telemetry).put(set_telemetry))
        .route("/api/providers", get(get_providers).post(create_provider))
        .route("/api/providers/test", post(test_unsaved_provider))
        .route(
            "/api/providers/{id}",
            put(update_provider).delete(delete_provider),
        )
        .route("/api/providers/{id}/activate", post(activate_provider))
        .route("/api/providers/{id}/deactivate", post(deactivate_provider))
        .route("/api/providers/{id}/test", post(test_stored_provider))
        .route("/api/generate", post(generate))
        .route("/api/generate/batch", get(generate_batch_sse))
        .route("/api/analyze-tone", post(analyze_tone))
        .route("/api/contents", get(list_contents).post(create_content))
        .route(
            "/api/contents/{id}",
            put(update_content).delete(delete_content),
        )
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route(
            "/api/campaigns/{id}",
            get(get_campaign)
                .put(update_campaign)
                .delete(delete_campaign),
        )
        .route(
            "/api/campaigns/{id}/posts",
            get(list_posts).post(create_post),
        )
        .route("/api/posts/{id}", put(update_post).delete(delete_post))
        .route("/api/posts/{id}/caption", post(generate_post_caption))
        .fallback_service(get_service(static_handler))
        .with_state(state)
}

/**
 * \brief 把内部错误映射为 HTTP 状态：校验失败 400，未知 ID 404，其余 500。
 */
fn api_error(err: anyhow::Error) -> ApiError {
    let status = match err.downcast_ref::<StoreError>() {
        Some(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Some(StoreError::Invalid(_)) => StatusCode::BAD_REQUEST,
        None => match err.downcast_ref::<AdapterError>() {
            Some(AdapterError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };
    if status.is_server_error() {
        tracing::error!(target: "server", "request failed: {:#}", err);
    }
    (status, err.to_string())
}

fn adapter_error(err: AdapterError) -> ApiError {
    api_error(err.into())
}

fn not_found(entity: &'static str, id: i64) -> ApiError {
    api_error(StoreError::NotFound { entity, id }.into())
}

fn bad_request(message: &str) -> ApiError {
    api_error(StoreError::Invalid(message.to_string()).into())
}

#[derive(Serialize, Debug)]
struct HealthResponse {
    ok: bool,
    /** \brief "live" 或 "simulation" */
    mode: &'static str,
    origin: Option<&'static str>,
    provider: Option<String>,
    model: Option<String>,
}

/**
 * \brief 健康检查：报告当前是真实调用还是模拟模式，不向厂商发请求。
 */
async fn health_check(State(state): State<AppState>) -> ApiResult<HealthResponse> {
    let active = state.adapter.source().resolve().map_err(api_error)?;
    let live = active
        .as_ref()
        .map(|a| a.config.credential().is_some())
        .unwrap_or(false);
    Ok(Json(HealthResponse {
        ok: true,
        mode: if live { "live" } else { "simulation" },
        origin: active.as_ref().map(|a| a.origin.as_str()),
        provider: active
            .as_ref()
            .map(|a| a.config.provider_name.to_string()),
        model: active.map(|a| a.config.model_name),
    }))
}

#[derive(Serialize, Deserialize, Debug)]
struct TelemetryBody {
    enabled: bool,
}

async fn get_telemetry(State(state): State<AppState>) -> ApiResult<TelemetryBody> {
    let conn = state.open_db()?;
    let enabled = db::get_telemetry_enabled(&conn).map_err(api_error)?;
    Ok(Json(TelemetryBody { enabled }))
}

async fn set_telemetry(
    State(state): State<AppState>,
    Json(body): Json<TelemetryBody>,
) -> ApiResult<TelemetryBody> {
    let conn = state.open_db()?;
    db::set_telemetry_enabled(&conn, body.enabled).map_err(api_error)?;
    telemetry::set_enabled(body.enabled);
    tracing::info!(target: "server.telemetry", enabled = body.enabled, "telemetry switched");
    Ok(Json(body))
}

// ---- providers ----

#[derive(Deserialize)]
struct ProviderInput {
    provider_name: String,
    /** \brief 更新时缺省表示沿用已保存的 Key */
    #[serde(default)]
    api_key: Option<String>,
    model_name: String,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    activate: Option<bool>,
}

impl ProviderInput {
    fn into_config(self) -> ProviderConfig {
        ProviderConfig {
            id: None,
            provider_name: self.provider_name.into(),
            api_key: self.api_key,
            model_name: self.model_name,
            base_url: self.base_url.filter(|u| !u.trim().is_empty()),
            is_active: self.activate.unwrap_or(false),
        }
    }
}

/** \brief 对外展示的 Provider，不回传 Key。 */
#[derive(Serialize, Debug)]
struct ProviderItem {
    id: i64,
    provider_name: String,
    model_name: String,
    base_url: Option<String>,
    is_active: bool,
    has_api_key: bool,
}

#[derive(Serialize, Debug)]
struct ProvidersState {
    providers: Vec<ProviderItem>,
    active_provider_id: Option<i64>,
    telemetry_enabled: bool,
}

#[derive(Serialize, Debug)]
struct ConnectionTest {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn build_provider_state(conn: &Connection) -> Result<ProvidersState, ApiError> {
    let providers = db::list_providers(conn).map_err(api_error)?;
    let telemetry_enabled = db::get_telemetry_enabled(conn).map_err(api_error)?;
    let active_provider_id = providers.iter().find(|p| p.is_active).and_then(|p| p.id);
    let items = providers
        .into_iter()
        .filter_map(|p| {
            Some(ProviderItem {
                id: p.id?,
                has_api_key: p.credential().is_some(),
                provider_name: p.provider_name.to_string(),
                model_name: p.model_name,
                base_url: p.base_url,
                is_active: p.is_active,
            })
        })
        .collect();
    Ok(ProvidersState {
        providers: items,
        active_provider_id,
        telemetry_enabled,
    })
}

/**
 * \brief 获取 Provider 列表。
 */
async fn get_providers(State(state): State<AppState>) -> ApiResult<ProvidersState> {
    let conn = state.open_db()?;
    Ok(Json(build_provider_state(&conn)?))
}

/**
 * \brief 新增 Provider，`activate` 为 true 时同时设为激活配置。
 */
async fn create_provider(
    State(state): State<AppState>,
    Json(payload): Json<ProviderInput>,
) -> ApiResult<ProvidersState> {
    let conn = state.open_db()?;
    let config = payload.into_config();
    let id = db::insert_provider(&conn, &config).map_err(api_error)?;
    tracing::info!(
        target: "server.provider",
        "create id={} type={} active={}",
        id,
        config.provider_name,
        config.is_active
    );
    Ok(Json(build_provider_state(&conn)?))
}

/**
 * \brief 更新 Provider。
 */
async fn update_provider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ProviderInput>,
) -> ApiResult<ProvidersState> {
    let conn = state.open_db()?;
    let existing = db::get_provider_by_id(&conn, id)
        .map_err(api_error)?
        .ok_or_else(|| not_found("provider", id))?;
    let mut config = payload.into_config();
    if config.api_key.is_none() {
        config.api_key = existing.api_key;
    }
    db::update_provider(&conn, id, &config).map_err(api_error)?;
    tracing::info!(target: "server.provider", "update id={} type={}", id, config.provider_name);
    Ok(Json(build_provider_state(&conn)?))
}

/**
 * \brief 删除 Provider。
 */
async fn delete_provider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ProvidersState> {
    let conn = state.open_db()?;
    db::delete_provider(&conn, id).map_err(api_error)?;
    tracing::info!(target: "server.provider", "delete id={}", id);
    Ok(Json(build_provider_state(&conn)?))
}

async fn activate_provider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ProvidersState> {
    toggle_provider(&state, id, true)
}

async fn deactivate_provider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ProvidersState> {
    toggle_provider(&state, id, false)
}

fn toggle_provider(state: &AppState, id: i64, active: bool) -> ApiResult<ProvidersState> {
    let conn = state.open_db()?;
    db::set_provider_active(&conn, id, active).map_err(api_error)?;
    tracing::info!(target: "server.provider", "set active id={} active={}", id, active);
    Ok(Json(build_provider_state(&conn)?))
}

/**
 * \brief 测试已保存的 Provider 配置。
 */
async fn test_stored_provider(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ConnectionTest> {
    let config = {
        let conn = state.open_db()?;
        db::get_provider_by_id(&conn, id)
            .map_err(api_error)?
            .ok_or_else(|| not_found("provider", id))?
    };
    Ok(Json(run_connection_test(&state, &config).await))
}

/**
 * \brief 测试表单中尚未保存的配置。
 */
async fn test_unsaved_provider(
    State(state): State<AppState>,
    Json(payload): Json<ProviderInput>,
) -> ApiResult<ConnectionTest> {
    let config = payload.into_config();
    Ok(Json(run_connection_test(&state, &config).await))
}

async fn run_connection_test(state: &AppState, config: &ProviderConfig) -> ConnectionTest {
    match state.adapter.test_connection(config).await {
        Ok(ok) => ConnectionTest { ok, error: None },
        Err(err) => ConnectionTest {
            ok: false,
            error: Some(err.to_string()),
        },
    }
}

// ---- generation ----

#[derive(Deserialize, Debug)]
struct GenerateInput {
    platform: String,
    topic: String,
    #[serde(default)]
    tone: Option<String>,
    #[serde(default)]
    save: Option<bool>,
}

#[derive(Serialize, Debug)]
struct GenerateResponse {
    platform: Platform,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_id: Option<i64>,
}

/**
 * \brief 生成单条内容，`save` 为 true 时写入历史。
 */
async fn generate(
    State(state): State<AppState>,
    Json(input): Json<GenerateInput>,
) -> ApiResult<GenerateResponse> {
    let platform: Platform = input.platform.parse().map_err(adapter_error)?;
    let request = GenerationRequest::new(platform, input.topic, input.tone.as_deref())
        .map_err(adapter_error)?;
    let text = state.adapter.generate_content(&request).await;

    let content_id = if input.save.unwrap_or(false) {
        let conn = state.open_db()?;
        Some(db::insert_content(&conn, platform, &text).map_err(api_error)?.id)
    } else {
        None
    };
    Ok(Json(GenerateResponse {
        platform,
        text,
        content_id,
    }))
}

#[derive(Deserialize, Debug)]
struct BatchQuery {
    #[serde(default)]
    topic: String,
    /** \brief 逗号分隔的平台列表 */
    #[serde(default)]
    platforms: String,
    tone: Option<String>,
    save: Option<bool>,
}

/**
 * \brief 多平台生成 SSE：GET /api/generate/batch?topic=...&platforms=facebook,tiktok
 * \details 每个平台完成后推送一条 `draft` 事件，全部结束后推送 `done`。
 */
async fn generate_batch_sse(
    State(state): State<AppState>,
    Query(q): Query<BatchQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if q.topic.trim().is_empty() {
        return Err(bad_request("topic is required"));
    }
    let platforms = q
        .platforms
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::parse::<Platform>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(adapter_error)?;
    if platforms.is_empty() {
        return Err(bad_request("select at least one platform"));
    }

    let save = q.save.unwrap_or(false);
    let adapter = state.adapter.clone();
    let db_path = state.config.db_path.clone();
    let (topic, tone) = (q.topic, q.tone);

    let stream = async_stream::stream! {
        let mut drafts = adapter.generate_batch(platforms, topic, tone);
        while let Some(item) = drafts.next().await {
            match item {
                Ok(draft) => {
                    let content_id = if save {
                        match db::open(&db_path).and_then(|conn| db::insert_content(&conn, draft.platform, &draft.text)) {
                            Ok(saved) => Some(saved.id),
                            Err(err) => {
                                tracing::error!(target: "server.generate", "saving draft failed: {:#}", err);
                                None
                            }
                        }
                    } else {
                        None
                    };
                    let payload = GenerateResponse {
                        platform: draft.platform,
                        text: draft.text,
                        content_id,
                    };
                    let data = serde_json::to_string(&payload).unwrap_or_default();
                    yield Ok::<Event, Infallible>(Event::default().event("draft").data(data));
                }
                Err(err) => {
                    yield Ok(Event::default().event("error").data(err.to_string()));
                    break;
                }
            }
        }
        yield Ok(Event::default().event("done").data("{}"));
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::new()))
}

#[derive(Deserialize, Debug)]
struct AnalyzeInput {
    content: String,
}

async fn analyze_tone(
    State(state): State<AppState>,
    Json(input): Json<AnalyzeInput>,
) -> ApiResult<ToneAnalysis> {
    if input.content.trim().is_empty() {
        return Err(bad_request("content is required"));
    }
    Ok(Json(state.adapter.analyze_tone(&input.content).await))
}

// ---- content history ----

#[derive(Deserialize, Debug)]
struct ContentQuery {
    platform: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ContentInput {
    platform: String,
    text: String,
}

#[derive(Deserialize, Debug)]
struct ContentEdit {
    text: String,
}

#[derive(Serialize, Debug)]
struct Deleted {
    deleted: i64,
}

async fn list_contents(
    State(state): State<AppState>,
    Query(q): Query<ContentQuery>,
) -> ApiResult<Vec<GeneratedContent>> {
    let platform = match q.platform.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => Some(p.parse::<Platform>().map_err(adapter_error)?),
        _ => None,
    };
    let conn = state.open_db()?;
    Ok(Json(db::list_contents(&conn, platform).map_err(api_error)?))
}

async fn create_content(
    State(state): State<AppState>,
    Json(input): Json<ContentInput>,
) -> ApiResult<GeneratedContent> {
    let platform: Platform = input.platform.parse().map_err(adapter_error)?;
    if input.text.trim().is_empty() {
        return Err(bad_request("text is required"));
    }
    let conn = state.open_db()?;
    Ok(Json(
        db::insert_content(&conn, platform, &input.text).map_err(api_error)?,
    ))
}

async fn update_content(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<ContentEdit>,
) -> ApiResult<GeneratedContent> {
    let conn = state.open_db()?;
    Ok(Json(
        db::update_content_text(&conn, id, &input.text).map_err(api_error)?,
    ))
}

async fn delete_content(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Deleted> {
    let conn = state.open_db()?;
    db::delete_content(&conn, id).map_err(api_error)?;
    Ok(Json(Deleted { deleted: id }))
}

// ---- campaigns ----

#[derive(Serialize, Debug)]
struct CampaignDetail {
    #[serde(flatten)]
    campaign: Campaign,
    posts: Vec<CampaignPost>,
}

async fn list_campaigns(State(state): State<AppState>) -> ApiResult<Vec<Campaign>> {
    let conn = state.open_db()?;
    Ok(Json(db::list_campaigns(&conn).map_err(api_error)?))
}

/**
 * \brief 新建活动，可通过 `copy_from` 沿用历史活动的品牌设定。
 */
async fn create_campaign(
    State(state): State<AppState>,
    Json(input): Json<NewCampaign>,
) -> ApiResult<Campaign> {
    let conn = state.open_db()?;
    let campaign = db::create_campaign(&conn, input).map_err(api_error)?;
    tracing::info!(
        target: "server.campaign",
        "create id={} client={}",
        campaign.id,
        campaign.client_name
    );
    Ok(Json(campaign))
}

async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<CampaignDetail> {
    let conn = state.open_db()?;
    let campaign = db::get_campaign(&conn, id)
        .map_err(api_error)?
        .ok_or_else(|| not_found("campaign", id))?;
    let posts = db::list_posts(&conn, id).map_err(api_error)?;
    Ok(Json(CampaignDetail { campaign, posts }))
}

async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<CampaignPatch>,
) -> ApiResult<Campaign> {
    let conn = state.open_db()?;
    Ok(Json(db::update_campaign(&conn, id, &patch).map_err(api_error)?))
}

async fn delete_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Deleted> {
    let conn = state.open_db()?;
    db::delete_campaign(&conn, id).map_err(api_error)?;
    tracing::info!(target: "server.campaign", "delete id={}", id);
    Ok(Json(Deleted { deleted: id }))
}

async fn list_posts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<CampaignPost>> {
    let conn = state.open_db()?;
    if db::get_campaign(&conn, id).map_err(api_error)?.is_none() {
        return Err(not_found("campaign", id));
    }
    Ok(Json(db::list_posts(&conn, id).map_err(api_error)?))
}

async fn create_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<NewPost>,
) -> ApiResult<CampaignPost> {
    let conn = state.open_db()?;
    Ok(Json(db::insert_post(&conn, id, &input).map_err(api_error)?))
}

async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<PostPatch>,
) -> ApiResult<CampaignPost> {
    let conn = state.open_db()?;
    Ok(Json(db::update_post(&conn, id, &patch).map_err(api_error)?))
}

async fn delete_post(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Deleted> {
    let conn = state.open_db()?;
    db::delete_post(&conn, id).map_err(api_error)?;
    Ok(Json(Deleted { deleted: id }))
}

/**
 * \brief 按活动简报生成帖子文案，连同所用语气写回该帖子。
 */
async fn generate_post_caption(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<CampaignPost> {
    let (campaign, post) = {
        let conn = state.open_db()?;
        let post = db::get_post(&conn, id)
            .map_err(api_error)?
            .ok_or_else(|| not_found("post", id))?;
        let campaign = db::get_campaign(&conn, post.campaign_id)
            .map_err(api_error)?
            .ok_or_else(|| not_found("campaign", post.campaign_id))?;
        (campaign, post)
    };

    let caption = state.adapter.generate_caption(&campaign, &post).await;

    let conn = state.open_db()?;
    let patch = PostPatch {
        caption: Some(caption),
        tone: effective_tone(&campaign, &post),
        ..Default::default()
    };
    Ok(Json(db::update_post(&conn, id, &patch).map_err(api_error)?))
}
