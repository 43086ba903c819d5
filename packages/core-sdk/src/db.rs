use anyhow::{anyhow, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::{path::Path, thread, time::Duration};

use crate::campaign;
use crate::error::StoreError;
use crate::models::{
    Campaign, CampaignPatch, CampaignPeriod, CampaignPost, GeneratedContent, NewCampaign,
    NewPost, Platform, PostPatch, ProviderConfig, DEFAULT_TONE,
};

const PROVIDER_COLUMNS: &str = "id, provider_name, api_key, model_name, base_url, is_active";
const CAMPAIGN_COLUMNS: &str =
    "id, client_name, period, start_date, brand_voice, target_audience, goals, notes, created_at";
const POST_COLUMNS: &str = "id, campaign_id, platform, post_date, caption, tone, hashtags";

/**
 * \brief 打开数据库文件。
 */
pub fn open(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建必要表结构。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS providers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider_name TEXT NOT NULL,
            api_key TEXT,
            model_name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0
        );

        CREATE UNIQUE INDEX IF NOT EXISTS providers_single_active
            ON providers(is_active) WHERE is_active = 1;

        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS generated_contents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS campaigns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_name TEXT NOT NULL,
            period TEXT NOT NULL DEFAULT 'month',
            start_date TEXT NOT NULL,
            brand_voice TEXT,
            target_audience TEXT,
            goals TEXT,
            notes TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS campaign_posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            platform TEXT NOT NULL,
            post_date TEXT NOT NULL,
            caption TEXT NOT NULL DEFAULT '',
            tone TEXT
        );
        "#,
        )
    })?;

    ensure_column(conn, "providers", "base_url", "TEXT")?;
    ensure_column(conn, "campaign_posts", "hashtags", "TEXT")?;
    Ok(())
}

/**
 * \brief 旧库补列：列不存在时追加。
 */
fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    let mut has = false;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            has = true;
            break;
        }
    }
    if !has {
        retry_on_locked(|| {
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
                [],
            )
        })?;
    }
    Ok(())
}

impl ToSql for Platform {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Platform {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for CampaignPeriod {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for CampaignPeriod {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, if value { "1" } else { "0" }],
        )
    })?;
    Ok(())
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    let val = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val.map(|s| s == "1").unwrap_or(default))
}

/**
 * \brief 读取遥测开关。
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_bool_config(conn, "telemetry_enabled", false)
}

/**
 * \brief 更新遥测开关。
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_config(conn, "telemetry_enabled", enabled)
}

// ---- providers ----

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<ProviderConfig> {
    Ok(ProviderConfig {
        id: Some(row.get(0)?),
        provider_name: row.get::<_, String>(1)?.into(),
        api_key: row.get(2)?,
        model_name: row.get(3)?,
        base_url: row.get(4)?,
        is_active: row.get(5)?,
    })
}

fn validate_provider(config: &ProviderConfig) -> Result<()> {
    if config.provider_name.as_str().trim().is_empty() {
        return Err(StoreError::Invalid("provider name is required".into()).into());
    }
    if config.model_name.trim().is_empty() {
        return Err(StoreError::Invalid("model name is required".into()).into());
    }
    Ok(())
}

/**
 * \brief 新增 Provider；若标记为激活，会先取消其他配置的激活状态。
 */
pub fn insert_provider(conn: &Connection, config: &ProviderConfig) -> Result<i64> {
    validate_provider(config)?;
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO providers (provider_name, api_key, model_name, base_url, is_active) VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                config.provider_name.as_str(),
                config.api_key,
                config.model_name.trim(),
                config.base_url
            ],
        )
    })?;
    let id = conn.last_insert_rowid();
    if config.is_active {
        set_provider_active(conn, id, true)?;
    }
    Ok(id)
}

/**
 * \brief 更新 Provider 字段；`is_active` 为 true 时同时激活。
 */
pub fn update_provider(conn: &Connection, id: i64, config: &ProviderConfig) -> Result<()> {
    validate_provider(config)?;
    let rows = retry_on_locked(|| {
        conn.execute(
            "UPDATE providers SET provider_name=?1, api_key=?2, model_name=?3, base_url=?4 WHERE id=?5",
            params![
                config.provider_name.as_str(),
                config.api_key,
                config.model_name.trim(),
                config.base_url,
                id
            ],
        )
    })?;
    if rows == 0 {
        return Err(StoreError::NotFound {
            entity: "provider",
            id,
        }
        .into());
    }
    if config.is_active {
        set_provider_active(conn, id, true)?;
    }
    Ok(())
}

pub fn delete_provider(conn: &Connection, id: i64) -> Result<()> {
    let rows = retry_on_locked(|| conn.execute("DELETE FROM providers WHERE id=?1", params![id]))?;
    if rows == 0 {
        return Err(StoreError::NotFound {
            entity: "provider",
            id,
        }
        .into());
    }
    Ok(())
}

/**
 * \brief 列出所有 Provider。
 */
pub fn list_providers(conn: &Connection) -> Result<Vec<ProviderConfig>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM providers ORDER BY id ASC",
        PROVIDER_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], provider_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/**
 * \brief 按 ID 获取 Provider。
 */
pub fn get_provider_by_id(conn: &Connection, id: i64) -> Result<Option<ProviderConfig>> {
    conn.query_row(
        &format!("SELECT {} FROM providers WHERE id=?1", PROVIDER_COLUMNS),
        params![id],
        provider_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/**
 * \brief 切换激活状态。
 * \details 激活时在同一事务内取消其他配置的激活，保证至多一个激活配置。
 */
pub fn set_provider_active(conn: &Connection, id: i64, active: bool) -> Result<()> {
    if get_provider_by_id(conn, id)?.is_none() {
        return Err(StoreError::NotFound {
            entity: "provider",
            id,
        }
        .into());
    }
    retry_on_locked(|| {
        let tx = conn.unchecked_transaction()?;
        if active {
            tx.execute(
                "UPDATE providers SET is_active=0 WHERE is_active=1 AND id<>?1",
                params![id],
            )?;
        }
        tx.execute(
            "UPDATE providers SET is_active=?1 WHERE id=?2",
            params![active, id],
        )?;
        tx.commit()
    })?;
    Ok(())
}

/**
 * \brief 读取当前激活的 Provider（若没有，返回 None）。
 */
pub fn get_active_provider(conn: &Connection) -> Result<Option<ProviderConfig>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM providers WHERE is_active=1 LIMIT 1",
            PROVIDER_COLUMNS
        ),
        [],
        provider_from_row,
    )
    .optional()
    .map_err(Into::into)
}

// ---- generated content history ----

fn content_from_row(row: &Row<'_>) -> rusqlite::Result<GeneratedContent> {
    Ok(GeneratedContent {
        id: row.get(0)?,
        platform: row.get(1)?,
        text: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/**
 * \brief 保存一条生成内容。
 */
pub fn insert_content(conn: &Connection, platform: Platform, text: &str) -> Result<GeneratedContent> {
    let created_at = campaign::now_rfc3339()?;
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO generated_contents (platform, text, created_at) VALUES (?1, ?2, ?3)",
            params![platform, text, created_at],
        )
    })?;
    Ok(GeneratedContent {
        id: conn.last_insert_rowid(),
        platform,
        text: text.to_string(),
        created_at,
    })
}

/**
 * \brief 按时间倒序列出生成内容，可按平台过滤。
 */
pub fn list_contents(conn: &Connection, platform: Option<Platform>) -> Result<Vec<GeneratedContent>> {
    let mut results = Vec::new();
    if let Some(p) = platform {
        let mut stmt = conn.prepare(
            "SELECT id, platform, text, created_at FROM generated_contents WHERE platform=?1 ORDER BY id DESC",
        )?;
        for row in stmt.query_map(params![p], content_from_row)? {
            results.push(row?);
        }
    } else {
        let mut stmt = conn.prepare(
            "SELECT id, platform, text, created_at FROM generated_contents ORDER BY id DESC",
        )?;
        for row in stmt.query_map([], content_from_row)? {
            results.push(row?);
        }
    }
    Ok(results)
}

pub fn get_content(conn: &Connection, id: i64) -> Result<Option<GeneratedContent>> {
    conn.query_row(
        "SELECT id, platform, text, created_at FROM generated_contents WHERE id=?1",
        params![id],
        content_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn update_content_text(conn: &Connection, id: i64, text: &str) -> Result<GeneratedContent> {
    let rows = retry_on_locked(|| {
        conn.execute(
            "UPDATE generated_contents SET text=?1 WHERE id=?2",
            params![text, id],
        )
    })?;
    if rows == 0 {
        return Err(StoreError::NotFound {
            entity: "content",
            id,
        }
        .into());
    }
    get_content(conn, id)?.ok_or_else(|| anyhow!("content id {} vanished after update", id))
}

pub fn delete_content(conn: &Connection, id: i64) -> Result<()> {
    let rows = retry_on_locked(|| {
        conn.execute("DELETE FROM generated_contents WHERE id=?1", params![id])
    })?;
    if rows == 0 {
        return Err(StoreError::NotFound {
            entity: "content",
            id,
        }
        .into());
    }
    Ok(())
}

// ---- campaigns ----

fn campaign_from_row(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: row.get(0)?,
        client_name: row.get(1)?,
        period: row.get(2)?,
        start_date: row.get(3)?,
        brand_voice: row.get(4)?,
        target_audience: row.get(5)?,
        goals: row.get(6)?,
        notes: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<CampaignPost> {
    Ok(CampaignPost {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        platform: row.get(2)?,
        post_date: row.get(3)?,
        caption: row.get(4)?,
        tone: row.get(5)?,
        hashtags: row.get(6)?,
    })
}

/**
 * \brief 创建活动；指定 `copy_from` 时沿用该活动的品牌语气、受众、目标与备注。
 */
pub fn create_campaign(conn: &Connection, mut new: NewCampaign) -> Result<Campaign> {
    let client_name = new.client_name.trim().to_string();
    if client_name.is_empty() {
        return Err(StoreError::Invalid("client name is required".into()).into());
    }
    if let Some(source_id) = new.copy_from {
        let source = get_campaign(conn, source_id)?.ok_or(StoreError::NotFound {
            entity: "campaign",
            id: source_id,
        })?;
        campaign::inherit_from(&mut new, &source);
    }
    let created_at = campaign::now_rfc3339()?;
    let start_date = match campaign::non_blank(new.start_date.as_deref()) {
        Some(s) => campaign::normalize_post_date(s)
            .map_err(|e| StoreError::Invalid(e.to_string()))?,
        None => created_at.clone(),
    };

    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO campaigns (client_name, period, start_date, brand_voice, target_audience, goals, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                client_name,
                new.period,
                start_date,
                new.brand_voice,
                new.target_audience,
                new.goals,
                new.notes,
                created_at
            ],
        )
    })?;
    let id = conn.last_insert_rowid();
    get_campaign(conn, id)?.ok_or_else(|| anyhow!("campaign id {} vanished after insert", id))
}

/**
 * \brief 列出活动，最新的在前。
 */
pub fn list_campaigns(conn: &Connection) -> Result<Vec<Campaign>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM campaigns ORDER BY id DESC",
        CAMPAIGN_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], campaign_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_campaign(conn: &Connection, id: i64) -> Result<Option<Campaign>> {
    conn.query_row(
        &format!("SELECT {} FROM campaigns WHERE id=?1", CAMPAIGN_COLUMNS),
        params![id],
        campaign_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/**
 * \brief 部分更新活动字段。
 */
pub fn update_campaign(conn: &Connection, id: i64, patch: &CampaignPatch) -> Result<Campaign> {
    let mut current = get_campaign(conn, id)?.ok_or(StoreError::NotFound {
        entity: "campaign",
        id,
    })?;
    if let Some(name) = &patch.client_name {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("client name is required".into()).into());
        }
        current.client_name = name.to_string();
    }
    if let Some(period) = patch.period {
        current.period = period;
    }
    if let Some(start) = &patch.start_date {
        current.start_date =
            campaign::normalize_post_date(start).map_err(|e| StoreError::Invalid(e.to_string()))?;
    }
    if patch.brand_voice.is_some() {
        current.brand_voice = patch.brand_voice.clone();
    }
    if patch.target_audience.is_some() {
        current.target_audience = patch.target_audience.clone();
    }
    if patch.goals.is_some() {
        current.goals = patch.goals.clone();
    }
    if patch.notes.is_some() {
        current.notes = patch.notes.clone();
    }

    retry_on_locked(|| {
        conn.execute(
            "UPDATE campaigns SET client_name=?1, period=?2, start_date=?3, brand_voice=?4, target_audience=?5, goals=?6, notes=?7 WHERE id=?8",
            params![
                current.client_name,
                current.period,
                current.start_date,
                current.brand_voice,
                current.target_audience,
                current.goals,
                current.notes,
                id
            ],
        )
    })?;
    Ok(current)
}

/**
 * \brief 删除活动及其全部帖子（同一事务内完成）。
 */
pub fn delete_campaign(conn: &Connection, id: i64) -> Result<()> {
    let rows = retry_on_locked(|| {
        let tx = conn.unchecked_transaction()?;
        let rows = tx.execute("DELETE FROM campaigns WHERE id=?1", params![id])?;
        if rows > 0 {
            tx.execute(
                "DELETE FROM campaign_posts WHERE campaign_id=?1",
                params![id],
            )?;
        }
        tx.commit()?;
        Ok(rows)
    })?;
    if rows == 0 {
        return Err(StoreError::NotFound {
            entity: "campaign",
            id,
        }
        .into());
    }
    Ok(())
}

/**
 * \brief 新增排期帖子；未指定语气时沿用活动品牌语气。
 */
pub fn insert_post(conn: &Connection, campaign_id: i64, new: &NewPost) -> Result<CampaignPost> {
    let owner = get_campaign(conn, campaign_id)?.ok_or(StoreError::NotFound {
        entity: "campaign",
        id: campaign_id,
    })?;
    let post_date = match campaign::non_blank(new.post_date.as_deref()) {
        Some(s) => {
            campaign::normalize_post_date(s).map_err(|e| StoreError::Invalid(e.to_string()))?
        }
        None => campaign::now_rfc3339()?,
    };
    let tone = campaign::non_blank(new.tone.as_deref())
        .or_else(|| campaign::non_blank(owner.brand_voice.as_deref()))
        .unwrap_or(DEFAULT_TONE)
        .to_string();
    let caption = new.caption.clone().unwrap_or_default();

    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO campaign_posts (campaign_id, platform, post_date, caption, tone, hashtags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                campaign_id,
                new.platform,
                post_date,
                caption,
                tone,
                new.hashtags
            ],
        )
    })?;
    let id = conn.last_insert_rowid();
    get_post(conn, id)?.ok_or_else(|| anyhow!("post id {} vanished after insert", id))
}

/**
 * \brief 按排期日期列出活动帖子。
 */
pub fn list_posts(conn: &Connection, campaign_id: i64) -> Result<Vec<CampaignPost>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM campaign_posts WHERE campaign_id=?1 ORDER BY post_date ASC, id ASC",
        POST_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![campaign_id], post_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_post(conn: &Connection, id: i64) -> Result<Option<CampaignPost>> {
    conn.query_row(
        &format!("SELECT {} FROM campaign_posts WHERE id=?1", POST_COLUMNS),
        params![id],
        post_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn update_post(conn: &Connection, id: i64, patch: &PostPatch) -> Result<CampaignPost> {
    let mut current = get_post(conn, id)?.ok_or(StoreError::NotFound { entity: "post", id })?;
    if let Some(platform) = patch.platform {
        current.platform = platform;
    }
    if let Some(date) = &patch.post_date {
        current.post_date =
            campaign::normalize_post_date(date).map_err(|e| StoreError::Invalid(e.to_string()))?;
    }
    if let Some(caption) = &patch.caption {
        current.caption = caption.clone();
    }
    if patch.tone.is_some() {
        current.tone = patch.tone.clone();
    }
    if patch.hashtags.is_some() {
        current.hashtags = patch.hashtags.clone();
    }

    retry_on_locked(|| {
        conn.execute(
            "UPDATE campaign_posts SET platform=?1, post_date=?2, caption=?3, tone=?4, hashtags=?5 WHERE id=?6",
            params![
                current.platform,
                current.post_date,
                current.caption,
                current.tone,
                current.hashtags,
                id
            ],
        )
    })?;
    Ok(current)
}

pub fn delete_post(conn: &Connection, id: i64) -> Result<()> {
    let rows =
        retry_on_locked(|| conn.execute("DELETE FROM campaign_posts WHERE id=?1", params![id]))?;
    if rows == 0 {
        return Err(StoreError::NotFound { entity: "post", id }.into());
    }
    Ok(())
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并线性退避，最多尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    let mut attempt = 0;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                attempt += 1;
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys=ON;").expect("fk");
        migrate(&conn).expect("migrate");
        conn
    }

    fn provider(name: &str, key: Option<&str>) -> ProviderConfig {
        let mut cfg = ProviderConfig::new(name, "model-1");
        cfg.api_key = key.map(Into::into);
        cfg
    }

    fn new_campaign(name: &str) -> NewCampaign {
        NewCampaign {
            client_name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_provider_crud_and_activation() {
        let conn = mem_conn();
        let id1 = insert_provider(&conn, &provider("openai", Some("sk-1"))).expect("insert 1");
        let id2 = insert_provider(&conn, &provider("gemini", Some("g-1"))).expect("insert 2");
        assert_eq!(list_providers(&conn).expect("list").len(), 2);
        assert!(get_active_provider(&conn).expect("active").is_none());

        set_provider_active(&conn, id1, true).expect("activate 1");
        set_provider_active(&conn, id2, true).expect("activate 2");
        let active = get_active_provider(&conn).expect("active").expect("some");
        assert_eq!(active.id, Some(id2));
        let actives = list_providers(&conn)
            .expect("list")
            .into_iter()
            .filter(|p| p.is_active)
            .count();
        assert_eq!(actives, 1);

        set_provider_active(&conn, id2, false).expect("deactivate");
        assert!(get_active_provider(&conn).expect("active").is_none());

        let mut edited = provider("anthropic", None);
        edited.base_url = Some("https://proxy.example.com/v1".into());
        update_provider(&conn, id1, &edited).expect("update");
        let one = get_provider_by_id(&conn, id1).expect("get").expect("some");
        assert_eq!(one.provider_name.as_str(), "anthropic");
        assert!(one.api_key.is_none());
        assert_eq!(one.base_url.as_deref(), Some("https://proxy.example.com/v1"));

        delete_provider(&conn, id1).expect("delete");
        assert!(get_provider_by_id(&conn, id1).expect("get").is_none());
    }

    #[test]
    fn test_insert_active_provider_replaces_previous() {
        let conn = mem_conn();
        let mut first = provider("openai", Some("a"));
        first.is_active = true;
        let id1 = insert_provider(&conn, &first).expect("insert 1");
        let id2 = insert_provider(&conn, &first).expect("insert 2");
        assert_eq!(
            get_active_provider(&conn).expect("active").and_then(|p| p.id),
            Some(id2)
        );
        let old = get_provider_by_id(&conn, id1).expect("get").expect("some");
        assert!(!old.is_active);
    }

    #[test]
    fn test_provider_unknown_id_and_validation() {
        let conn = mem_conn();
        let err = set_provider_active(&conn, 99, true).expect_err("missing");
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { .. })
        ));
        assert!(update_provider(&conn, 99, &provider("openai", None)).is_err());
        let err = insert_provider(&conn, &ProviderConfig::new("openai", "  ")).expect_err("blank");
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn test_telemetry_flag_roundtrip() {
        let conn = mem_conn();
        assert!(!get_telemetry_enabled(&conn).expect("get"));
        set_telemetry_enabled(&conn, true).expect("set");
        assert!(get_telemetry_enabled(&conn).expect("get"));
    }

    #[test]
    fn test_content_history() {
        let conn = mem_conn();
        let a = insert_content(&conn, Platform::Facebook, "post a").expect("insert a");
        let b = insert_content(&conn, Platform::TikTok, "script b").expect("insert b");

        let all = list_contents(&conn, None).expect("list");
        assert_eq!(all.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b.id, a.id]);
        let only_fb = list_contents(&conn, Some(Platform::Facebook)).expect("filter");
        assert_eq!(only_fb.len(), 1);
        assert_eq!(only_fb[0].text, "post a");

        let edited = update_content_text(&conn, a.id, "post a v2").expect("update");
        assert_eq!(edited.text, "post a v2");
        assert_eq!(edited.created_at, a.created_at);

        delete_content(&conn, b.id).expect("delete");
        assert!(delete_content(&conn, b.id).is_err());
        assert_eq!(list_contents(&conn, None).expect("list").len(), 1);
    }

    #[test]
    fn test_campaign_copy_from_previous() {
        let conn = mem_conn();
        let source = create_campaign(
            &conn,
            NewCampaign {
                client_name: "Bean Bar".into(),
                brand_voice: Some("Cozy".into()),
                target_audience: Some("Students".into()),
                goals: Some("Cold brew".into()),
                notes: Some("Likes emojis".into()),
                ..Default::default()
            },
        )
        .expect("create source");

        let copied = create_campaign(
            &conn,
            NewCampaign {
                client_name: "Bean Bar Q2".into(),
                period: CampaignPeriod::Week,
                copy_from: Some(source.id),
                ..Default::default()
            },
        )
        .expect("create copy");
        assert_eq!(copied.brand_voice.as_deref(), Some("Cozy"));
        assert_eq!(copied.target_audience.as_deref(), Some("Students"));
        assert_eq!(copied.notes.as_deref(), Some("Likes emojis"));
        assert_eq!(copied.period, CampaignPeriod::Week);

        let listed = list_campaigns(&conn).expect("list");
        assert_eq!(listed[0].id, copied.id);

        let missing = create_campaign(
            &conn,
            NewCampaign {
                client_name: "X".into(),
                copy_from: Some(404),
                ..Default::default()
            },
        );
        assert!(missing.is_err());
        assert!(create_campaign(&conn, new_campaign("  ")).is_err());
    }

    #[test]
    fn test_update_campaign_patch() {
        let conn = mem_conn();
        let c = create_campaign(&conn, new_campaign("Acme")).expect("create");
        let updated = update_campaign(
            &conn,
            c.id,
            &CampaignPatch {
                goals: Some("Grow followers".into()),
                start_date: Some("2026-02-01".into()),
                ..Default::default()
            },
        )
        .expect("update");
        assert_eq!(updated.client_name, "Acme");
        assert_eq!(updated.goals.as_deref(), Some("Grow followers"));
        assert_eq!(updated.start_date, "2026-02-01T00:00:00Z");
        assert_eq!(get_campaign(&conn, c.id).expect("get").expect("some"), updated);
    }

    #[test]
    fn test_posts_schedule_and_cascade() {
        let conn = mem_conn();
        let c = create_campaign(
            &conn,
            NewCampaign {
                client_name: "Acme".into(),
                brand_voice: Some("Bold".into()),
                ..Default::default()
            },
        )
        .expect("create");

        let late = insert_post(
            &conn,
            c.id,
            &NewPost {
                platform: Platform::Instagram,
                post_date: Some("2026-05-10".into()),
                caption: None,
                tone: None,
                hashtags: None,
            },
        )
        .expect("late");
        let early = insert_post(
            &conn,
            c.id,
            &NewPost {
                platform: Platform::Facebook,
                post_date: Some("2026-05-01T09:30:00Z".into()),
                caption: Some("draft".into()),
                tone: Some("Calm".into()),
                hashtags: Some("#acme".into()),
            },
        )
        .expect("early");
        assert_eq!(late.tone.as_deref(), Some("Bold"));
        assert_eq!(late.post_date, "2026-05-10T00:00:00Z");
        assert_eq!(early.tone.as_deref(), Some("Calm"));

        let posts = list_posts(&conn, c.id).expect("list");
        assert_eq!(posts.iter().map(|p| p.id).collect::<Vec<_>>(), vec![early.id, late.id]);

        let patched = update_post(
            &conn,
            late.id,
            &PostPatch {
                caption: Some("Big news #acme".into()),
                ..Default::default()
            },
        )
        .expect("patch");
        assert_eq!(patched.caption, "Big news #acme");
        assert_eq!(patched.platform, Platform::Instagram);

        let bad = insert_post(
            &conn,
            c.id,
            &NewPost {
                platform: Platform::Facebook,
                post_date: Some("someday".into()),
                caption: None,
                tone: None,
                hashtags: None,
            },
        );
        assert!(bad.is_err());

        delete_campaign(&conn, c.id).expect("delete campaign");
        assert!(get_post(&conn, early.id).expect("get").is_none());
    }

    #[test]
    fn test_delete_campaign_keeps_other_posts() {
        let conn = mem_conn();
        let gone = create_campaign(&conn, new_campaign("Gone")).expect("create gone");
        let kept = create_campaign(&conn, new_campaign("Kept")).expect("create kept");
        let post = NewPost {
            platform: Platform::TikTok,
            post_date: Some("2026-04-01".into()),
            caption: None,
            tone: None,
            hashtags: None,
        };
        insert_post(&conn, gone.id, &post).expect("post gone");
        let survivor = insert_post(&conn, kept.id, &post).expect("post kept");

        let err = delete_campaign(&conn, 999).expect_err("unknown campaign");
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { entity: "campaign", id: 999 })
        ));
        assert_eq!(list_posts(&conn, gone.id).expect("list").len(), 1);

        delete_campaign(&conn, gone.id).expect("delete");
        assert!(list_posts(&conn, gone.id).expect("list").is_empty());
        assert!(get_campaign(&conn, gone.id).expect("get").is_none());
        assert_eq!(
            list_posts(&conn, kept.id).expect("list")[0].id,
            survivor.id
        );
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = mem_conn();
        migrate(&conn).expect("second migrate");
    }
}
