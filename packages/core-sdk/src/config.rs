use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};

use crate::llm::ClientIdentity;

/**
 * \brief 进程级配置，来源于环境变量。
 */
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /** \brief SQLite 数据库文件 */
    pub db_path: PathBuf,
    /** \brief 本地覆盖配置文件（存在时优先于数据库中的激活配置） */
    pub local_override: Option<PathBuf>,
    pub ui_dir: PathBuf,
    pub ui_fallback: PathBuf,
    pub log_dir: PathBuf,
    pub identity: ClientIdentity,
    pub request_timeout: Duration,
    pub simulated_latency: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("marketai.db"),
            local_override: None,
            ui_dir: PathBuf::from("packages/ui/dist"),
            ui_fallback: PathBuf::from("web"),
            log_dir: PathBuf::from("logs"),
            identity: ClientIdentity::default(),
            request_timeout: Duration::from_secs(60),
            simulated_latency: Duration::ZERO,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /**
     * \brief 通过任意键值查找构造配置，便于测试。
     */
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = AppConfig::default();

        if let Some(v) = get("MARKETAI_DB") {
            cfg.db_path = PathBuf::from(v);
        }
        cfg.local_override = get("MARKETAI_LOCAL_AI_CONFIG").map(PathBuf::from);
        if let Some(v) = get("MARKETAI_UI_DIR") {
            cfg.ui_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MARKETAI_UI_FALLBACK") {
            cfg.ui_fallback = PathBuf::from(v);
        }
        if let Some(v) = get("MARKETAI_LOG_DIR") {
            cfg.log_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MARKETAI_SITE_ORIGIN") {
            cfg.identity.site_origin = v;
        }
        if let Some(v) = get("MARKETAI_APP_TITLE") {
            cfg.identity.app_title = v;
        }
        if let Some(v) = get("MARKETAI_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("invalid MARKETAI_REQUEST_TIMEOUT_SECS: {}", v))?;
            cfg.request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = get("MARKETAI_SIMULATED_LATENCY_MS") {
            let ms: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("invalid MARKETAI_SIMULATED_LATENCY_MS: {}", v))?;
            cfg.simulated_latency = Duration::from_millis(ms);
        }
        Ok(cfg)
    }
}
