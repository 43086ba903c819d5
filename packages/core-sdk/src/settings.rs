use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::adapter::ActiveConfigSource;
use crate::config::AppConfig;
use crate::db;
use crate::models::ProviderConfig;

/** \brief 激活配置的来源。 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigOrigin {
    Store,
    LocalOverride,
}

impl ConfigOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigOrigin::Store => "store",
            ConfigOrigin::LocalOverride => "local_override",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveProvider {
    pub origin: ConfigOrigin,
    pub config: ProviderConfig,
}

/**
 * \brief 每次读取时解析激活配置：本地覆盖文件优先，其次数据库中的激活 Provider。
 */
#[derive(Debug, Clone)]
pub struct SettingsSource {
    db_path: PathBuf,
    local_override: Option<PathBuf>,
}

impl SettingsSource {
    pub fn new(db_path: impl Into<PathBuf>, local_override: Option<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            local_override,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.db_path.clone(), config.local_override.clone())
    }

    /**
     * \brief 解析当前激活配置及其来源；无配置时返回 None（模拟模式）。
     */
    pub fn resolve(&self) -> Result<Option<ActiveProvider>> {
        if let Some(config) = self.read_override() {
            return Ok(Some(ActiveProvider {
                origin: ConfigOrigin::LocalOverride,
                config,
            }));
        }
        let conn = db::open(&self.db_path)
            .with_context(|| format!("open settings db {}", self.db_path.display()))?;
        Ok(db::get_active_provider(&conn)?.map(|config| ActiveProvider {
            origin: ConfigOrigin::Store,
            config,
        }))
    }

    fn read_override(&self) -> Option<ProviderConfig> {
        let path = self.local_override.as_ref()?;
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(
                    target: "settings",
                    path = %path.display(),
                    "cannot read local AI config override: {}",
                    err
                );
                return None;
            }
        };
        match serde_json::from_str::<ProviderConfig>(&raw) {
            Ok(mut config) => {
                config.is_active = true;
                Some(config)
            }
            Err(err) => {
                tracing::warn!(
                    target: "settings",
                    path = %path.display(),
                    "ignoring malformed local AI config override: {}",
                    err
                );
                None
            }
        }
    }
}

impl ActiveConfigSource for SettingsSource {
    fn active_config(&self) -> Result<Option<ProviderConfig>> {
        Ok(self.resolve()?.map(|active| active.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded_dir() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("marketai.db");
        let conn = db::open(&db_path).expect("open");
        db::migrate(&conn).expect("migrate");
        let mut cfg = ProviderConfig::new("openai", "gpt-4o-mini").with_api_key("sk-store");
        cfg.is_active = true;
        db::insert_provider(&conn, &cfg).expect("insert");
        (dir, db_path)
    }

    #[test]
    fn test_store_provider_when_no_override() {
        let (_dir, db_path) = seeded_dir();
        let source = SettingsSource::new(&db_path, None);
        let active = source.resolve().expect("resolve").expect("some");
        assert_eq!(active.origin, ConfigOrigin::Store);
        assert_eq!(active.config.credential(), Some("sk-store"));
    }

    #[test]
    fn test_override_file_wins() {
        let (dir, db_path) = seeded_dir();
        let override_path = dir.path().join("ai.json");
        std::fs::write(
            &override_path,
            r#"{"provider_name":"gemini","api_key":"g-local","model_name":"gemini-1.5-flash"}"#,
        )
        .expect("write override");

        let source = SettingsSource::new(&db_path, Some(override_path));
        let active = source.resolve().expect("resolve").expect("some");
        assert_eq!(active.origin, ConfigOrigin::LocalOverride);
        assert_eq!(active.config.credential(), Some("g-local"));
        assert!(active.config.is_active);
    }

    #[test]
    fn test_malformed_or_missing_override_is_ignored() {
        let (dir, db_path) = seeded_dir();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{not json").expect("write");

        for path in [bad, dir.path().join("absent.json")] {
            let source = SettingsSource::new(&db_path, Some(path));
            let config = source.active_config().expect("read").expect("some");
            assert_eq!(config.credential(), Some("sk-store"));
        }
    }

    #[test]
    fn test_empty_store_is_simulation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("empty.db");
        db::migrate(&db::open(&db_path).expect("open")).expect("migrate");
        let source = SettingsSource::new(&db_path, None);
        assert!(source.resolve().expect("resolve").is_none());
    }
}
