use std::{
    fs::{self, OpenOptions},
    path::Path,
    sync::{Mutex, RwLock},
};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tracing_subscriber::{
    filter::{filter_fn, EnvFilter},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer,
};

/** \brief 日志文件名，位于日志目录下。 */
pub const LOG_FILE_NAME: &str = "marketai.log";

static TELEMETRY_ENABLED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

/**
 * \brief 更新遥测开关状态。
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

/**
 * \brief 查询当前遥测开关状态。
 */
pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief 安装全局日志订阅器。
 * \details 标准错误输出按 `RUST_LOG` 过滤（默认 warn）；
 *          文件层写入 `{log_dir}/marketai.log`，仅在遥测开关打开时记录。
 * \param log_dir 日志目录，不存在时创建
 */
pub fn init(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))
        .with_context(|| format!("open log file in {}", log_dir.display()))?;
    let file = Mutex::new(file);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")));

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file)
        .with_filter(filter_fn(|meta| {
            is_enabled() && *meta.level() <= tracing::Level::INFO
        }));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle() {
        set_enabled(true);
        assert!(is_enabled());
        set_enabled(false);
        assert!(!is_enabled());
    }

    #[test]
    fn test_init_creates_log_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().join("logs");
        // 全局订阅器只能安装一次，其他测试可能已安装
        let _ = init(&log_dir);
        assert!(log_dir.join(LOG_FILE_NAME).exists());
    }
}
