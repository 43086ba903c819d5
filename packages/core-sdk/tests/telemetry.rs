use marketai_core_sdk::telemetry;

// 全局订阅器每个进程只能安装一次，本文件只保留一个测试
#[test]
fn test_log_file_follows_switch() {
    let dir = tempfile::tempdir().expect("tempdir");
    telemetry::init(dir.path()).expect("init");

    telemetry::set_enabled(false);
    tracing::warn!(target: "campaign", "HIDDEN_LINE while switched off");

    telemetry::set_enabled(true);
    tracing::warn!(target: "campaign", "VISIBLE_LINE while switched on");
    tracing::info!(target: "adapter", "INFO_LINE while switched on");
    tracing::debug!(target: "adapter", "DEBUG_LINE below the file level");

    telemetry::set_enabled(false);
    tracing::warn!(target: "campaign", "LATE_LINE after switching off");

    let written =
        std::fs::read_to_string(dir.path().join(telemetry::LOG_FILE_NAME)).expect("read log");
    assert!(written.contains("VISIBLE_LINE"));
    assert!(written.contains("INFO_LINE"));
    assert!(written.contains("campaign"));
    assert!(!written.contains("HIDDEN_LINE"));
    assert!(!written.contains("DEBUG_LINE"));
    assert!(!written.contains("LATE_LINE"));
}
