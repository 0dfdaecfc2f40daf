use std::sync::Mutex;

use tempfile::NamedTempFile;

use sentry_node::config::SentrydConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTRY_CONFIG",
        "SENTRY_LISTEN_ADDR",
        "SENTRY_DB_PATH",
        "SENTRY_FRAMES_DIR",
        "SENTRY_ALERT_URL",
        "SENTRY_FONT_PATH",
        "SENTRY_PRESENCE_THRESHOLD_SECS",
        "SENTRY_ALARM_COOLDOWN_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_match_documented_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SentrydConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "detect_log.db");
    assert_eq!(cfg.frames_dir, "static/frames");
    assert_eq!(cfg.listen_addr, "0.0.0.0:5000");
    assert!(cfg.alert_url.is_none());
    assert_eq!(cfg.presence_threshold.as_secs_f64(), 5.0);
    assert_eq!(cfg.alarm_cooldown.as_secs_f64(), 10.0);
    assert_eq!(cfg.detector.backend, "stub");

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "sentry_prod.db",
        "frames_dir": "/var/lib/sentry/frames",
        "listen_addr": "0.0.0.0:8000",
        "alert_url": "http://notifier:8080/alerts",
        "presence_threshold_secs": 3.5,
        "alarm_cooldown_secs": 30,
        "detector": {
            "backend": "stub",
            "stub_luma_threshold": 96
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SENTRY_CONFIG", file.path());
    std::env::set_var("SENTRY_LISTEN_ADDR", "127.0.0.1:9000");
    std::env::set_var("SENTRY_ALARM_COOLDOWN_SECS", "12.5");

    let cfg = SentrydConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "sentry_prod.db");
    assert_eq!(cfg.frames_dir, "/var/lib/sentry/frames");
    // Env wins over file.
    assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
    assert_eq!(cfg.alert_url.as_deref(), Some("http://notifier:8080/alerts"));
    assert_eq!(cfg.presence_threshold.as_secs_f64(), 3.5);
    assert_eq!(cfg.alarm_cooldown.as_secs_f64(), 12.5);
    assert_eq!(cfg.detector.stub_luma_threshold, 96);

    clear_env();
}

#[test]
fn zero_threshold_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTRY_PRESENCE_THRESHOLD_SECS", "0");
    assert!(SentrydConfig::load().is_err());

    clear_env();
}

#[test]
fn non_numeric_cooldown_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTRY_ALARM_COOLDOWN_SECS", "soon");
    assert!(SentrydConfig::load().is_err());

    clear_env();
}
