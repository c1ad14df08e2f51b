use rask_log_agent::app::{App, Config, ConfigError, LogFormat, LogLevel};
use rask_log_agent::plugin::PluginRegistry;
use serial_test::serial;
use std::env;
use std::time::Duration;
use tempfile::TempDir;

const ENV_VARS: [&str; 7] = [
    "LOG_LEVEL",
    "LOG_FORMAT",
    "CONFIG_FILE",
    "WATCH_INTERVAL_MS",
    "DISABLE_CONTAINER_WATCHER",
    "DOCKER_SOCKET",
    "SHUTDOWN_TIMEOUT_MS",
];

fn clean_all_env_vars() {
    unsafe {
        for var in &ENV_VARS {
            env::remove_var(var);
        }
    }
}

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("agent.toml");
    std::fs::write(&path, content).unwrap();
    path
}

const PIPELINES_TOML: &str = r#"
log_level = "debug"
watch_interval_ms = 250

[[pipelines]]
project = "prj"
logstore = "store"
name = "inline"
key = 1
spec = '{"flushers":[{"type":"flusher_checker"}]}'

[[pipelines]]
project = "prj"
logstore = "store"
name = "from_file"
key = 2
spec_file = "pipeline.json"

[[pipelines]]
project = "prj"
logstore = "store"
name = "table"
key = 3

[pipelines.spec]
flushers = [{ type = "flusher_checker" }]
"#;

#[test]
#[serial]
fn test_config_from_args() {
    clean_all_env_vars();
    let config = Config::from_args([
        "rask-log-agent",
        "--log-level",
        "warn",
        "--log-format",
        "json",
        "--watch-interval-ms",
        "500",
        "--disable-container-watcher",
    ])
    .unwrap();

    assert_eq!(config.log_level, LogLevel::Warn);
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(config.watch_interval, Duration::from_millis(500));
    assert!(config.disable_container_watcher);
    assert!(config.pipelines.is_empty());
}

#[test]
#[serial]
fn test_env_vars_feed_cli_parsing() {
    clean_all_env_vars();
    unsafe {
        env::set_var("WATCH_INTERVAL_MS", "750");
        env::set_var("SHUTDOWN_TIMEOUT_MS", "3000");
    }

    let config = Config::from_args_and_env(["rask-log-agent"]).unwrap();
    assert_eq!(config.watch_interval, Duration::from_millis(750));
    assert_eq!(config.shutdown_timeout, Duration::from_secs(3));

    clean_all_env_vars();
}

#[test]
#[serial]
fn test_from_env_rejects_bad_values() {
    clean_all_env_vars();
    unsafe {
        env::set_var("WATCH_INTERVAL_MS", "soon");
    }
    assert!(matches!(Config::from_env(), Err(ConfigError::EnvError(_))));

    unsafe {
        env::set_var("WATCH_INTERVAL_MS", "0");
    }
    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::InvalidConfig(_))
    ));
    clean_all_env_vars();
}

#[test]
#[serial]
fn test_config_file_declares_pipelines() {
    clean_all_env_vars();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, PIPELINES_TOML);

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.watch_interval, Duration::from_millis(250));
    assert_eq!(config.pipelines.len(), 3);
    assert_eq!(config.base_dir(), Some(dir.path()));
    assert_eq!(
        config.pipelines[1].spec_file.as_deref(),
        Some(std::path::Path::new("pipeline.json"))
    );
}

#[test]
#[serial]
fn test_cli_values_win_over_file() {
    clean_all_env_vars();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, PIPELINES_TOML);

    let config = Config::from_args_and_env([
        "rask-log-agent",
        "--config-file",
        path.to_str().unwrap(),
        "--log-level",
        "error",
    ])
    .unwrap();

    assert_eq!(config.log_level, LogLevel::Error);
    // Left at default on the command line, so the file decides
    assert_eq!(config.watch_interval_ms, 250);
    assert_eq!(config.pipelines.len(), 3);
}

#[test]
#[serial]
fn test_invalid_file_is_reported() {
    clean_all_env_vars();
    let dir = TempDir::new().unwrap();

    let path = write_config(&dir, "watch_interval_ms = \"fast\"");
    assert!(matches!(
        Config::from_file(&path),
        Err(ConfigError::ParseError(_))
    ));

    let path = write_config(
        &dir,
        r#"
[[pipelines]]
project = "prj"
logstore = "store"
name = "nothing"
"#,
    );
    assert!(matches!(
        Config::from_file(&path),
        Err(ConfigError::PipelineSpec { .. })
    ));

    assert!(matches!(
        Config::from_file(dir.path().join("missing.toml")),
        Err(ConfigError::FileError(_))
    ));
}

#[tokio::test]
#[serial]
async fn test_app_loads_every_valid_pipeline() {
    clean_all_env_vars();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, PIPELINES_TOML);
    // Only two of the three pipelines resolve: pipeline.json is missing
    let config = Config::from_file(&path).unwrap();

    let app = App::with_parts(config, PluginRegistry::with_builtins(), None);
    assert_eq!(app.load_pipelines(), 2);
    assert_eq!(app.manager().config_names(), vec!["inline", "table"]);

    std::fs::write(
        dir.path().join("pipeline.json"),
        r#"{"flushers":[{"type":"flusher_checker"}]}"#,
    )
    .unwrap();
    let config = Config::from_file(&path).unwrap();
    let app = App::with_parts(config, PluginRegistry::with_builtins(), None);
    assert_eq!(app.load_pipelines(), 3);
    assert_eq!(app.start_pipelines().await, 3);
    assert!(app.manager().stop_all(Duration::from_secs(5)).await);
}
