use super::*;
use serial_test::serial;
use std::io::Write;

fn clear_env() {
    std::env::remove_var(CONFIG_ENV_VAR);
    std::env::remove_var("COURIER__RETRY__MAX_ATTEMPTS");
    std::env::remove_var("COURIER__RETRY__INITIAL_INTERVAL_MS");
}

fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.retry, RetryConfig::default());
    assert_eq!(config.pubsub.subscriber_buffer, None);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_for_test() {
    let config = Config::for_test();
    assert_eq!(config.retry.max_attempts, 3);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_load_without_sources_gives_defaults() {
    clear_env();
    let config = Config::load(None).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
#[serial]
fn test_load_from_path() {
    clear_env();
    let file = yaml_file(
        "retry:\n  initial_interval_ms: 50\n  max_attempts: 7\npubsub:\n  subscriber_buffer: 16\n",
    );

    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.retry.initial_interval_ms, 50);
    assert_eq!(config.retry.max_attempts, 7);
    // Unset fields keep their defaults
    assert_eq!(config.retry.max_interval_ms, 120_000);
    assert_eq!(config.pubsub.subscriber_buffer, Some(16));
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let file = yaml_file("retry:\n  max_attempts: 7\n");
    std::env::set_var(CONFIG_ENV_VAR, file.path());
    std::env::set_var("COURIER__RETRY__MAX_ATTEMPTS", "5");

    let result = Config::load(None);
    clear_env();

    assert_eq!(result.unwrap().retry.max_attempts, 5);
}

#[test]
#[serial]
fn test_load_rejects_invalid_values() {
    clear_env();
    let file = yaml_file("retry:\n  max_attempts: 0\n");

    let result = Config::load(Some(file.path()));
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
#[serial]
fn test_load_missing_explicit_path_fails() {
    clear_env();
    let result = Config::load(Some(Path::new("/nonexistent/courier.yaml")));
    assert!(matches!(result, Err(ConfigError::Load(_))));
}
