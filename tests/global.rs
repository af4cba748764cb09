//! The process-wide instance and its free functions.
//!
//! Everything runs in one test: the instance can only be installed once per
//! process.

use std::fs;

use app_config::{ConfigError, Section};
use serde::Deserialize;
use tempfile::TempDir;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct Cache {
    ttl_secs: u64,
}

impl Section for Cache {
    fn section_name(&self) -> &str {
        "cache"
    }
}

#[tokio::test]
async fn test_global_lifecycle() {
    let mut cache = Cache::default();
    assert!(matches!(
        app_config::get_config(&mut cache),
        Err(ConfigError::NotInitialized)
    ));
    assert!(matches!(
        app_config::remove_change_listener("cache"),
        Err(ConfigError::NotInitialized)
    ));

    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("app-test.yml"), "cache:\n  ttl_secs: ${APP_CONFIG_GLOBAL_TTL}\n").unwrap();
    std::env::set_var("CONFIG_SOURCE", "local");
    std::env::set_var("CONF_DIR", dir.path());
    std::env::set_var("CONF_PROFILE", "TEST");
    std::env::set_var("APP_CONFIG_GLOBAL_TTL", "30");

    let config = app_config::init_global().await.unwrap();
    assert_eq!(config.section_names(), vec!["cache"]);
    assert!(matches!(
        app_config::init_global().await,
        Err(ConfigError::AlreadyInitialized)
    ));
    assert!(matches!(
        app_config::install_global(config.clone()),
        Err(ConfigError::AlreadyInitialized)
    ));

    app_config::get_config(&mut cache).unwrap();
    assert_eq!(cache.ttl_secs, 30);

    app_config::register_change_listener("cache", |_: Cache| {}).unwrap();
    assert!(app_config::remove_change_listener("cache").unwrap());
    assert_eq!(app_config::global().unwrap().decode_count(), 1);
}
