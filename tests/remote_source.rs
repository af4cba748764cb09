//! Change propagation from a remote source through the facade.

use std::sync::Arc;
use std::time::Duration;

use app_config::source::{DocumentKey, InMemoryConfigService, RemoteLoader, RemoteSettings};
use app_config::{ConfigError, Configuration, Format, Section, SourceKind};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct Limits {
    max: u32,
}

impl Section for Limits {
    fn section_name(&self) -> &str {
        "limits"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct Features {
    #[serde(default)]
    search: bool,
}

impl Section for Features {
    fn section_name(&self) -> &str {
        "features"
    }
}

fn settings(data_ids: &[&str]) -> RemoteSettings {
    RemoteSettings {
        server_addr: "127.0.0.1".into(),
        server_port: 8848,
        namespace: "test".into(),
        group: "DEFAULT_GROUP".into(),
        data_ids: data_ids.iter().map(|s| s.to_string()).collect(),
        format: Format::Yaml,
        username: None,
        password: None,
        app_name: None,
        fetch_timeout: Duration::from_secs(1),
    }
}

fn key(data_id: &str) -> DocumentKey {
    DocumentKey::new("test", "DEFAULT_GROUP", data_id)
}

async fn connect(service: &InMemoryConfigService, data_ids: &[&str]) -> Configuration {
    let loader = RemoteLoader::connect(settings(data_ids), Arc::new(service.clone()))
        .await
        .unwrap();
    Configuration::with_source(Box::new(loader))
}

#[tokio::test]
async fn test_change_reaches_listener_and_cache() {
    let service = InMemoryConfigService::new();
    service.publish(&key("svc"), "limits:\n  max: 10\n");
    let config = connect(&service, &["svc"]).await;
    assert_eq!(config.kind(), SourceKind::Remote);

    let limits: Limits = config.load().unwrap();
    assert_eq!(limits.max, 10);

    let (tx, mut rx) = mpsc::unbounded_channel();
    config
        .register_change_listener("limits", move |limits: Limits| {
            let _ = tx.send(limits);
        })
        .unwrap();

    service.publish(&key("svc"), "limits:\n  max: 20\n");
    let notified = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(notified, Limits { max: 20 });
    assert_eq!(config.load::<Limits>().unwrap().max, 20);

    // exactly one notification per change
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
}

#[tokio::test]
async fn test_unchanged_sections_are_not_notified() {
    let service = InMemoryConfigService::new();
    service.publish(&key("svc"), "limits:\n  max: 10\nfeatures:\n  search: false\n");
    let config = connect(&service, &["svc"]).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let limits_tx = tx.clone();
    config
        .register_change_listener("limits", move |l: Limits| {
            let _ = limits_tx.send(format!("limits {}", l.max));
        })
        .unwrap();
    config
        .register_change_listener("features", move |f: Features| {
            let _ = tx.send(format!("features {}", f.search));
        })
        .unwrap();

    service.publish(&key("svc"), "limits:\n  max: 10\nfeatures:\n  search: true\n");
    let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, "features true");
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
}

#[tokio::test]
async fn test_undecodable_change_keeps_previous_value() {
    let service = InMemoryConfigService::new();
    service.publish(&key("svc"), "limits:\n  max: 10\nfeatures:\n  search: false\n");
    let config = connect(&service, &["svc"]).await;
    config.load::<Limits>().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let limits_tx = tx.clone();
    config
        .register_change_listener("limits", move |l: Limits| {
            let _ = limits_tx.send(format!("limits {}", l.max));
        })
        .unwrap();
    config
        .register_change_listener("features", move |f: Features| {
            let _ = tx.send(format!("features {}", f.search));
        })
        .unwrap();

    service.publish(
        &key("svc"),
        "limits:\n  max: not-a-number\nfeatures:\n  search: true\n",
    );
    let delivered = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(delivered, "features true");
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    assert_eq!(config.load::<Limits>().unwrap().max, 10);
}

#[tokio::test]
async fn test_removed_listener_is_not_called() {
    let service = InMemoryConfigService::new();
    service.publish(&key("svc"), "limits:\n  max: 10\n");
    let config = connect(&service, &["svc"]).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    config
        .register_change_listener("limits", move |l: Limits| {
            let _ = tx.send(l.max);
        })
        .unwrap();
    assert!(config.remove_change_listener("limits"));

    service.publish(&key("svc"), "limits:\n  max: 11\n");
    // the channel closes once the listener (and its sender) is dropped
    assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());

    // cache not yet populated, so the next read decodes the new value
    for _ in 0..20 {
        if config.load::<Limits>().unwrap().max == 11 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("update never reached the section index");
}

#[tokio::test]
async fn test_listener_type_conflict() {
    let service = InMemoryConfigService::new();
    service.publish(&key("svc"), "limits:\n  max: 10\n");
    let config = connect(&service, &["svc"]).await;
    config.load::<Limits>().unwrap();

    let err = config
        .register_change_listener("limits", |_: Features| {})
        .unwrap_err();
    assert!(matches!(err, ConfigError::ConflictingSectionType { .. }));
    assert_eq!(config.listener_count(), 0);
}

#[tokio::test]
async fn test_later_document_wins_at_startup() {
    let service = InMemoryConfigService::new();
    service.publish(&key("base"), "limits:\n  max: 1\nfeatures:\n  search: true\n");
    service.publish(&key("override"), "limits:\n  max: 2\n");
    let config = connect(&service, &["base", "override"]).await;

    assert_eq!(config.load::<Limits>().unwrap().max, 2);
    assert!(config.load::<Features>().unwrap().search);
    assert_eq!(service.fetch_count(), 2);
}

#[tokio::test]
async fn test_startup_failure_is_fatal() {
    let service = InMemoryConfigService::new();
    let err = RemoteLoader::connect(settings(&["absent"]), Arc::new(service))
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::SourceNotFound(_)));
}
