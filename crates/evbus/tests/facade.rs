#![allow(deprecated)]

use evbus::domain::config::{BackendKind, BusConfig};
use evbus::domain::{Event, SubscriptionOptions};
use evbus::event_bus::{CancellationToken, EventBusError, handler};
use evbus::registry;
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn memory_backend_delivers() {
    let config = BusConfig::default();
    assert_eq!(config.backend, BackendKind::Memory);

    let bus = evbus::connect(&config).await.unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    bus.subscribe(
        "user.created",
        handler(move |_ctx, event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.id.clone());
            }
        }),
        SubscriptionOptions::new(),
    )
    .await
    .unwrap();

    bus.publish(&CancellationToken::new(), Event::new("user.created", json!({})).with_id("u-1"))
        .await
        .unwrap();
    let got = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
    assert_eq!(got.as_deref(), Some("u-1"));
    bus.close().await.unwrap();
}

#[cfg(not(feature = "nats"))]
#[tokio::test]
async fn nats_without_feature_is_a_configuration_error() {
    let config = BusConfig { backend: BackendKind::Nats, ..BusConfig::default() };
    let err = evbus::connect(&config).await.unwrap_err();
    assert!(matches!(err, EventBusError::Configuration { .. }), "{err}");
    assert!(err.to_string().contains("nats"));
    assert!(!evbus::is_available(BackendKind::Nats));
}

#[cfg(not(feature = "redis-streams"))]
#[tokio::test]
async fn redis_without_feature_is_a_configuration_error() {
    let config = BusConfig { backend: BackendKind::RedisStream, ..BusConfig::default() };
    let err = evbus::connect(&config).await.unwrap_err();
    assert!(matches!(err, EventBusError::Configuration { .. }), "{err}");
}

#[test]
fn memory_is_always_available() {
    assert!(evbus::is_available(BackendKind::Memory));
}

#[tokio::test]
#[serial]
async fn registry_installs_and_replaces_default() {
    let _ = registry::take_default();
    assert!(registry::default_bus().is_none());

    let first = evbus::connect(&BusConfig::default()).await.unwrap();
    assert!(registry::install_default(Arc::clone(&first)).is_none());

    let installed = registry::default_bus().unwrap();
    assert!(Arc::ptr_eq(&installed, &first));

    let second = evbus::connect(&BusConfig::default()).await.unwrap();
    let previous = registry::install_default(second).unwrap();
    assert!(Arc::ptr_eq(&previous, &first));

    assert!(registry::take_default().is_some());
    assert!(registry::default_bus().is_none());
}

#[tokio::test]
#[serial]
async fn registry_shares_one_bus() {
    let _ = registry::take_default();
    registry::install_default(evbus::connect(&BusConfig::default()).await.unwrap());

    let a = registry::default_bus().unwrap();
    let b = registry::default_bus().unwrap();
    a.close().await.unwrap();
    assert!(b.is_closed());

    registry::take_default();
}
