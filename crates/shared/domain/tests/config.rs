use evbus_domain::config::{
    AckPolicy, AppConfig, BackendKind, BusConfig, DispatchConfig, MemoryBusConfig, NatsConfig,
    RedisStreamConfig,
};
use serde_json::json;
use std::time::Duration;

#[test]
fn config_defaults_are_sane() {
    let bus = BusConfig::default();
    assert_eq!(bus.backend, BackendKind::Memory);

    assert_eq!(MemoryBusConfig::default().inbox_capacity, 10);

    let nats = NatsConfig::default();
    assert_eq!(nats.url, "nats://127.0.0.1:4222");
    assert_eq!(nats.max_reconnects, Some(10));
    assert_eq!(nats.reconnect_wait(), Duration::from_secs(2));

    let redis = RedisStreamConfig::default();
    assert_eq!(redis.url, "127.0.0.1:6379");
    assert_eq!(redis.error_backoff(), Duration::from_secs(1));
    assert_eq!(redis.ack_policy, AckPolicy::OnDispatch);
    assert!(redis.consumer_name.is_none());

    assert_eq!(DispatchConfig::default().max_in_flight, 64);
}

#[test]
fn app_config_deserializes() {
    let raw = json!({
        "bus": {
            "backend": "redis_stream",
            "redis": {
                "url": "redis://cache:6379",
                "credentials": { "username": "svc", "password": "secret" },
                "consumer_name": "billing-1",
                "ack_policy": "after_handler"
            },
            "dispatch": { "max_in_flight": 8 }
        },
        "logging": { "level": "debug", "json": true }
    });

    let cfg: AppConfig = serde_json::from_value(raw).expect("config deserialize");
    assert_eq!(cfg.bus.backend, BackendKind::RedisStream);
    assert_eq!(cfg.bus.redis.consumer_name.as_deref(), Some("billing-1"));
    assert_eq!(cfg.bus.redis.ack_policy, AckPolicy::AfterHandler);
    assert_eq!(cfg.bus.redis.credentials.as_ref().map(|c| c.username.as_str()), Some("svc"));
    assert_eq!(cfg.bus.redis.read_count, 10, "unspecified fields keep defaults");
    assert_eq!(cfg.bus.dispatch.max_in_flight, 8);
    assert_eq!(cfg.logging.level, "debug");
    assert!(cfg.logging.json);
}

#[test]
fn backend_kind_parses_aliases() {
    assert_eq!("memory".parse::<BackendKind>(), Ok(BackendKind::Memory));
    assert_eq!("NATS".parse::<BackendKind>(), Ok(BackendKind::Nats));
    assert_eq!("redis-stream".parse::<BackendKind>(), Ok(BackendKind::RedisStream));
    assert!("kafka".parse::<BackendKind>().is_err());
    assert_eq!(BackendKind::RedisStream.to_string(), "redis_stream");
}

#[test]
fn app_config_is_cheap_to_clone_and_copy_on_write() {
    let base = AppConfig::default();
    let mut tweaked = base.clone();
    tweaked.bus.backend = BackendKind::Nats;

    assert_eq!(base.bus.backend, BackendKind::Memory);
    assert_eq!(tweaked.bus.backend, BackendKind::Nats);
}
