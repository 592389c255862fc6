//! Facade crate for the event bus workspace.
//! Re-exports the domain, kernel and bus crates and picks a backend from configuration.
//! Keep this crate thin: it composes the other crates, it does not implement delivery.
//!
//! ## Usage
//! - Enable the backends you need (`nats`, `redis-streams`, `full`).
//! - Call [`connect`] once at start-up and pass the returned bus by reference.
//!
//! ```rust
//! use evbus::domain::config::BusConfig;
//! use evbus::event_bus::CancellationToken;
//! use evbus::domain::Event;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> evbus::event_bus::Result<()> {
//! let bus = evbus::connect(&BusConfig::default()).await?;
//! bus.publish(&CancellationToken::new(), Event::new("app.started", serde_json::json!({}))).await?;
//! bus.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod registry;

pub use evbus_domain as domain;
pub use evbus_event_bus as event_bus;
pub use evbus_kernel as kernel;

use evbus_domain::config::{BackendKind, BusConfig};
use evbus_event_bus::{EventBus, InMemoryBus, Result};
use std::sync::Arc;
use tracing::info;

/// Backends compiled into this build.
pub const BACKENDS: &[BackendKind] = &[
    BackendKind::Memory,
    #[cfg(feature = "nats")]
    BackendKind::Nats,
    #[cfg(feature = "redis-streams")]
    BackendKind::RedisStream,
];

#[must_use]
pub fn is_available(backend: BackendKind) -> bool {
    BACKENDS.contains(&backend)
}

/// Builds the bus selected by `config.backend`.
///
/// # Errors
/// * [`EventBusError::Configuration`](evbus_event_bus::EventBusError::Configuration) when the
///   backend is not compiled into this build.
/// * [`EventBusError::Transport`](evbus_event_bus::EventBusError::Transport) when the broker
///   or log server cannot be reached.
pub async fn connect(config: &BusConfig) -> Result<Arc<dyn EventBus>> {
    let bus: Arc<dyn EventBus> = match config.backend {
        BackendKind::Memory => Arc::new(InMemoryBus::from_config(&config.memory)),
        BackendKind::Nats => connect_nats(config).await?,
        BackendKind::RedisStream => connect_redis(config).await?,
    };
    info!(backend = %config.backend, "event bus ready");
    Ok(bus)
}

#[cfg(feature = "nats")]
async fn connect_nats(config: &BusConfig) -> Result<Arc<dyn EventBus>> {
    use evbus_event_bus::{BrokerBus, NatsConnection};

    let conn = NatsConnection::connect(&config.nats).await?;
    Ok(Arc::new(BrokerBus::new(conn, &config.dispatch)))
}

#[cfg(not(feature = "nats"))]
async fn connect_nats(_config: &BusConfig) -> Result<Arc<dyn EventBus>> {
    Err(not_compiled(BackendKind::Nats, "nats"))
}

#[cfg(feature = "redis-streams")]
async fn connect_redis(config: &BusConfig) -> Result<Arc<dyn EventBus>> {
    use evbus_event_bus::{RedisLog, StreamBus};

    let log = RedisLog::connect(&config.redis).await?;
    Ok(Arc::new(StreamBus::new(log, &config.redis, &config.dispatch)))
}

#[cfg(not(feature = "redis-streams"))]
async fn connect_redis(_config: &BusConfig) -> Result<Arc<dyn EventBus>> {
    Err(not_compiled(BackendKind::RedisStream, "redis-streams"))
}

#[cfg(any(not(feature = "nats"), not(feature = "redis-streams")))]
fn not_compiled(backend: BackendKind, feature: &str) -> evbus_event_bus::EventBusError {
    evbus_event_bus::EventBusError::configuration(format!(
        "backend '{backend}' is not available; rebuild with the `{feature}` feature"
    ))
}
