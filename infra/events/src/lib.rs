//! # Event Bus
//!
//! One publish/subscribe contract, [`EventBus`], over three delivery substrates:
//!
//! * [`InMemoryBus`]: in-process fan-out with a bounded inbox and a dispatch task per subscriber.
//! * [`BrokerBus`]: a pub/sub broker session ([`NatsConnection`] behind the `nats` feature,
//!   [`MemoryBroker`] for tests and local runs). Groups map to broker queue groups.
//! * [`StreamBus`]: append-only logs with consumer groups and explicit acks ([`RedisLog`]
//!   behind the `redis-streams` feature, [`MemoryLog`] in process).
//!
//! Events cross process boundaries as JSON (see [`codec`]). Handlers receive a
//! [`CancellationToken`] and an `Arc<Event>`; per-message work on the remote buses runs on a
//! bounded worker pool sized by `DispatchConfig::max_in_flight`.
//!
//! # Example
//!
//! ```rust
//! use evbus_domain::config::{DispatchConfig, RedisStreamConfig};
//! use evbus_domain::{Event, SubscriptionOptions};
//! use evbus_event_bus::{CancellationToken, EventBus, MemoryLog, StreamBus, handler};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> evbus_event_bus::Result<()> {
//! let bus = StreamBus::new(MemoryLog::new(), &RedisStreamConfig::default(), &DispatchConfig::default());
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! let opts = SubscriptionOptions::new().with_group("billing");
//! bus.subscribe("orders", handler(move |_ctx, event| {
//!     let tx = tx.clone();
//!     async move { let _ = tx.send(event.id.clone()); }
//! }), opts).await?;
//!
//! bus.publish(&CancellationToken::new(), Event::new("orders", json!({ "total": 10 })).with_id("o-1")).await?;
//! assert_eq!(rx.recv().await.as_deref(), Some("o-1"));
//! bus.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod codec;
mod contract;
mod dispatch;
mod error;
mod memory;
mod session;
pub mod stream;

pub use broker::{BrokerBus, BrokerConnection, MemoryBroker, MemoryBrokerConnection};
#[cfg(feature = "nats")]
pub use broker::NatsConnection;
pub use contract::{EventBus, Handler, Subscription, handler};
pub use error::{EventBusError, EventBusErrorExt, Result};
pub use memory::InMemoryBus;
#[cfg(feature = "redis-streams")]
pub use stream::RedisLog;
pub use stream::{MemoryLog, StreamBus, StreamLog};
pub use tokio_util::sync::CancellationToken;
