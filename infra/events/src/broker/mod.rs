//! Broker-backed bus: a session on a pub/sub broker with plain and queue-group subscriptions.

mod memory;
#[cfg(feature = "nats")]
mod nats;

pub use memory::{MemoryBroker, MemoryBrokerConnection};
#[cfg(feature = "nats")]
pub use nats::NatsConnection;

use crate::codec;
use crate::contract::{EventBus, Handler, Subscription, validate_publish, validate_topic};
use crate::dispatch::Dispatcher;
use crate::error::{EventBusError, EventBusErrorExt, Result};
use async_trait::async_trait;
use evbus_domain::config::DispatchConfig;
use evbus_domain::{Event, SubscriptionOptions, safe_nanoid};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Raw message stream of one broker subscription.
pub type MessageStream = BoxStream<'static, Vec<u8>>;

/// Minimal broker session used by [`BrokerBus`].
///
/// Reconnection, if any, is the implementation's concern.
#[async_trait]
pub trait BrokerConnection: Send + Sync + Debug + 'static {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Opens a subscription. With `queue_group` the broker delivers each message to
    /// exactly one member of the group.
    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<MessageStream>;

    /// Flushes pending publishes and releases the session.
    async fn close(&self) -> Result<()>;
}

/// Event bus over a [`BrokerConnection`].
///
/// Inbound messages are decoded and handed to a bounded worker pool, so handler
/// invocations of one subscription may run concurrently and finish out of order.
/// Messages that fail to decode are logged and dropped.
#[derive(Debug)]
pub struct BrokerBus<C: BrokerConnection> {
    conn: C,
    closed: RwLock<bool>,
    root: CancellationToken,
    dispatcher: Dispatcher,
}

impl<C: BrokerConnection> BrokerBus<C> {
    pub fn new(conn: C, dispatch: &DispatchConfig) -> Self {
        Self {
            conn,
            closed: RwLock::new(false),
            root: CancellationToken::new(),
            dispatcher: Dispatcher::new(dispatch.max_in_flight),
        }
    }

    #[must_use]
    pub const fn connection(&self) -> &C {
        &self.conn
    }
}

#[async_trait]
impl<C: BrokerConnection> EventBus for BrokerBus<C> {
    async fn publish_to(&self, ctx: &CancellationToken, topic: &str, event: Event) -> Result<()> {
        validate_publish(topic, &event)?;
        if self.is_closed() {
            return Err(EventBusError::closed());
        }

        let payload = codec::encode(&event)?;
        trace!(topic, id = %event.id, bytes = payload.len(), "publishing to broker");
        tokio::select! {
            biased;
            () = ctx.cancelled() => Err(EventBusError::cancelled()),
            res = self.conn.publish(topic, payload) => res.context("broker publish"),
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        options: SubscriptionOptions,
    ) -> Result<Subscription> {
        validate_topic(topic)?;
        if self.is_closed() {
            return Err(EventBusError::closed());
        }

        let stream = self.conn.subscribe(topic, options.group()).await.context("broker subscribe")?;
        let token = self.root.child_token();
        let id = safe_nanoid!();

        debug!(topic, subscription = %id, group = options.group(), "broker subscription opened");
        tokio::spawn(read_messages(
            topic.to_owned(),
            stream,
            handler,
            token.clone(),
            self.dispatcher.clone(),
        ));
        Ok(Subscription::new(id, topic, &options, token))
    }

    async fn close(&self) -> Result<()> {
        {
            let mut closed = self.closed.write();
            if *closed {
                return Err(EventBusError::already_closed());
            }
            *closed = true;
        }

        self.root.cancel();
        self.dispatcher.shutdown();
        self.conn.close().await.context("broker close")?;
        info!("broker bus closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.read()
    }
}

async fn read_messages(
    topic: String,
    mut stream: MessageStream,
    handler: Handler,
    token: CancellationToken,
    dispatcher: Dispatcher,
) {
    loop {
        let payload = tokio::select! {
            biased;
            () = token.cancelled() => break,
            next = stream.next() => match next {
                Some(payload) => payload,
                None => {
                    debug!(topic = %topic, "broker stream ended");
                    break;
                },
            },
        };

        let event = match codec::decode(&payload) {
            Ok(event) => Arc::new(event),
            Err(error) => {
                warn!(topic = %topic, %error, "dropping undecodable broker message");
                continue;
            },
        };

        let task = {
            let (handler, ctx) = (Arc::clone(&handler), token.clone());
            async move { handler(ctx, event).await }
        };
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            accepted = dispatcher.spawn(task) => if !accepted { break },
        }
    }
    token.cancel();
    trace!(topic = %topic, "broker read loop stopped");
}
