//! Log-backed stream bus: append-only per-topic logs with consumer groups and explicit acks.
//!
//! Group subscriptions get at-least-once delivery with respect to consumer crashes: an
//! entry read but not acknowledged stays pending for its consumer and is delivered again
//! when a subscription with the same consumer name starts. Without an explicit name the
//! consumer is named after its group and topic, so a restarted process picks up where
//! the previous one stopped. Broadcast subscriptions only
//! see entries appended after they were created and never acknowledge anything.

mod memory;
#[cfg(feature = "redis-streams")]
mod redis_log;

pub use memory::MemoryLog;
#[cfg(feature = "redis-streams")]
pub use redis_log::RedisLog;

use crate::codec;
use crate::contract::{EventBus, Handler, Subscription, validate_publish, validate_topic};
use crate::dispatch::Dispatcher;
use crate::error::{EventBusError, EventBusErrorExt, Result};
use async_trait::async_trait;
use evbus_domain::config::{AckPolicy, DispatchConfig, RedisStreamConfig};
use evbus_domain::{Event, SubscriptionOptions, safe_nanoid};
use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Field under which the encoded event is stored in each log entry.
pub const EVENT_FIELD: &str = "event";

/// One log entry as returned by a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    /// Contents of the [`EVENT_FIELD`] field; `None` when the entry lacks it.
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Created,
    /// Another consumer created the group first.
    Exists,
}

/// Which entries a group read returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupCursor {
    /// Entries already delivered to this consumer but not acknowledged, with ids above the given one.
    PendingAfter(String),
    /// Entries never delivered to any member of the group.
    New,
}

/// Append-only log operations used by [`StreamBus`].
#[async_trait]
pub trait StreamLog: Send + Sync + Debug + 'static {
    /// Appends `payload` under [`EVENT_FIELD`] and returns the entry id.
    async fn append(&self, stream: &str, payload: Vec<u8>) -> Result<String>;

    /// Creates `group` positioned at the end of `stream`, creating the stream if needed.
    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupStatus>;

    /// Group read for `consumer`. Reads of new entries wait up to `block` when nothing is
    /// available and return an empty batch on timeout.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: GroupCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    /// Id of the newest entry, or `"0-0"` for an empty or missing stream.
    async fn tail_id(&self, stream: &str) -> Result<String>;

    /// Entries with ids above `after`, waiting up to `block` when there are none.
    async fn read(
        &self,
        stream: &str,
        after: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ReadSettings {
    consumer_name: Option<String>,
    count: usize,
    block: Duration,
    error_backoff: Duration,
    ack_policy: AckPolicy,
}

impl From<&RedisStreamConfig> for ReadSettings {
    fn from(config: &RedisStreamConfig) -> Self {
        Self {
            consumer_name: config.consumer_name.clone().filter(|n| !n.is_empty()),
            count: config.read_count.max(1),
            block: config.block(),
            error_backoff: config.error_backoff(),
            ack_policy: config.ack_policy,
        }
    }
}

/// Event bus over a [`StreamLog`].
#[derive(Debug)]
pub struct StreamBus<L: StreamLog> {
    log: Arc<L>,
    settings: ReadSettings,
    closed: RwLock<bool>,
    root: CancellationToken,
    dispatcher: Dispatcher,
}

impl<L: StreamLog> StreamBus<L> {
    pub fn new(log: L, config: &RedisStreamConfig, dispatch: &DispatchConfig) -> Self {
        Self {
            log: Arc::new(log),
            settings: ReadSettings::from(config),
            closed: RwLock::new(false),
            root: CancellationToken::new(),
            dispatcher: Dispatcher::new(dispatch.max_in_flight),
        }
    }

    #[must_use]
    pub fn log(&self) -> &L {
        &self.log
    }

    fn consumer_name(&self, topic: &str, group: &str, options: &SubscriptionOptions) -> String {
        options
            .name()
            .map(str::to_owned)
            .or_else(|| self.settings.consumer_name.clone())
            .unwrap_or_else(|| default_consumer_name(topic, group))
    }

    fn reader(&self, topic: &str, handler: Handler, token: CancellationToken) -> Reader<L> {
        Reader {
            log: Arc::clone(&self.log),
            topic: topic.to_owned(),
            handler,
            token,
            dispatcher: self.dispatcher.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[async_trait]
impl<L: StreamLog> EventBus for StreamBus<L> {
    async fn publish_to(&self, ctx: &CancellationToken, topic: &str, event: Event) -> Result<()> {
        validate_publish(topic, &event)?;
        if self.is_closed() {
            return Err(EventBusError::closed());
        }

        let payload = codec::encode(&event)?;
        let entry_id = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(EventBusError::cancelled()),
            res = self.log.append(topic, payload) => res.context("stream append")?,
        };
        trace!(topic, id = %event.id, entry_id = %entry_id, "appended");
        Ok(())
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

        let token = self.root.child_token();
        let id = safe_nanoid!();

        if let Some(group) = options.group() {
            let status = self.log.create_group(topic, group).await.context("create group")?;
            let consumer = self.consumer_name(topic, group, &options);
            debug!(topic, group, consumer = %consumer, ?status, "group subscription");

            let reader = self.reader(topic, handler, token.clone());
            tokio::spawn(reader.run_group(group.to_owned(), consumer));
        } else {
            let tail = self.log.tail_id(topic).await.context("read stream tail")?;
            debug!(topic, after = %tail, "broadcast subscription");

            let reader = self.reader(topic, handler, token.clone());
            tokio::spawn(reader.run_broadcast(tail));
        }

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
        self.log.close().await.context("stream close")?;
        info!("stream bus closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.read()
    }
}

/// Per-subscription read task state.
struct Reader<L: StreamLog> {
    log: Arc<L>,
    topic: String,
    handler: Handler,
    token: CancellationToken,
    dispatcher: Dispatcher,
    settings: ReadSettings,
}

impl<L: StreamLog> Reader<L> {
    async fn run_group(self, group: String, consumer: String) {
        // Drain this consumer's unacknowledged entries before asking for new ones.
        let mut pending_after = Some("0".to_owned());

        while !self.token.is_cancelled() {
            let cursor = pending_after.clone().map_or(GroupCursor::New, GroupCursor::PendingAfter);
            let read = self.log.read_group(
                &self.topic,
                &group,
                &consumer,
                cursor,
                self.settings.count,
                self.settings.block,
            );
            let entries = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                res = read => match res {
                    Ok(entries) => entries,
                    Err(error) => {
                        warn!(topic = %self.topic, group = %group, consumer = %consumer, %error, "group read failed");
                        if self.backoff().await { continue }
                        break;
                    },
                },
            };

            if pending_after.is_some() {
                match entries.last() {
                    Some(last) => pending_after = Some(last.id.clone()),
                    None => {
                        debug!(topic = %self.topic, consumer = %consumer, "pending entries drained");
                        pending_after = None;
                        continue;
                    },
                }
            }

            for entry in entries {
                if !self.deliver_grouped(&group, entry).await {
                    break;
                }
            }
        }
        trace!(topic = %self.topic, group = %group, consumer = %consumer, "group reader stopped");
    }

    /// Returns `false` once the subscription is stopping.
    async fn deliver_grouped(&self, group: &str, entry: StreamEntry) -> bool {
        let Some(event) = self.decode(&entry) else {
            // Poison entries are acknowledged so they do not stay pending forever.
            ack(&*self.log, &self.topic, group, &entry.id).await;
            return true;
        };

        match self.settings.ack_policy {
            AckPolicy::OnDispatch => {
                if !self.dispatch(self.invoke(event)).await {
                    return false;
                }
                ack(&*self.log, &self.topic, group, &entry.id).await;
            },
            AckPolicy::AfterHandler => {
                let invoke = self.invoke(event);
                let (log, topic, group) = (Arc::clone(&self.log), self.topic.clone(), group.to_owned());
                let task = async move {
                    invoke.await;
                    ack(&*log, &topic, &group, &entry.id).await;
                };
                if !self.dispatch(task).await {
                    return false;
                }
            },
        }
        true
    }

    async fn run_broadcast(self, mut after: String) {
        while !self.token.is_cancelled() {
            let read = self.log.read(&self.topic, &after, self.settings.count, self.settings.block);
            let entries = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                res = read => match res {
                    Ok(entries) => entries,
                    Err(error) => {
                        warn!(topic = %self.topic, %error, "stream read failed");
                        if self.backoff().await { continue }
                        break;
                    },
                },
            };

            for entry in entries {
                after.clone_from(&entry.id);
                if let Some(event) = self.decode(&entry)
                    && !self.dispatch(self.invoke(event)).await
                {
                    break;
                }
            }
        }
        trace!(topic = %self.topic, "broadcast reader stopped");
    }

    fn decode(&self, entry: &StreamEntry) -> Option<Arc<Event>> {
        let Some(payload) = entry.payload.as_deref() else {
            warn!(topic = %self.topic, entry_id = %entry.id, "entry has no event field, skipping");
            return None;
        };
        match codec::decode(payload) {
            Ok(event) => Some(Arc::new(event)),
            Err(error) => {
                warn!(topic = %self.topic, entry_id = %entry.id, %error, "undecodable entry, skipping");
                None
            },
        }
    }

    fn invoke(&self, event: Arc<Event>) -> impl Future<Output = ()> + Send + use<L> {
        let (handler, ctx) = (Arc::clone(&self.handler), self.token.clone());
        async move { handler(ctx, event).await }
    }

    async fn dispatch(&self, task: impl Future<Output = ()> + Send + 'static) -> bool {
        tokio::select! {
            biased;
            () = self.token.cancelled() => false,
            accepted = self.dispatcher.spawn(task) => accepted,
        }
    }

    /// Sleeps for the error backoff. Returns `false` if cancelled meanwhile.
    async fn backoff(&self) -> bool {
        tokio::select! {
            biased;
            () = self.token.cancelled() => false,
            () = tokio::time::sleep(self.settings.error_backoff) => true,
        }
    }
}

/// Consumer name used when neither the subscription nor the config names one.
#[must_use]
pub fn default_consumer_name(topic: &str, group: &str) -> String {
    format!("consumer_{group}_{topic}")
}

async fn ack<L: StreamLog + ?Sized>(log: &L, topic: &str, group: &str, id: &str) {
    if let Err(error) = log.ack(topic, group, id).await {
        warn!(topic, group, entry_id = id, %error, "ack failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(consumer_name: Option<&str>) -> StreamBus<MemoryLog> {
        let config = RedisStreamConfig {
            consumer_name: consumer_name.map(str::to_owned),
            ..RedisStreamConfig::default()
        };
        StreamBus::new(MemoryLog::new(), &config, &DispatchConfig::default())
    }

    #[test]
    fn unnamed_consumer_is_stable_across_buses() {
        let options = SubscriptionOptions::new().with_group("billing");
        let first = bus(None).consumer_name("orders", "billing", &options);
        let second = bus(None).consumer_name("orders", "billing", &options);
        assert_eq!(first, second);
        assert_eq!(first, "consumer_billing_orders");
    }

    #[test]
    fn explicit_names_take_precedence() {
        let grouped = SubscriptionOptions::new().with_group("g");
        assert_eq!(bus(Some("node-1")).consumer_name("t", "g", &grouped), "node-1");
        assert_eq!(bus(Some("")).consumer_name("t", "g", &grouped), "consumer_g_t");

        let named = grouped.with_name("w1");
        assert_eq!(bus(Some("node-1")).consumer_name("t", "g", &named), "w1");
    }
}
