use crate::contract::{EventBus, Handler, Subscription, validate_publish, validate_topic};
use crate::error::{EventBusError, Result};
use async_trait::async_trait;
use evbus_domain::config::MemoryBusConfig;
use evbus_domain::{Event, SubscriptionOptions, safe_nanoid};
use futures_util::FutureExt;
use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const DEFAULT_INBOX_CAPACITY: usize = 10;

#[derive(Debug)]
struct Envelope {
    ctx: CancellationToken,
    event: Arc<Event>,
}

/// Deliveries that found the inbox full, in publish order.
#[derive(Debug, Default)]
struct Backlog {
    queue: VecDeque<Envelope>,
    // A forwarding task owns the queue while set.
    forwarding: bool,
}

/// Delivery path to one subscriber.
#[derive(Debug, Clone)]
struct Route {
    inbox: mpsc::Sender<Envelope>,
    backlog: Arc<Mutex<Backlog>>,
}

impl Route {
    fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    /// Hands `envelope` to the inbox, or queues it behind earlier overflow so the
    /// subscriber keeps publish order.
    fn deliver(&self, envelope: Envelope) {
        let mut backlog = self.backlog.lock();
        let envelope = if backlog.forwarding {
            envelope
        } else {
            match self.inbox.try_send(envelope) {
                Ok(()) | Err(TrySendError::Closed(_)) => return,
                Err(TrySendError::Full(envelope)) => envelope,
            }
        };

        backlog.queue.push_back(envelope);
        if !backlog.forwarding {
            backlog.forwarding = true;
            tokio::spawn(forward_backlog(self.clone()));
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    id: String,
    group: Option<String>,
    route: Route,
}

#[derive(Debug, Default)]
struct TopicSubscribers {
    subscribers: Vec<Subscriber>,
    // Advances once per publish; picks the receiving member of each group.
    cursor: AtomicUsize,
}

impl TopicSubscribers {
    fn prune(&mut self) {
        self.subscribers.retain(|s| {
            let live = !s.route.is_closed();
            if !live {
                trace!(subscription = %s.id, "pruned stopped subscriber");
            }
            live
        });
    }

    /// Inboxes that should receive the next event: every broadcast subscriber plus one
    /// member per group, rotating through the members.
    fn targets(&self) -> Vec<Route> {
        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut groups: FxHashMap<&str, Vec<&Subscriber>> = FxHashMap::default();
        let mut targets = Vec::with_capacity(self.subscribers.len());

        for sub in self.subscribers.iter().filter(|s| !s.route.is_closed()) {
            match sub.group.as_deref() {
                Some(group) => groups.entry(group).or_default().push(sub),
                None => targets.push(sub.route.clone()),
            }
        }
        for members in groups.values() {
            targets.push(members[turn % members.len()].route.clone());
        }
        targets
    }
}

#[derive(Debug, Default)]
struct Registry {
    topics: FxHashMap<String, TopicSubscribers>,
    closed: bool,
}

/// In-process fan-out bus.
///
/// Every subscriber owns a bounded inbox drained by its own task and sees events in
/// publish order. When an inbox is full, deliveries queue behind it and are forwarded in
/// order as room frees up; a queued delivery whose publisher token is cancelled before it
/// reaches the inbox is dropped.
///
/// # Example
/// ```rust
/// use evbus_event_bus::{CancellationToken, EventBus, InMemoryBus, handler};
/// use evbus_domain::{Event, SubscriptionOptions};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> evbus_event_bus::Result<()> {
/// let bus = InMemoryBus::new();
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
///
/// bus.subscribe("user.created", handler(move |_ctx, event| {
///     let tx = tx.clone();
///     async move { let _ = tx.send(event); }
/// }), SubscriptionOptions::new()).await?;
///
/// bus.publish(&CancellationToken::new(), Event::new("user.created", json!({ "id": 42 }))).await?;
/// assert_eq!(rx.recv().await.unwrap().data["id"], 42);
/// bus.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryBus {
    registry: RwLock<Registry>,
    inbox_capacity: usize,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INBOX_CAPACITY)
    }
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_config(config: &MemoryBusConfig) -> Self {
        Self::with_capacity(config.inbox_capacity)
    }

    /// Creates a bus whose subscriber inboxes hold `capacity` events (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { registry: RwLock::new(Registry::default()), inbox_capacity: capacity.max(1) }
    }

    /// Number of live subscribers on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry
            .read()
            .topics
            .get(topic)
            .map_or(0, |t| t.subscribers.iter().filter(|s| !s.route.is_closed()).count())
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish_to(&self, ctx: &CancellationToken, topic: &str, event: Event) -> Result<()> {
        let targets = {
            let registry = self.registry.read();
            if registry.closed {
                return Err(EventBusError::closed());
            }
            validate_publish(topic, &event)?;
            match registry.topics.get(topic) {
                Some(subscribers) => subscribers.targets(),
                None => return Ok(()),
            }
        };

        trace!(topic, id = %event.id, subscribers = targets.len(), "publishing");
        let event = Arc::new(event);
        for route in targets {
            route.deliver(Envelope { ctx: ctx.clone(), event: Arc::clone(&event) });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        options: SubscriptionOptions,
    ) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(self.inbox_capacity);
        let id = safe_nanoid!();
        {
            let mut registry = self.registry.write();
            if registry.closed {
                return Err(EventBusError::closed());
            }
            validate_topic(topic)?;

            let entry = registry.topics.entry(topic.to_owned()).or_default();
            entry.prune();
            entry.subscribers.push(Subscriber {
                id: id.clone(),
                group: options.group().map(str::to_owned),
                route: Route { inbox: tx, backlog: Arc::default() },
            });
        }

        let token = CancellationToken::new();
        debug!(topic, subscription = %id, group = options.group(), "subscribed");
        tokio::spawn(drain_inbox(topic.to_owned(), rx, handler, token.clone()));
        Ok(Subscription::new(id, topic, &options, token))
    }

    async fn close(&self) -> Result<()> {
        let topics = {
            let mut registry = self.registry.write();
            if registry.closed {
                return Err(EventBusError::already_closed());
            }
            registry.closed = true;
            std::mem::take(&mut registry.topics)
        };
        let dropped: usize = topics.values().map(|t| t.subscribers.len()).sum();
        debug!(subscribers = dropped, "in-memory bus closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.registry.read().closed
    }
}

/// Moves queued deliveries into the inbox one at a time as room frees up. A delivery
/// whose publisher cancels while it waits is dropped.
async fn forward_backlog(route: Route) {
    loop {
        let envelope = {
            let mut backlog = route.backlog.lock();
            match backlog.queue.pop_front() {
                Some(envelope) => envelope,
                None => {
                    backlog.forwarding = false;
                    return;
                },
            }
        };

        let (ctx, id) = (envelope.ctx.clone(), envelope.event.id.clone());
        tokio::select! {
            biased;
            () = ctx.cancelled() => {
                trace!(id = %id, "delivery abandoned, publisher cancelled");
            },
            sent = route.inbox.send(envelope) => if sent.is_err() {
                let mut backlog = route.backlog.lock();
                backlog.queue.clear();
                backlog.forwarding = false;
                return;
            },
        }
    }
}

async fn drain_inbox(
    topic: String,
    mut inbox: mpsc::Receiver<Envelope>,
    handler: Handler,
    token: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            () = token.cancelled() => break,
            next = inbox.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let id = envelope.event.id.clone();
        let delivery = handler(envelope.ctx, envelope.event);
        if AssertUnwindSafe(delivery).catch_unwind().await.is_err() {
            warn!(topic = %topic, id = %id, "handler panicked");
        }
    }
    token.cancel();
    trace!(topic = %topic, "subscriber stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler;
    use serde_json::json;
    use std::time::Duration;

    fn counting() -> (Handler, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = {
            let hits = hits.clone();
            handler(move |_ctx, _event| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        (h, hits)
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let bus = InMemoryBus::with_capacity(0);
        assert_eq!(bus.inbox_capacity, 1);
    }

    #[tokio::test]
    async fn unsubscribed_inboxes_are_pruned() {
        let bus = InMemoryBus::new();
        let (h, _) = counting();
        let sub = bus.subscribe("t", h.clone(), SubscriptionOptions::new()).await.unwrap();
        assert_eq!(bus.subscriber_count("t"), 1);

        sub.unsubscribe();
        tokio::time::timeout(Duration::from_secs(1), async {
            while bus.subscriber_count("t") > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        bus.subscribe("t", h, SubscriptionOptions::new()).await.unwrap();
        assert_eq!(bus.registry.read().topics["t"].subscribers.len(), 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = InMemoryBus::new();
        bus.publish(&CancellationToken::new(), Event::new("nobody", json!(null))).await.unwrap();
    }

    #[tokio::test]
    async fn panicking_handler_keeps_subscription_alive() {
        let bus = InMemoryBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = {
            let hits = hits.clone();
            handler(move |_ctx, event| {
                let hits = hits.clone();
                async move {
                    assert_ne!(event.id, "boom", "handler failure");
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        bus.subscribe("t", h, SubscriptionOptions::new()).await.unwrap();

        let ctx = CancellationToken::new();
        bus.publish(&ctx, Event::new("t", json!(1)).with_id("boom")).await.unwrap();
        bus.publish(&ctx, Event::new("t", json!(2))).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while hits.load(Ordering::SeqCst) < 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
