use crate::error::{EventBusError, Result};
use async_trait::async_trait;
use evbus_domain::{Event, SubscriptionOptions};
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback invoked for every event delivered to a subscription.
///
/// Handlers receive the cancellation token of the delivery (the publisher's token on the
/// in-process bus, the subscription's token on remote buses) and a shared, immutable event.
/// They return nothing: failures must be handled inside the handler.
pub type Handler = Arc<dyn Fn(CancellationToken, Arc<Event>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Adapts an async closure into a [`Handler`].
///
/// ```rust
/// use evbus_event_bus::handler;
///
/// let h = handler(|_ctx, event| async move {
///     tracing::info!(id = %event.id, "received");
/// });
/// # let _ = h;
/// ```
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(CancellationToken, Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx, event| Box::pin(f(ctx, event)))
}

/// The publish/subscribe contract shared by every backend.
///
/// A bus is not reusable after [`close`](EventBus::close): every later call fails with
/// [`EventBusError::Closed`] and a second `close` returns [`EventBusError::AlreadyClosed`].
#[async_trait]
pub trait EventBus: Send + Sync + fmt::Debug {
    /// Publishes `event` on its own type.
    ///
    /// # Errors
    /// See [`publish_to`](EventBus::publish_to).
    async fn publish(&self, ctx: &CancellationToken, event: Event) -> Result<()> {
        let topic = event.kind.clone();
        self.publish_to(ctx, &topic, event).await
    }

    /// Publishes `event` on `topic`.
    ///
    /// # Errors
    /// * [`EventBusError::Validation`] when `topic`, `event.id` or `event.kind` is empty.
    /// * [`EventBusError::Closed`] after `close`.
    /// * [`EventBusError::Encode`] / [`EventBusError::Transport`] from remote backends.
    async fn publish_to(&self, ctx: &CancellationToken, topic: &str, event: Event) -> Result<()>;

    /// Registers `handler` for `topic`.
    ///
    /// # Errors
    /// * [`EventBusError::Validation`] when `topic` is empty.
    /// * [`EventBusError::Closed`] after `close`.
    /// * [`EventBusError::Transport`] when the backend refuses the subscription.
    async fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        options: SubscriptionOptions,
    ) -> Result<Subscription>;

    /// Releases every resource held by the bus.
    ///
    /// # Errors
    /// [`EventBusError::AlreadyClosed`] on the second call.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Handle to a live subscription.
///
/// Dropping the handle does not stop delivery; call [`unsubscribe`](Self::unsubscribe).
#[derive(Clone)]
pub struct Subscription {
    id: String,
    topic: String,
    group: Option<String>,
    token: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        topic: &str,
        options: &SubscriptionOptions,
        token: CancellationToken,
    ) -> Self {
        Self { id, topic: topic.to_owned(), group: options.group().map(str::to_owned), token }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Stops delivery to this subscription. Idempotent.
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    /// `false` once unsubscribed or once the owning bus has closed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Resolves when the subscription stops.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("active", &self.is_active())
            .finish()
    }
}

pub(crate) fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(EventBusError::validation("topic must not be empty"));
    }
    Ok(())
}

pub(crate) fn validate_event(event: &Event) -> Result<()> {
    if event.id.is_empty() {
        return Err(EventBusError::validation("event id must not be empty"));
    }
    if event.kind.is_empty() {
        return Err(EventBusError::validation("event type must not be empty"));
    }
    Ok(())
}

pub(crate) fn validate_publish(topic: &str, event: &Event) -> Result<()> {
    validate_topic(topic)?;
    validate_event(event)
}
