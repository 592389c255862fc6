use super::{BrokerConnection, MessageStream};
use crate::error::{EventBusError, EventBusErrorExt, Result};
use crate::session::Session;
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use evbus_domain::config::NatsConfig;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

/// [`BrokerConnection`] over a NATS client.
///
/// Reconnects follow `max_reconnects` and `reconnect_wait_ms` from [`NatsConfig`];
/// the client replays its subscriptions after a reconnect. [`close`](BrokerConnection::close)
/// flushes and drops the client; later calls fail with a transport error.
#[derive(Debug)]
pub struct NatsConnection {
    client: Session<Client>,
}

impl NatsConnection {
    /// Connects to the configured server.
    ///
    /// # Errors
    /// [`EventBusError::Transport`] when the initial connection fails.
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        let wait = config.reconnect_wait();
        let mut options = ConnectOptions::new()
            .connection_timeout(config.connection_timeout())
            .max_reconnects(config.max_reconnects)
            .reconnect_delay_callback(move |_attempts| wait)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Connected => info!("nats connection established"),
                    async_nats::Event::Disconnected => warn!("nats connection lost"),
                    async_nats::Event::Closed => info!("nats connection closed"),
                    other => debug!(event = %other, "nats client event"),
                }
            });
        if let Some(credentials) = &config.credentials {
            options = options
                .user_and_password(credentials.username.clone(), credentials.password.clone());
        }

        let client = options
            .connect(config.url.as_str())
            .await
            .map_err(EventBusError::transport)
            .context(format!("connect {}", config.url))?;
        info!(url = %config.url, "connected to nats");
        Ok(Self::from_client(client))
    }

    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client: Session::new(client) }
    }

    fn client(&self) -> Result<Client> {
        self.client.get().context("nats")
    }
}

#[async_trait]
impl BrokerConnection for NatsConnection {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.client()?
            .publish(subject.to_owned(), payload.into())
            .await
            .map_err(EventBusError::transport)
    }

    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<MessageStream> {
        let client = self.client()?;
        let subscriber = match queue_group {
            Some(group) => client.queue_subscribe(subject.to_owned(), group.to_owned()).await,
            None => client.subscribe(subject.to_owned()).await,
        }
        .map_err(EventBusError::transport)?;

        Ok(subscriber.map(|message| message.payload.to_vec()).boxed())
    }

    async fn close(&self) -> Result<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        let flushed = client.flush().await.map_err(EventBusError::transport);
        drop(client);
        debug!("nats client released");
        flushed
    }
}
