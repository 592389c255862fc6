use super::{EVENT_FIELD, GroupCursor, GroupStatus, StreamEntry, StreamLog};
use crate::error::{EventBusError, EventBusErrorExt, Result};
use crate::session::Session;
use async_trait::async_trait;
use evbus_domain::config::RedisStreamConfig;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, IntoConnectionInfo, RedisError};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_GROUP: &str = "BUSYGROUP";

/// [`StreamLog`] over Redis Streams.
///
/// Appends, acks and group management share one auto-reconnecting connection. Blocking
/// reads each take a dedicated connection from a small idle pool so a long `BLOCK` never
/// stalls other commands. Closing drops the writer and every idle reader; later calls
/// fail with a transport error.
pub struct RedisLog {
    client: Client,
    writer: Session<ConnectionManager>,
    readers: Mutex<Vec<MultiplexedConnection>>,
}

impl fmt::Debug for RedisLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLog")
            .field("addr", &self.client.get_connection_info().addr)
            .field("open", &self.writer.is_open())
            .field("idle_readers", &self.readers.lock().len())
            .finish_non_exhaustive()
    }
}

fn transport(error: RedisError) -> EventBusError {
    EventBusError::transport(error)
}

fn connection_url(config: &RedisStreamConfig) -> String {
    if config.url.contains("://") {
        config.url.clone()
    } else {
        let scheme = if config.tls { "rediss" } else { "redis" };
        format!("{scheme}://{}", config.url)
    }
}

impl RedisLog {
    /// Opens the writer connection and verifies the server answers `PING`.
    ///
    /// # Errors
    /// * [`EventBusError::Configuration`] for an unparsable address.
    /// * [`EventBusError::Transport`] when the server cannot be reached in time.
    pub async fn connect(config: &RedisStreamConfig) -> Result<Self> {
        let mut info = connection_url(config)
            .into_connection_info()
            .map_err(|e| EventBusError::configuration(e.to_string()))
            .context("redis url")?;
        info.redis.db = config.database;
        if let Some(credentials) = &config.credentials {
            if !credentials.username.is_empty() {
                info.redis.username = Some(credentials.username.clone());
            }
            info.redis.password = Some(credentials.password.clone());
        }

        let client = Client::open(info)
            .map_err(|e| EventBusError::configuration(e.to_string()))
            .context("redis client")?;

        let timeout = config.connection_timeout();
        let mut writer = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(EventBusError::transport)
            .context("redis connect timed out")?
            .map_err(transport)
            .context("redis connect")?;

        let _: String = tokio::time::timeout(timeout, redis::cmd("PING").query_async(&mut writer))
            .await
            .map_err(EventBusError::transport)
            .context("redis ping timed out")?
            .map_err(transport)
            .context("redis ping")?;

        info!(addr = %client.get_connection_info().addr, "connected to redis");
        Ok(Self { client, writer: Session::new(writer), readers: Mutex::new(Vec::new()) })
    }

    fn writer(&self) -> Result<ConnectionManager> {
        self.writer.get().context("redis")
    }

    async fn reader(&self) -> Result<MultiplexedConnection> {
        if !self.writer.is_open() {
            return Err(EventBusError::transport("connection closed")).context("redis");
        }
        let idle = self.readers.lock().pop();
        match idle {
            Some(conn) => Ok(conn),
            None => {
                debug!("opening redis reader connection");
                self.client.get_multiplexed_async_connection().await.map_err(transport)
            },
        }
    }

    fn release(&self, conn: MultiplexedConnection) {
        if self.writer.is_open() {
            self.readers.lock().push(conn);
        }
    }

    async fn read_with(
        &self,
        stream: &str,
        id: &str,
        options: &StreamReadOptions,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.reader().await?;
        let reply: Option<StreamReadReply> =
            conn.xread_options(&[stream], &[id], options).await.map_err(transport)?;
        self.release(conn);

        Ok(reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .map(|entry| to_entry(&entry))
            .collect())
    }
}

fn to_entry(entry: &StreamId) -> StreamEntry {
    StreamEntry { id: entry.id.clone(), payload: entry.get::<Vec<u8>>(EVENT_FIELD) }
}

fn block_ms(block: Duration) -> usize {
    usize::try_from(block.as_millis()).unwrap_or(usize::MAX)
}

#[async_trait]
impl StreamLog for RedisLog {
    async fn append(&self, stream: &str, payload: Vec<u8>) -> Result<String> {
        let mut conn = self.writer()?;
        conn.xadd(stream, "*", &[(EVENT_FIELD, payload.as_slice())]).await.map_err(transport)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupStatus> {
        let mut conn = self.writer()?;
        let created: std::result::Result<(), RedisError> =
            conn.xgroup_create_mkstream(stream, group, "$").await;
        match created {
            Ok(()) => Ok(GroupStatus::Created),
            Err(e) if e.code() == Some(BUSY_GROUP) => Ok(GroupStatus::Exists),
            Err(e) => Err(transport(e)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: GroupCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let options = StreamReadOptions::default().group(group, consumer).count(count);
        match cursor {
            GroupCursor::New => {
                self.read_with(stream, ">", &options.block(block_ms(block))).await
            },
            GroupCursor::PendingAfter(after) => self.read_with(stream, &after, &options).await,
        }
    }

    async fn tail_id(&self, stream: &str) -> Result<String> {
        let mut conn = self.writer()?;
        let reply: StreamRangeReply =
            conn.xrevrange_count(stream, "+", "-", 1).await.map_err(transport)?;
        Ok(reply.ids.first().map_or_else(|| "0-0".to_owned(), |e| e.id.clone()))
    }

    async fn read(
        &self,
        stream: &str,
        after: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let options = StreamReadOptions::default().count(count).block(block_ms(block));
        self.read_with(stream, after, &options).await
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut conn = self.writer()?;
        let _: i64 = conn.xack(stream, group, &[id]).await.map_err(transport)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        drop(self.writer.take());
        self.readers.lock().clear();
        debug!("redis connections released");
        Ok(())
    }
}
