use serde::Deserialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Settings read from the config file and `EVBUS__*` environment.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub bus: BusConfig,
    pub logging: LoggingConfig,
}

/// Shared handle over [`AppSettings`]; clones share one allocation until mutated.
///
/// Deserializes through `AppSettings` directly (no `flatten`), so string-typed
/// environment values still coerce into numeric fields.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(from = "AppSettings")]
pub struct AppConfig {
    settings: Arc<AppSettings>,
}

impl From<AppSettings> for AppConfig {
    fn from(settings: AppSettings) -> Self {
        Self { settings: Arc::new(settings) }
    }
}

impl Deref for AppConfig {
    type Target = AppSettings;

    fn deref(&self) -> &Self::Target {
        &self.settings
    }
}

impl DerefMut for AppConfig {
    fn deref_mut(&mut self) -> &mut AppSettings {
        Arc::make_mut(&mut self.settings)
    }
}

/// Which substrate backs the process bus.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    Nats,
    #[serde(alias = "redis", alias = "redis-stream")]
    RedisStream,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Nats => "nats",
            Self::RedisStream => "redis_stream",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Ok(Self::Memory),
            "nats" => Ok(Self::Nats),
            "redis" | "redis_stream" | "redis-stream" => Ok(Self::RedisStream),
            other => Err(format!("unknown bus backend '{other}'")),
        }
    }
}

/// Bus construction parameters. Read once at construction, never mutated afterwards.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub backend: BackendKind,
    pub memory: MemoryBusConfig,
    pub nats: NatsConfig,
    pub redis: RedisStreamConfig,
    pub dispatch: DispatchConfig,
}

/// In-process bus settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryBusConfig {
    /// Per-subscriber inbox capacity.
    pub inbox_capacity: usize,
}

/// Username/password pair shared by the broker and log backends.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// NATS connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub credentials: Option<Credentials>,
    /// `None` keeps reconnecting forever.
    pub max_reconnects: Option<usize>,
    pub reconnect_wait_ms: u64,
    pub connection_timeout_ms: u64,
}

/// When a stream entry is acknowledged relative to its handler.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Acknowledge as soon as the entry is handed to the worker pool.
    /// Handler failures never cause redelivery; a crash before hand-off does.
    #[default]
    OnDispatch,
    /// Acknowledge only after the handler future completes.
    /// A handler that panics leaves the entry pending for redelivery.
    AfterHandler,
}

/// Redis Streams settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisStreamConfig {
    /// `host:port` or a full `redis://`/`rediss://` URL.
    pub url: String,
    pub credentials: Option<Credentials>,
    pub tls: bool,
    pub database: i64,
    pub connection_timeout_ms: u64,
    /// Consumer identity used when a subscription does not name itself. Without one,
    /// group readers use `consumer_<group>_<topic>`.
    pub consumer_name: Option<String>,
    /// Maximum entries fetched per read.
    pub read_count: usize,
    /// How long a read blocks waiting for new entries.
    pub block_ms: u64,
    /// Pause between retries after a failed read.
    pub error_backoff_ms: u64,
    pub ack_policy: AckPolicy,
}

/// Bounds for per-message handler execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of handler invocations running at once per bus.
    pub max_in_flight: usize,
}

/// Logging sink settings used by the binaries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub console: bool,
    pub path: Option<PathBuf>,
    pub json: bool,
    pub env_filter: Option<String>,
}

// --- Durations ---

impl NatsConfig {
    #[must_use]
    pub const fn reconnect_wait(&self) -> Duration {
        Duration::from_millis(self.reconnect_wait_ms)
    }

    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

impl RedisStreamConfig {
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    #[must_use]
    pub const fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

// --- Default ---

impl Default for MemoryBusConfig {
    fn default() -> Self {
        Self { inbox_capacity: 10 }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_owned(),
            credentials: None,
            max_reconnects: Some(10),
            reconnect_wait_ms: 2_000,
            connection_timeout_ms: 5_000,
        }
    }
}

impl Default for RedisStreamConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:6379".to_owned(),
            credentials: None,
            tls: false,
            database: 0,
            connection_timeout_ms: 5_000,
            consumer_name: None,
            read_count: 10,
            block_ms: 2_000,
            error_backoff_ms: 1_000,
            ack_policy: AckPolicy::OnDispatch,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_in_flight: 64 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), console: true, path: None, json: false, env_filter: None }
    }
}
