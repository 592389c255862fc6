//! # Logger
//!
//! Process-wide `tracing` setup for event bus applications: console output,
//! rolling log files written through a non-blocking worker, optional JSON
//! formatting and `RUST_LOG`-style filtering.
//!
//! Use [`LoggerBuilder::env_filter`] to set module-directed filters
//! (e.g., `"evbus_event_bus=debug,async_nats=warn"`), in addition to `RUST_LOG`.
//!
//! ## Example
//!
//! ```rust
//! # use evbus_logger::{Logger, LevelFilter};
//!
//! let _logger = Logger::builder()
//!     .name("evbus")
//!     .console(true)
//!     .level(LevelFilter::DEBUG)
//!     .init()
//!     .unwrap();
//! ```

mod error;

pub use crate::error::{LoggerError, LoggerErrorExt};
pub use tracing::level_filters::LevelFilter;
pub use tracing_appender::rolling::Rotation;

use evbus_domain::config::LoggingConfig;
use private::Sealed;
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_MAX_FILES: usize = 10;
const LOG_FILE_SUFFIX: &str = "log";

#[derive(Debug)]
struct LoggerSettings {
    console: bool,
    path: Option<PathBuf>,
    level: LevelFilter,
    rotation: Rotation,
    max_files: usize,
    json: bool,
    env_filter: Option<String>,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            console: true,
            path: None,
            level: LevelFilter::INFO,
            rotation: Rotation::DAILY,
            max_files: DEFAULT_MAX_FILES,
            json: false,
            env_filter: None,
        }
    }
}

#[derive(Debug)]
pub struct NoName;
#[derive(Debug)]
pub struct WithName(String);

mod private {
    pub trait Sealed {}
}
impl Sealed for NoName {}
impl Sealed for WithName {}

/// A builder for configuring and initializing the global tracing subscriber.
///
/// A name is required before [`init`](LoggerBuilder::init) becomes available;
/// it prefixes rolling log files (`<name>.<date>.log`).
#[derive(Debug)]
pub struct LoggerBuilder<N: Sealed = NoName> {
    settings: LoggerSettings,
    name: N,
}

impl LoggerBuilder<NoName> {
    /// Sets the name of the logger.
    pub fn name(self, name: impl Into<String>) -> LoggerBuilder<WithName> {
        LoggerBuilder { settings: self.settings, name: WithName(name.into()) }
    }
}

impl LoggerBuilder<WithName> {
    /// Configures the minimum log level to be emitted.
    #[must_use = "The builder must be configured before it can be used to initialize the logger."]
    pub const fn level(mut self, level: LevelFilter) -> Self {
        self.settings.level = level;
        self
    }

    /// Adds an explicit env filter (e.g., `evbus_event_bus=debug,redis=info`).
    ///
    /// Invalid filters cause [`LoggerBuilder::init`] to return an error.
    #[must_use = "The builder must be configured before it can be used to initialize the logger."]
    pub fn env_filter(mut self, filter: impl Into<String>) -> Self {
        self.settings.env_filter = Some(filter.into());
        self
    }

    #[must_use = "The builder must be configured before it can be used to initialize the logger."]
    pub const fn console(mut self, enabled: bool) -> Self {
        self.settings.console = enabled;
        self
    }

    /// Emits JSON lines instead of the compact text format, on every output.
    #[must_use = "The builder must be configured before it can be used to initialize the logger."]
    pub const fn json(mut self, enabled: bool) -> Self {
        self.settings.json = enabled;
        self
    }

    /// Writes logs into rolling files under `path`.
    #[must_use = "The builder must be configured before it can be used to initialize the logger."]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.path = Some(path.into());
        self
    }

    /// Log file rotation strategy. Ignored without [`path`](Self::path).
    #[must_use = "The builder must be configured before it can be used to initialize the logger."]
    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.settings.rotation = rotation;
        self
    }

    /// Number of rotated files to keep. Ignored without [`path`](Self::path).
    #[must_use = "The builder must be configured before it can be used to initialize the logger."]
    pub const fn max_files(mut self, max: usize) -> Self {
        self.settings.max_files = max;
        self
    }

    /// Consumes the builder and initializes the global tracing subscriber.
    ///
    /// # Returns
    /// A [`Logger`] handle. **Note:** This handle contains a [`WorkerGuard`]
    /// when file output is enabled; keep it alive for the duration of the
    /// program so buffered lines are flushed.
    ///
    /// # Errors
    /// Returns [`LoggerError::Subscriber`] if a global subscriber has already been set.
    /// Returns [`LoggerError::InvalidConfiguration`] for invalid builder settings.
    pub fn init(self) -> Result<Logger, LoggerError> {
        let Self { settings, name: WithName(name) } = self;
        validate(&settings, &name)?;

        let env_filter = build_env_filter(&settings)?;
        let mut layers = Vec::new();

        if settings.console {
            let console = layer().with_ansi(!settings.json);
            layers.push(if settings.json {
                console.json().boxed()
            } else {
                console.compact().boxed()
            });
        }

        let guard = if let Some(path) = settings.path {
            fs::create_dir_all(&path).map_err(|e| LoggerError::Internal {
                message: e.to_string().into(),
                context: Some(format!("Failed to create path: {}", path.display()).into()),
            })?;

            let appender = RollingFileAppender::builder()
                .rotation(settings.rotation)
                .filename_prefix(&name)
                .filename_suffix(LOG_FILE_SUFFIX)
                .max_log_files(settings.max_files)
                .build(&path)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file = layer().with_writer(writer).with_ansi(false);
            layers.push(if settings.json { file.json().boxed() } else { file.boxed() });
            Some(guard)
        } else {
            None
        };

        if layers.is_empty() {
            return Err(LoggerError::invalid(
                "No logging outputs enabled. Enable console or file output.",
            ));
        }

        tracing_subscriber::registry().with(env_filter).with(layers).try_init()?;

        Ok(Logger { guard })
    }
}

/// A handle to the initialized logging system.
///
/// Holds the background writer guard. Drop it only when the application
/// is shutting down.
#[must_use = "Dropping this handle will stop background logging threads."]
#[derive(Debug)]
pub struct Logger {
    guard: Option<WorkerGuard>,
}

impl Logger {
    /// Returns a new [`LoggerBuilder`] to configure the global tracing subscriber.
    #[must_use = "The builder must be configured before it can be used to initialize the logger."]
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder { settings: LoggerSettings::default(), name: NoName }
    }

    /// Initializes logging from the `logging` section of the application config.
    ///
    /// # Errors
    /// [`LoggerError::InvalidConfiguration`] for an unknown level name, plus every
    /// error of [`LoggerBuilder::init`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use evbus_domain::config::LoggingConfig;
    /// use evbus_logger::Logger;
    ///
    /// let config = LoggingConfig { level: "debug".into(), ..LoggingConfig::default() };
    /// let _logger = Logger::from_config("evbus", &config).unwrap();
    /// ```
    pub fn from_config(name: impl Into<String>, config: &LoggingConfig) -> Result<Self, LoggerError> {
        let level = parse_level(&config.level).context("logging.level")?;

        let mut builder =
            Self::builder().name(name).level(level).console(config.console).json(config.json);
        if let Some(path) = &config.path {
            builder = builder.path(path);
        }
        if let Some(filter) = config.env_filter.as_deref().filter(|f| !f.trim().is_empty()) {
            builder = builder.env_filter(filter);
        }
        builder.init()
    }

    /// `true` when file output is active.
    #[must_use]
    pub const fn writes_files(&self) -> bool {
        self.guard.is_some()
    }

    /// Returns a reference to the underlying worker guard, if present.
    #[must_use]
    pub const fn guard(&self) -> Option<&WorkerGuard> {
        self.guard.as_ref()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if self.guard.is_some() {
            tracing::debug!("logging shutting down, flushing file output");
        }
    }
}

fn parse_level(level: &str) -> Result<LevelFilter, LoggerError> {
    level
        .trim()
        .parse()
        .map_err(|_| LoggerError::invalid(format!("unknown log level '{level}'")))
}

fn validate(settings: &LoggerSettings, name: &str) -> Result<(), LoggerError> {
    if name.trim().is_empty() {
        return Err(LoggerError::invalid("Logger name cannot be empty"));
    }
    if settings.path.is_some() && settings.max_files == 0 {
        return Err(LoggerError::invalid("max_files must be greater than zero"));
    }
    Ok(())
}

fn build_env_filter(settings: &LoggerSettings) -> Result<EnvFilter, LoggerError> {
    let builder = EnvFilter::builder().with_default_directive(settings.level.into());
    settings.env_filter.as_ref().map_or_else(
        || Ok(builder.from_env_lossy()),
        |filter| {
            builder
                .parse(filter)
                .map_err(|e| LoggerError::invalid(format!("Invalid env filter '{filter}': {e}")))
        },
    )
}
