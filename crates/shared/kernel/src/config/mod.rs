use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Prefix for environment overrides, e.g. `EVBUS__BUS__BACKEND=nats`.
pub const ENV_PREFIX: &str = "EVBUS";

/// Base name of the optional config file looked up when no path is given.
pub const DEFAULT_CONFIG_NAME: &str = "evbus";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}

impl From<config::ConfigError> for ConfigError {
    fn from(source: config::ConfigError) -> Self {
        Self::Config { source, context: None }
    }
}

trait ConfigResultExt<T> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, ConfigError>;
}

impl<T> ConfigResultExt<T> for Result<T, config::ConfigError> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, ConfigError> {
        self.map_err(|source| ConfigError::Config { source, context: Some(context.into()) })
    }
}

/// Loads a configuration object from a file overlaid with environment variables.
///
/// Layers, lowest priority first:
/// 1. **File**: the given path (required when provided). Without a path, an optional
///    `evbus.{toml,json,yaml}` in the working directory is used if present.
/// 2. **Environment**: variables prefixed with `EVBUS__`; nested keys are separated by
///    double underscores (`EVBUS__BUS__REDIS__URL` maps to `bus.redis.url`).
///
/// Missing keys fall back to the `Default` of `T` when its fields use `#[serde(default)]`.
///
/// # Errors
/// Returns [`ConfigError`] when an explicitly given file is missing or unreadable,
/// or when the merged sources do not deserialize into `T`.
///
/// # Example
/// ```rust
/// use evbus_kernel::config::load_config;
///
/// #[derive(Default, serde::Deserialize)]
/// #[serde(default)]
/// struct Settings {
///     inbox: usize,
/// }
///
/// let cfg: Settings = load_config(None::<&str>).unwrap_or_default();
/// # let _ = cfg.inbox;
/// ```
pub fn load_config<T>(path: Option<impl AsRef<Path>>) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    load_layered(path, None)
}

/// Same layering as [`load_config`], but reads overrides from `vars` instead of the
/// process environment. Keys use the same `EVBUS__A__B` form.
///
/// # Errors
/// See [`load_config`].
pub fn load_config_with_env<T>(
    path: Option<impl AsRef<Path>>,
    vars: HashMap<String, String>,
) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    load_layered(path, Some(vars))
}

fn load_layered<T>(
    path: Option<impl AsRef<Path>>,
    vars: Option<HashMap<String, String>>,
) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    let file = match path.as_ref() {
        Some(p) => {
            info!(path = %p.as_ref().display(), "Loading config");
            File::from(p.as_ref()).required(true)
        },
        None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
    };

    let config = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .convert_case(config::Case::Snake)
                .source(vars),
        )
        .build()
        .context("Failed to build config")?
        .try_deserialize::<T>()
        .context("Failed to deserialize config")?;

    Ok(config)
}
