//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CacheOverrides, CheckArgs, CliArgs, Command, DatabaseOverride, LoggingOverrides, MigrateArgs,
    RuntimeOverrides, SeedArgs,
};

use std::{
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, PageSizePolicy};
use crate::cache::defaults as cache_defaults;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pressroom";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DB_QUERY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";
const DEFAULT_REDIS_POOL_SIZE: u32 = 16;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub pagination: PaginationSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
    pub query_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Redis,
    Memory,
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown cache backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    pub redis_url: String,
    pub redis_pool_size: NonZeroU32,
    pub namespace: String,
    pub list_ttl: Duration,
    pub detail_ttl: Duration,
    pub cooldown: Duration,
    pub op_timeout: Duration,
    pub memory_capacity: NonZeroUsize,
}

#[derive(Debug, Clone, Copy)]
pub struct PaginationSettings {
    pub default_page_size: NonZeroU32,
    pub max_page_size: NonZeroU32,
}

impl PaginationSettings {
    pub fn policy(&self) -> PageSizePolicy {
        PageSizePolicy {
            default_size: self.default_page_size.get(),
            max_size: self.max_page_size.get(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PRESSROOM").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Migrate(args)) => {
            raw.apply_database_override(&args.database);
            raw.apply_logging_overrides(&args.logging);
        }
        Some(Command::Seed(args)) => raw.apply_runtime_overrides(&args.overrides),
        Some(Command::Check(args)) => raw.apply_runtime_overrides(&args.overrides),
        None => {}
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    pagination: RawPaginationSettings,
}

impl RawSettings {
    fn apply_runtime_overrides(&mut self, overrides: &RuntimeOverrides) {
        self.apply_database_override(&overrides.database);
        self.apply_cache_overrides(&overrides.cache);
        self.apply_logging_overrides(&overrides.logging);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            pagination,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;
        let pagination = build_pagination_settings(pagination)?;

        Ok(Self {
            logging,
            database,
            cache,
            pagination,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;
    let acquire_timeout = positive_millis(
        database
            .acquire_timeout_ms
            .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_MS),
        "database.acquire_timeout_ms",
    )?;
    let query_timeout = positive_millis(
        database
            .query_timeout_ms
            .unwrap_or(DEFAULT_DB_QUERY_TIMEOUT_MS),
        "database.query_timeout_ms",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout,
        query_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => CacheBackendKind::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackendKind::Redis,
    };

    let redis_url = cache
        .redis_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());

    let namespace = cache
        .namespace
        .unwrap_or_else(|| cache_defaults::NAMESPACE.to_string());
    let namespace = namespace.trim();
    if namespace.is_empty() {
        return Err(LoadError::invalid("cache.namespace", "must not be empty"));
    }
    if namespace.contains(char::is_whitespace) || namespace.contains(['*', '?', '[', ']']) {
        return Err(LoadError::invalid(
            "cache.namespace",
            "must not contain whitespace or glob characters",
        ));
    }

    let list_ttl_secs = ttl_seconds(
        cache.list_ttl_seconds.unwrap_or(cache_defaults::LIST_TTL_SECS),
        "cache.list_ttl_seconds",
    )?;
    let detail_ttl_secs = ttl_seconds(
        cache
            .detail_ttl_seconds
            .unwrap_or(cache_defaults::DETAIL_TTL_SECS),
        "cache.detail_ttl_seconds",
    )?;
    if list_ttl_secs >= detail_ttl_secs {
        return Err(LoadError::invalid(
            "cache.list_ttl_seconds",
            format!("must be shorter than cache.detail_ttl_seconds ({detail_ttl_secs})"),
        ));
    }

    let cooldown = positive_millis(
        cache.cooldown_ms.unwrap_or(cache_defaults::COOLDOWN_MS),
        "cache.cooldown_ms",
    )?;
    let op_timeout = positive_millis(
        cache.op_timeout_ms.unwrap_or(cache_defaults::OP_TIMEOUT_MS),
        "cache.op_timeout_ms",
    )?;

    let redis_pool_size = non_zero_u32(
        cache
            .redis_pool_size
            .unwrap_or(DEFAULT_REDIS_POOL_SIZE)
            .into(),
        "cache.redis_pool_size",
    )?;

    let capacity = match cache.memory_capacity {
        Some(value) => usize::try_from(value).ok(),
        None => Some(cache_defaults::MEMORY_CAPACITY),
    };
    let memory_capacity = capacity
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid("cache.memory_capacity", "must be a positive entry count")
        })?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        backend,
        redis_url,
        redis_pool_size,
        namespace: namespace.to_string(),
        list_ttl: Duration::from_secs(list_ttl_secs),
        detail_ttl: Duration::from_secs(detail_ttl_secs),
        cooldown,
        op_timeout,
        memory_capacity,
    })
}

fn build_pagination_settings(
    pagination: RawPaginationSettings,
) -> Result<PaginationSettings, LoadError> {
    let default_page_size = non_zero_u32(
        pagination
            .default_page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .into(),
        "pagination.default_page_size",
    )?;
    let max_page_size = non_zero_u32(
        pagination.max_page_size.unwrap_or(MAX_PAGE_SIZE).into(),
        "pagination.max_page_size",
    )?;
    if default_page_size > max_page_size {
        return Err(LoadError::invalid(
            "pagination.default_page_size",
            format!("must not exceed pagination.max_page_size ({max_page_size})"),
        ));
    }

    Ok(PaginationSettings {
        default_page_size,
        max_page_size,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
    query_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<String>,
    redis_url: Option<String>,
    redis_pool_size: Option<u32>,
    namespace: Option<String>,
    list_ttl_seconds: Option<u64>,
    detail_ttl_seconds: Option<u64>,
    cooldown_ms: Option<u64>,
    op_timeout_ms: Option<u64>,
    memory_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPaginationSettings {
    default_page_size: Option<u32>,
    max_page_size: Option<u32>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn ttl_seconds(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    if value > cache_defaults::MAX_TTL_SECS {
        return Err(LoadError::invalid(
            key,
            format!(
                "must not exceed {} seconds (30 days)",
                cache_defaults::MAX_TTL_SECS
            ),
        ));
    }
    Ok(value)
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
