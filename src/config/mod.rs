//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use self::cli::{CliArgs, Command, InvalidateArgs, ServeArgs, ServeOverrides, StoreArgs};

use crate::cache::{InvalidationMode, OverflowPolicy, PolicyError, StalenessPolicy};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quire";
const ENV_PREFIX: &str = "QUIRE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_SCAN_COUNT: u64 = 500;
const DEFAULT_LOCK_TTL_SECS: u64 = 10;
const DEFAULT_REFRESH_WORKERS: u64 = 4;
const DEFAULT_REFRESH_QUEUE_CAPACITY: u64 = 256;
const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub source: SourceSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Which key-value backend to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Redis when a URL is set, otherwise memory in development and disabled in production.
    Auto,
    Redis,
    Memory,
    Disabled,
}

impl FromStr for StoreMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            "disabled" | "none" => Ok(Self::Disabled),
            other => Err(format!(
                "unknown store mode `{other}` (expected auto|redis|memory|disabled)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnvironment {
    Development,
    Production,
}

impl FromStr for RuntimeEnvironment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!(
                "unknown environment `{other}` (expected development|production)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub mode: StoreMode,
    pub url: Option<String>,
    pub environment: RuntimeEnvironment,
    /// `COUNT` hint for prefix scans.
    pub scan_count: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Key namespace; `None` uses the content source's id.
    pub namespace: Option<String>,
    pub post_policy: StalenessPolicy,
    pub list_policy: StalenessPolicy,
    pub tags_policy: StalenessPolicy,
    pub lock_ttl: Duration,
    pub refresh_workers: NonZeroUsize,
    pub refresh_queue_capacity: NonZeroUsize,
    pub refresh_overflow: OverflowPolicy,
    pub invalidation_mode: InvalidationMode,
    pub legacy_list_prefixes: Vec<String>,
    pub single_flight_misses: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Ghost,
    Strapi,
    Memory,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ghost" => Ok(Self::Ghost),
            "strapi" => Ok(Self::Strapi),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown source kind `{other}` (expected ghost|strapi|memory)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// Required for every kind except `memory`.
    pub base_url: Option<Url>,
    pub api_key: Option<String>,
    pub timeout: Duration,
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

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.legacy_list_prefixes")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Invalidate(args)) => raw.apply_store_overrides(&args.store),
        Some(Command::Purge(args)) => raw.apply_store_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
    source: RawSourceSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(mode) = overrides.store_mode.as_ref() {
            self.store.mode = Some(mode.clone());
        }
        if let Some(kind) = overrides.source_kind.as_ref() {
            self.source.kind = Some(kind.clone());
        }
        if let Some(url) = overrides.source_base_url.as_ref() {
            self.source.base_url = Some(url.clone());
        }
        if let Some(workers) = overrides.cache_refresh_workers {
            self.cache.refresh_workers = Some(workers);
        }
        if let Some(capacity) = overrides.cache_refresh_queue_capacity {
            self.cache.refresh_queue_capacity = Some(capacity);
        }
        if let Some(enabled) = overrides.cache_single_flight_misses {
            self.cache.single_flight_misses = Some(enabled);
        }

        self.apply_store_overrides(&overrides.store);
    }

    fn apply_store_overrides(&mut self, overrides: &StoreArgs) {
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
        if let Some(namespace) = overrides.cache_namespace.as_ref() {
            self.cache.namespace = Some(namespace.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            cache,
            source,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let store = build_store_settings(store)?;
        let cache = build_cache_settings(cache)?;
        let source = build_source_settings(source)?;

        Ok(Self {
            server,
            logging,
            store,
            cache,
            source,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
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

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let mode = match store.mode {
        Some(mode) => {
            StoreMode::from_str(&mode).map_err(|reason| LoadError::invalid("store.mode", reason))?
        }
        None => StoreMode::Auto,
    };

    let url = non_blank(store.url);
    if mode == StoreMode::Redis && url.is_none() {
        return Err(LoadError::invalid(
            "store.url",
            "a URL is required when store.mode is `redis`",
        ));
    }

    let environment = match store.environment {
        Some(environment) => RuntimeEnvironment::from_str(&environment)
            .map_err(|reason| LoadError::invalid("store.environment", reason))?,
        None => RuntimeEnvironment::Development,
    };

    let scan_count = non_zero_usize(
        store.scan_count.unwrap_or(DEFAULT_SCAN_COUNT),
        "store.scan_count",
    )?;

    Ok(StoreSettings {
        mode,
        url,
        environment,
        scan_count,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let namespace = non_blank(cache.namespace);
    if let Some(namespace) = namespace.as_deref()
        && namespace.contains(':')
    {
        return Err(LoadError::invalid(
            "cache.namespace",
            "must not contain `:`",
        ));
    }

    let post_policy = build_policy(
        cache.post_ttl_seconds,
        cache.post_stale_after_seconds,
        StalenessPolicy::POST,
        ("cache.post_ttl_seconds", "cache.post_stale_after_seconds"),
    )?;
    let list_policy = build_policy(
        cache.list_ttl_seconds,
        cache.list_stale_after_seconds,
        StalenessPolicy::LIST,
        ("cache.list_ttl_seconds", "cache.list_stale_after_seconds"),
    )?;
    let tags_policy = build_policy(
        cache.tags_ttl_seconds,
        cache.tags_stale_after_seconds,
        StalenessPolicy::TAGS,
        ("cache.tags_ttl_seconds", "cache.tags_stale_after_seconds"),
    )?;

    let lock_ttl_secs = cache.lock_ttl_seconds.unwrap_or(DEFAULT_LOCK_TTL_SECS);
    if lock_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.lock_ttl_seconds",
            "must be greater than zero",
        ));
    }

    let refresh_workers = non_zero_usize(
        cache.refresh_workers.unwrap_or(DEFAULT_REFRESH_WORKERS),
        "cache.refresh_workers",
    )?;
    let refresh_queue_capacity = non_zero_usize(
        cache
            .refresh_queue_capacity
            .unwrap_or(DEFAULT_REFRESH_QUEUE_CAPACITY),
        "cache.refresh_queue_capacity",
    )?;

    let legacy_list_prefixes = cache
        .legacy_list_prefixes
        .unwrap_or_default()
        .into_iter()
        .filter_map(|prefix| non_blank(Some(prefix)))
        .collect();

    Ok(CacheSettings {
        namespace,
        post_policy,
        list_policy,
        tags_policy,
        lock_ttl: Duration::from_secs(lock_ttl_secs),
        refresh_workers,
        refresh_queue_capacity,
        refresh_overflow: cache.refresh_overflow.unwrap_or(OverflowPolicy::DropOldest),
        invalidation_mode: cache.invalidation_mode.unwrap_or(InvalidationMode::Filter),
        legacy_list_prefixes,
        single_flight_misses: cache.single_flight_misses.unwrap_or(false),
    })
}

fn build_policy(
    ttl_seconds: Option<u64>,
    stale_after_seconds: Option<u64>,
    default: StalenessPolicy,
    keys: (&'static str, &'static str),
) -> Result<StalenessPolicy, LoadError> {
    let ttl = ttl_seconds.unwrap_or(default.ttl().as_secs());
    let stale_after = stale_after_seconds.unwrap_or(default.stale_after().as_secs());
    StalenessPolicy::from_secs(ttl, stale_after).map_err(|err| match err {
        PolicyError::ZeroTtl => LoadError::invalid(keys.0, err.to_string()),
        _ => LoadError::invalid(keys.1, err.to_string()),
    })
}

fn build_source_settings(source: RawSourceSettings) -> Result<SourceSettings, LoadError> {
    let kind = match source.kind {
        Some(kind) => {
            SourceKind::from_str(&kind).map_err(|reason| LoadError::invalid("source.kind", reason))?
        }
        None => SourceKind::Memory,
    };

    let base_url = match non_blank(source.base_url) {
        Some(raw) => Some(
            Url::parse(&raw)
                .map_err(|err| LoadError::invalid("source.base_url", err.to_string()))?,
        ),
        None => None,
    };
    if kind != SourceKind::Memory && base_url.is_none() {
        return Err(LoadError::invalid(
            "source.base_url",
            "required for ghost and strapi sources",
        ));
    }

    let timeout_secs = source.timeout_seconds.unwrap_or(DEFAULT_SOURCE_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "source.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(SourceSettings {
        kind,
        base_url,
        api_key: non_blank(source.api_key),
        timeout: Duration::from_secs(timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    mode: Option<String>,
    url: Option<String>,
    environment: Option<String>,
    scan_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    namespace: Option<String>,
    post_ttl_seconds: Option<u64>,
    post_stale_after_seconds: Option<u64>,
    list_ttl_seconds: Option<u64>,
    list_stale_after_seconds: Option<u64>,
    tags_ttl_seconds: Option<u64>,
    tags_stale_after_seconds: Option<u64>,
    lock_ttl_seconds: Option<u64>,
    refresh_workers: Option<u64>,
    refresh_queue_capacity: Option<u64>,
    refresh_overflow: Option<OverflowPolicy>,
    invalidation_mode: Option<InvalidationMode>,
    legacy_list_prefixes: Option<Vec<String>>,
    single_flight_misses: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSourceSettings {
    kind: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
