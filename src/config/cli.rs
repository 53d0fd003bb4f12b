use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the quire binary.
#[derive(Debug, Parser)]
#[command(
    name = "quire",
    version,
    about = "Stale-while-revalidate cache in front of a headless blog CMS"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUIRE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public and admin HTTP listeners.
    Serve(Box<ServeArgs>),
    /// Scrub one slug from every cached list and drop its detail entries.
    Invalidate(InvalidateArgs),
    /// Delete every key in the cache namespace.
    Purge(StoreArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Slug of the removed or edited item.
    #[arg(value_name = "SLUG")]
    pub slug: String,
}

/// Store overrides shared by the maintenance commands.
#[derive(Debug, Args, Default, Clone)]
pub struct StoreArgs {
    /// Override the key-value store URL.
    #[arg(long = "store-url", value_name = "URL")]
    pub store_url: Option<String>,

    /// Override the cache key namespace.
    #[arg(long = "cache-namespace", value_name = "NAME")]
    pub cache_namespace: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the store mode (auto|redis|memory|disabled).
    #[arg(long = "store-mode", value_name = "MODE")]
    pub store_mode: Option<String>,

    /// Override the content source kind (ghost|strapi|memory).
    #[arg(long = "source-kind", value_name = "KIND")]
    pub source_kind: Option<String>,

    /// Override the content source base URL.
    #[arg(long = "source-base-url", value_name = "URL")]
    pub source_base_url: Option<String>,

    /// Override the refresh worker count.
    #[arg(long = "cache-refresh-workers", value_name = "COUNT")]
    pub cache_refresh_workers: Option<u64>,

    /// Override the refresh queue capacity.
    #[arg(long = "cache-refresh-queue-capacity", value_name = "COUNT")]
    pub cache_refresh_queue_capacity: Option<u64>,

    /// Share one upstream fetch between concurrent misses.
    #[arg(
        long = "cache-single-flight-misses",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_single_flight_misses: Option<bool>,
}
