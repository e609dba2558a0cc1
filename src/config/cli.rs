use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the pressroom binary.
#[derive(Debug, Parser)]
#[command(
    name = "pressroom",
    version,
    about = "Batched, cache-backed article store tooling"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRESSROOM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate(MigrateArgs),
    /// Populate the store with a generated dataset.
    Seed(SeedArgs),
    /// Probe the store and cache, then print content totals and cache state.
    Check(CheckArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
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
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Toggle the read-through cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache backend (redis|memory).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub cache: CacheOverrides,

    #[command(flatten)]
    pub logging: LoggingOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub logging: LoggingOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SeedArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,

    /// Generate the small dataset (10 authors, 100 articles).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub small: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,
}
