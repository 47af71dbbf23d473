use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub database_url: String,
    pub auth_domain: String,
    pub identity_ttl: Duration,
    pub identity_purge_interval: Duration,
    pub provider_timeout: Duration,
    pub feed_default_limit: u32,
    pub feed_max_limit: u32,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Photo sharing feed backend")]
pub struct Args {
    /// Host to bind to (overrides PHOTOTRAIL_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PHOTOTRAIL_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding the database and images (overrides PHOTOTRAIL_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Database URL (overrides PHOTOTRAIL_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Identity provider base URL (overrides PHOTOTRAIL_AUTH_DOMAIN)
    #[arg(long)]
    pub auth_domain: Option<String>,

    /// Seconds a verified credential stays cached (overrides PHOTOTRAIL_IDENTITY_TTL_SECS)
    #[arg(long)]
    pub identity_ttl_secs: Option<u64>,

    /// Seconds between sweeps of expired credentials (overrides PHOTOTRAIL_IDENTITY_PURGE_SECS)
    #[arg(long)]
    pub identity_purge_secs: Option<u64>,

    /// Timeout for identity provider calls (overrides PHOTOTRAIL_PROVIDER_TIMEOUT_SECS)
    #[arg(long)]
    pub provider_timeout_secs: Option<u64>,

    /// Feed page size when none is requested (overrides PHOTOTRAIL_FEED_DEFAULT_LIMIT)
    #[arg(long)]
    pub feed_default_limit: Option<u32>,

    /// Largest feed page served (overrides PHOTOTRAIL_FEED_MAX_LIMIT)
    #[arg(long)]
    pub feed_max_limit: Option<u32>,

    /// Largest accepted image upload in bytes (overrides PHOTOTRAIL_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name` from the environment, parsing it, or fall back to `default`.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    fn merge(args: Args) -> Result<Self> {
        let data_dir = match args.data_dir {
            Some(dir) => dir,
            None => env_or("PHOTOTRAIL_DATA_DIR", "./data".to_string())?,
        };
        let default_db = format!(
            "sqlite://{}",
            PathBuf::from(&data_dir).join("database.sqlite").display()
        );

        let cfg = Self {
            host: args
                .host
                .map_or_else(|| env_or("PHOTOTRAIL_HOST", "localhost".to_string()), Ok)?,
            port: args.port.map_or_else(|| env_or("PHOTOTRAIL_PORT", 1117), Ok)?,
            database_url: args
                .database_url
                .map_or_else(|| env_or("PHOTOTRAIL_DATABASE_URL", default_db), Ok)?,
            auth_domain: args
                .auth_domain
                .map_or_else(|| env_or("PHOTOTRAIL_AUTH_DOMAIN", String::new()), Ok)?,
            identity_ttl: Duration::from_secs(
                args.identity_ttl_secs
                    .map_or_else(|| env_or("PHOTOTRAIL_IDENTITY_TTL_SECS", 60), Ok)?,
            ),
            identity_purge_interval: Duration::from_secs(
                args.identity_purge_secs
                    .map_or_else(|| env_or("PHOTOTRAIL_IDENTITY_PURGE_SECS", 120), Ok)?
                    .max(1),
            ),
            provider_timeout: Duration::from_secs(
                args.provider_timeout_secs
                    .map_or_else(|| env_or("PHOTOTRAIL_PROVIDER_TIMEOUT_SECS", 10), Ok)?,
            ),
            feed_default_limit: args
                .feed_default_limit
                .map_or_else(|| env_or("PHOTOTRAIL_FEED_DEFAULT_LIMIT", 20), Ok)?,
            feed_max_limit: args
                .feed_max_limit
                .map_or_else(|| env_or("PHOTOTRAIL_FEED_MAX_LIMIT", 100), Ok)?,
            max_upload_bytes: args
                .max_upload_bytes
                .map_or_else(|| env_or("PHOTOTRAIL_MAX_UPLOAD_BYTES", 10 * 1024 * 1024), Ok)?,
            data_dir,
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Root directory of the blob store.
    pub fn images_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("images")
    }
}
