//! Worker configuration
//!
//! Values come from the environment (optionally seeded from a `.env` file) and fall back to
//! the defaults below, which target a local development setup.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_BROKER_SPOOL_DIR: &str = "./var/queues";
/// Unsettled deliveries granted to one consumer.
pub const DEFAULT_BROKER_PREFETCH: usize = 1;

pub const DEFAULT_DOCUMENT_STORE_DIR: &str = "./var/jobs";

pub const DEFAULT_BLOB_STORE_HOST: &str = "127.0.0.1";
pub const DEFAULT_BLOB_STORE_PORT: u16 = 9000;
pub const DEFAULT_BLOB_STORE_USER: &str = "minioadmin";
pub const DEFAULT_BLOB_STORE_PASS: &str = "minioadmin";
pub const DEFAULT_BLOB_STORE_REGION: &str = "us-east-1";

/// Deliveries whose status cannot be recorded are retried this many times in total.
pub const DEFAULT_WORKER_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_WORKER_POLL_INTERVAL_MS: u64 = 500;
/// Shrink ratio for clean jobs that do not carry one.
pub const DEFAULT_WORKER_MAX_SHRINK: f64 = 0.2;
/// Set to 5 minutes to accommodate large source downloads.
pub const DEFAULT_WORKER_FETCH_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub document_store: DocumentStoreConfig,
    pub blob_store: BlobStoreConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub spool_dir: PathBuf,
    pub prefetch: usize,
}

#[derive(Debug, Clone)]
pub struct DocumentStoreConfig {
    pub dir: PathBuf,
}

#[derive(Clone)]
pub struct BlobStoreConfig {
    pub host: String,
    pub port: u16,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl BlobStoreConfig {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for BlobStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_attempts: u32,
    pub poll_interval_ms: u64,
    pub default_max_shrink: f64,
    pub fetch_timeout_secs: u64,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

fn text(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let lookup = &lookup;
        let config = Config {
            broker: BrokerConfig {
                spool_dir: text(lookup, "BROKER_SPOOL_DIR", DEFAULT_BROKER_SPOOL_DIR).into(),
                prefetch: parsed(lookup, "BROKER_PREFETCH", DEFAULT_BROKER_PREFETCH)?,
            },
            document_store: DocumentStoreConfig {
                dir: text(lookup, "DOCUMENT_STORE_DIR", DEFAULT_DOCUMENT_STORE_DIR).into(),
            },
            blob_store: BlobStoreConfig {
                host: text(lookup, "BLOB_STORE_HOST", DEFAULT_BLOB_STORE_HOST),
                port: parsed(lookup, "BLOB_STORE_PORT", DEFAULT_BLOB_STORE_PORT)?,
                access_key: text(lookup, "BLOB_STORE_USER", DEFAULT_BLOB_STORE_USER),
                secret_key: text(lookup, "BLOB_STORE_PASS", DEFAULT_BLOB_STORE_PASS),
                region: text(lookup, "BLOB_STORE_REGION", DEFAULT_BLOB_STORE_REGION),
            },
            worker: WorkerConfig {
                max_attempts: parsed(lookup, "WORKER_MAX_ATTEMPTS", DEFAULT_WORKER_MAX_ATTEMPTS)?,
                poll_interval_ms: parsed(lookup, "WORKER_POLL_INTERVAL_MS", DEFAULT_WORKER_POLL_INTERVAL_MS)?,
                default_max_shrink: parsed(lookup, "WORKER_DEFAULT_MAX_SHRINK", DEFAULT_WORKER_MAX_SHRINK)?,
                fetch_timeout_secs: parsed(
                    lookup,
                    "WORKER_FETCH_TIMEOUT_SECS",
                    DEFAULT_WORKER_FETCH_TIMEOUT_SECS,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.broker.prefetch == 0 {
            bail!("BROKER_PREFETCH must be at least 1");
        }
        if self.worker.max_attempts == 0 {
            bail!("WORKER_MAX_ATTEMPTS must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.worker.default_max_shrink) {
            bail!(
                "WORKER_DEFAULT_MAX_SHRINK must be within [0, 1], got {}",
                self.worker.default_max_shrink
            );
        }
        if self.blob_store.host.trim().is_empty() {
            bail!("BLOB_STORE_HOST must not be empty");
        }
        Ok(())
    }
}
