use std::net::Ipv4Addr;
use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use ipnet::Ipv4Net;
use serde::Deserialize;

/// Frozen service configuration, constructed once at boot and passed to
/// components explicitly.
///
/// Values come from defaults, an optional `config/ingestor.toml`, and the
/// environment (unprefixed, so `WORKER_COUNT=8` or `TELEGRAM_PHONE=...`
/// bind directly).
#[derive(Debug, Clone, Deserialize)]
pub struct IngestorConfig {
    /// Identity for session authentication.
    pub telegram_phone: String,
    pub telegram_api_id: i32,
    pub telegram_api_hash: String,
    /// Comma-separated channel identifiers (usernames or numeric ids).
    pub telegram_channels: String,

    pub worker_count: usize,
    /// Defaults to `4 * worker_count` when unset.
    pub queue_capacity: Option<usize>,

    pub storage_path: PathBuf,
    /// Telegram session file; defaults to `<storage_path>/sessions/ingestor.session`.
    pub session_path: Option<PathBuf>,

    pub database_url: String,
    pub db_max_connections: u32,

    /// Comma-separated domain suffixes to mine for.
    pub ioc_domains: String,
    /// Comma-separated address suffixes (e.g. `@example.gov`).
    pub ioc_emails: String,
    /// Comma-separated CIDR ranges.
    pub ioc_ipv4_cidrs: String,

    pub max_decompressed_bytes: u64,
    pub max_decompression_ratio: u64,
    pub download_max_retries: u32,
    pub max_file_size_mb: u64,
    pub scan_max_line_bytes: usize,
    pub shutdown_grace_secs: u64,
    /// Health/metrics listen port; 0 disables the endpoint.
    pub health_port: u16,
}

impl IngestorConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("worker_count", 4_i64)?
            .set_default("storage_path", "./data/storage")?
            .set_default("db_max_connections", 10_i64)?
            .set_default("ioc_domains", "")?
            .set_default("ioc_emails", "")?
            .set_default("ioc_ipv4_cidrs", "")?
            .set_default("max_decompressed_bytes", 2_i64 * 1024 * 1024 * 1024)?
            .set_default("max_decompression_ratio", 100_i64)?
            .set_default("download_max_retries", 5_i64)?
            .set_default("max_file_size_mb", 100_i64)?
            .set_default("scan_max_line_bytes", 64_i64 * 1024)?
            .set_default("shutdown_grace_secs", 30_i64)?
            .set_default("health_port", 8080_i64)?
            .add_source(File::with_name("config/ingestor").required(false))
            .add_source(Environment::default().try_parsing(true))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity checks beyond what deserialization enforces. Any failure here
    /// is fatal at boot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Message("worker_count must be positive".into()));
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::Message("queue_capacity must be positive".into()));
        }
        if self.channels().is_empty() {
            return Err(ConfigError::Message(
                "telegram_channels must name at least one channel".into(),
            ));
        }
        if self.max_decompressed_bytes == 0 {
            return Err(ConfigError::Message(
                "max_decompressed_bytes must be positive".into(),
            ));
        }
        if self.max_decompression_ratio == 0 {
            return Err(ConfigError::Message(
                "max_decompression_ratio must be positive".into(),
            ));
        }
        // Surface bad CIDRs at boot rather than at first scan.
        self.ipv4_cidrs()?;
        Ok(())
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.worker_count * 4)
    }

    pub fn channels(&self) -> Vec<String> {
        split_list(&self.telegram_channels)
    }

    pub fn domain_suffixes(&self) -> Vec<String> {
        split_list(&self.ioc_domains)
            .into_iter()
            .map(|d| d.to_ascii_lowercase())
            .collect()
    }

    /// Address suffixes normalized to start with `@`.
    pub fn email_suffixes(&self) -> Vec<String> {
        split_list(&self.ioc_emails)
            .into_iter()
            .map(|e| {
                let e = e.to_ascii_lowercase();
                if e.starts_with('@') { e } else { format!("@{e}") }
            })
            .collect()
    }

    pub fn ipv4_cidrs(&self) -> Result<Vec<Ipv4Net>, ConfigError> {
        split_list(&self.ioc_ipv4_cidrs)
            .into_iter()
            .map(|c| {
                // Accept both "10.0.0.0/8" and a bare address as a /32.
                if let Ok(net) = c.parse::<Ipv4Net>() {
                    Ok(net)
                } else if let Ok(addr) = c.parse::<Ipv4Addr>() {
                    Ipv4Net::new(addr, 32)
                        .map_err(|e| ConfigError::Message(format!("invalid CIDR range {c}: {e}")))
                } else {
                    Err(ConfigError::Message(format!("invalid CIDR range: {c}")))
                }
            })
            .collect()
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn session_path(&self) -> PathBuf {
        self.session_path
            .clone()
            .unwrap_or_else(|| self.storage_path.join("sessions").join("ingestor.session"))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
