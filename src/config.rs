use std::net::IpAddr;
use std::time::Duration;

use crate::sync::DuplicateDetector;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub upstream: UpstreamConfig,
    pub sync: SyncSettings,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_token: String,
    pub tenant_id: String,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Attempts after which an action is parked as `failed`.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Pause between actions within one drain.
    pub inter_action_delay: Duration,
    /// Fallback drain trigger for missed connectivity transitions.
    pub sync_interval: Duration,
    pub status_poll_interval: Duration,
    pub probe_interval: Duration,
    pub duplicates: DuplicateDetector,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            inter_action_delay: Duration::from_millis(100),
            sync_interval: Duration::from_secs(30),
            status_poll_interval: Duration::from_secs(5),
            probe_interval: Duration::from_secs(10),
            duplicates: DuplicateDetector::default(),
        }
    }
}

impl SyncSettings {
    /// `base_delay * 2^retry_count`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry_count))
    }

    /// Reject values the background loops cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err("CELLARSYNC_MAX_RETRIES must be at least 1".to_string());
        }
        for (key, interval) in [
            ("CELLARSYNC_SYNC_INTERVAL_SECS", self.sync_interval),
            ("CELLARSYNC_STATUS_POLL_SECS", self.status_poll_interval),
            ("CELLARSYNC_PROBE_INTERVAL_SECS", self.probe_interval),
        ] {
            if interval.is_zero() {
                return Err(format!("{key} must be at least 1"));
            }
        }
        Ok(())
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_or("DATABASE_URL", "sqlite://cellarsync.db?mode=rwc");

        let host: IpAddr = env_or("CELLARSYNC_HOST", "127.0.0.1")
            .parse()
            .map_err(|e| format!("Invalid CELLARSYNC_HOST: {e}"))?;

        let port: u16 = env_or("CELLARSYNC_PORT", "4100")
            .parse()
            .map_err(|e| format!("Invalid CELLARSYNC_PORT: {e}"))?;

        let upstream = UpstreamConfig {
            base_url: env_required("CELLARSYNC_UPSTREAM_URL")?,
            api_token: env_required("CELLARSYNC_API_TOKEN")?,
            tenant_id: env_required("CELLARSYNC_TENANT_ID")?,
        };

        if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://") {
            return Err("CELLARSYNC_UPSTREAM_URL must start with http:// or https://".to_string());
        }

        let signatures: Vec<String> = env_or("CELLARSYNC_DUPLICATE_SIGNATURES", "already exists,duplicate")
            .split(',')
            .map(|s| s.to_string())
            .collect();
        let duplicates = DuplicateDetector::from_signatures(&signatures)
            .map_err(|e| format!("Invalid CELLARSYNC_DUPLICATE_SIGNATURES: {e}"))?;

        let sync = SyncSettings {
            max_retries: env_parse("CELLARSYNC_MAX_RETRIES", 3)?,
            base_delay: Duration::from_millis(env_parse("CELLARSYNC_BASE_DELAY_MS", 1000)?),
            inter_action_delay: Duration::from_millis(env_parse(
                "CELLARSYNC_INTER_ACTION_DELAY_MS",
                100,
            )?),
            sync_interval: Duration::from_secs(env_parse("CELLARSYNC_SYNC_INTERVAL_SECS", 30)?),
            status_poll_interval: Duration::from_secs(env_parse("CELLARSYNC_STATUS_POLL_SECS", 5)?),
            probe_interval: Duration::from_secs(env_parse("CELLARSYNC_PROBE_INTERVAL_SECS", 10)?),
            duplicates,
        };

        sync.validate()?;

        let log_level = env_or("CELLARSYNC_LOG_LEVEL", "info");

        Ok(Config {
            database_url,
            host,
            port,
            upstream,
            sync,
            log_level,
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| format!("Invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}
