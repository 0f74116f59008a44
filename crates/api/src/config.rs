//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use delivery::{ErpConnection, SchedulerConfig, WorkerConfig};
use registry::{BackoffPolicy, DestinationPolicy, QueuePolicy};

/// Server and worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs on in-memory stores
/// - `WEBHOOK_CATEGORY`: event category the webhook pipeline streams (default `"document.events"`)
/// - `TICK_INTERVAL_SECS` (5), `CLAIM_LIMIT` (10), `BATCH_SIZE` (100), `SEND_TIMEOUT_SECS` (15)
/// - `CLAIM_TTL_SECS` (60): raised to the send timeout plus twice the lease margin when shorter
/// - `BACKOFF_BASE_SECS` (30), `BACKOFF_CAP_EXPONENT` (6), `BACKOFF_MAX_SECS` (3600)
/// - `ERP_ENDPOINT`, `ERP_SECRET`: the ERP pipeline only runs when both are set
/// - `ERP_MAX_RETRIES` (5)
///
/// Unparseable values, and zero counts or limits, fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub webhook_category: String,
    pub tick_interval: Duration,
    pub claim_limit: usize,
    pub batch_size: usize,
    pub send_timeout: Duration,
    pub claim_ttl: Duration,
    pub backoff_base: Duration,
    pub backoff_cap_exponent: u32,
    pub backoff_max: Duration,
    pub erp_endpoint: Option<String>,
    pub erp_secret: String,
    pub erp_max_retries: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: Duration| {
            parse::<u64>(&lookup, key)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let count = |key: &str, default: usize| {
            parse::<usize>(&lookup, key)
                .filter(|n| *n > 0)
                .unwrap_or(default)
        };
        let send_timeout = secs("SEND_TIMEOUT_SECS", defaults.send_timeout);
        let min_claim_ttl =
            WorkerConfig::min_claim_ttl(send_timeout, WorkerConfig::default().lease_margin);

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: non_empty("DATABASE_URL"),
            webhook_category: non_empty("WEBHOOK_CATEGORY").unwrap_or(defaults.webhook_category),
            tick_interval: secs("TICK_INTERVAL_SECS", defaults.tick_interval),
            claim_limit: count("CLAIM_LIMIT", defaults.claim_limit),
            batch_size: count("BATCH_SIZE", defaults.batch_size),
            send_timeout,
            claim_ttl: secs("CLAIM_TTL_SECS", defaults.claim_ttl).max(min_claim_ttl),
            backoff_base: secs("BACKOFF_BASE_SECS", defaults.backoff_base),
            backoff_cap_exponent: parse(&lookup, "BACKOFF_CAP_EXPONENT")
                .unwrap_or(defaults.backoff_cap_exponent),
            backoff_max: secs("BACKOFF_MAX_SECS", defaults.backoff_max),
            erp_endpoint: non_empty("ERP_ENDPOINT"),
            erp_secret: non_empty("ERP_SECRET").unwrap_or(defaults.erp_secret),
            erp_max_retries: parse(&lookup, "ERP_MAX_RETRIES").unwrap_or(defaults.erp_max_retries),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base, self.backoff_cap_exponent, self.backoff_max)
    }

    pub fn destination_policy(&self) -> DestinationPolicy {
        DestinationPolicy {
            backoff: self.backoff(),
            claim_ttl: self.claim_ttl,
        }
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            backoff: self.backoff(),
            claim_ttl: self.claim_ttl,
            max_retries: self.erp_max_retries,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            claim_limit: self.claim_limit,
            send_timeout: self.send_timeout,
            claim_ttl: self.claim_ttl,
            ..WorkerConfig::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: self.tick_interval,
            ..SchedulerConfig::default()
        }
    }

    /// The ERP target, if an endpoint and a signing secret are both configured.
    pub fn erp_connection(&self) -> Option<ErpConnection> {
        if self.erp_secret.is_empty() {
            return None;
        }
        self.erp_endpoint.as_ref().map(|endpoint| ErpConnection {
            endpoint: endpoint.clone(),
            secret: self.erp_secret.clone(),
        })
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            webhook_category: "document.events".to_string(),
            tick_interval: Duration::from_secs(5),
            claim_limit: 10,
            batch_size: 100,
            send_timeout: Duration::from_secs(15),
            claim_ttl: Duration::from_secs(60),
            backoff_base: Duration::from_secs(30),
            backoff_cap_exponent: 6,
            backoff_max: Duration::from_secs(3600),
            erp_endpoint: None,
            erp_secret: String::new(),
            erp_max_retries: 5,
        }
    }
}
