use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::ledger::models::Currency;
use crate::queue::approval::QuorumPolicy;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    /// Absent means requests and batches live in memory only
    pub database_url: Option<String>,
    pub cors_origins: Vec<String>,
    pub ledger: LedgerConfig,
    pub queue: QueueConfig,
    pub drain: DrainConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    /// Base URL of the ledger service; absent means the simulated ledger is used
    pub url: Option<String>,
    pub timeout_secs: u64,
    /// Starting treasury balance per currency for the simulated ledger
    pub simulated_balances: HashMap<Currency, Decimal>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub max_request_amount: Decimal,
    pub max_attempts: u32,
    pub max_batch_size: usize,
    pub batch_schedule_delay_secs: i64,
    pub daily_caps: HashMap<Currency, Decimal>,
    pub quorum: QuorumPolicy,
    /// Group each drain pass's selection into batches
    pub assemble_on_drain: bool,
    /// Processing batches older than this are flagged for manual review
    pub stale_batch_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DrainConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub reconcile_interval_secs: u64,
    pub currencies: Vec<Currency>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            database_url: None,
            cors_origins: vec!["http://localhost:3000".to_string()],
            ledger: LedgerConfig::default(),
            queue: QueueConfig::default(),
            drain: DrainConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 30,
            simulated_balances: Currency::all()
                .into_iter()
                .map(|c| (c, dec!(10_000)))
                .collect(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_request_amount: dec!(1000),
            max_attempts: 3,
            max_batch_size: 50,
            batch_schedule_delay_secs: 300,
            daily_caps: HashMap::new(),
            quorum: QuorumPolicy::default(),
            assemble_on_drain: true,
            stale_batch_secs: 3600,
        }
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            reconcile_interval_secs: 600,
            currencies: vec![Currency::Gtt],
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 20,
            burst: 40,
        }
    }
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Defaults, then an optional `payout.toml`, then `PAYOUT__*` environment variables
    /// (`PAYOUT__QUEUE__MAX_BATCH_SIZE=20`). `DATABASE_URL` is honoured as a fallback.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("payout").required(false))
            .add_source(
                config::Environment::with_prefix("PAYOUT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors_origins")
                    .with_list_parse_key("drain.currencies"),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;

        if config.database_url.is_none() {
            config.database_url = std::env::var("DATABASE_URL").ok();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.queue.max_batch_size == 0 {
            return Err(config::ConfigError::Message(
                "queue.max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.queue.max_request_amount <= Decimal::ZERO {
            return Err(config::ConfigError::Message(
                "queue.max_request_amount must be positive".to_string(),
            ));
        }
        if self.ledger.timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "ledger.timeout_secs must be at least 1".to_string(),
            ));
        }
        // A shorter threshold would fail batches whose ledger call is still in flight
        if self.queue.stale_batch_secs <= self.ledger.timeout_secs as i64 {
            return Err(config::ConfigError::Message(
                "queue.stale_batch_secs must exceed ledger.timeout_secs".to_string(),
            ));
        }
        if self.rate_limit.requests_per_second == 0 {
            return Err(config::ConfigError::Message(
                "rate_limit.requests_per_second must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_queue_limits() {
        let config = Config::default();
        assert_eq!(config.queue.max_request_amount, dec!(1000));
        assert_eq!(config.queue.max_batch_size, 50);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.quorum, QuorumPolicy::default());
        assert_eq!(config.ledger.timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_overrides_keep_defaults() {
        let settings = config::Config::builder()
            .set_override("queue.max_batch_size", 10)
            .unwrap()
            .set_override("drain.currencies", vec!["ETH", "GTT"])
            .unwrap()
            .build()
            .unwrap();

        let config: Config = settings.try_deserialize().unwrap();
        assert_eq!(config.queue.max_batch_size, 10);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.drain.currencies, vec![Currency::Eth, Currency::Gtt]);
        assert_eq!(config.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.queue.max_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stale_threshold_must_outlast_ledger_timeout() {
        let mut config = Config::default();
        config.queue.stale_batch_secs = config.ledger.timeout_secs as i64;
        assert!(config.validate().is_err());

        config.queue.stale_batch_secs += 1;
        assert!(config.validate().is_ok());
    }
}
