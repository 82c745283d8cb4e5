use std::env;
use std::str::FromStr;

use anyhow::Context;
use bigdecimal::BigDecimal;
use chrono::Duration;
use dotenvy::dotenv;

/// Process-wide configuration, loaded once at start and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub cors_allowed_origins: Option<String>,
    pub log_format: LogFormat,
    pub secrets: SecretsConfig,
    pub notification_url: Option<String>,
    pub ledger: LedgerConfig,
    pub reward: RewardConfig,
    pub commission: CommissionConfig,
    pub referral: ReferralConfig,
    pub expiry: ExpiryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Shared secrets. Every one is optional so a missing value is detected at
/// use and fails closed instead of aborting start-up.
#[derive(Debug, Clone, Default)]
pub struct SecretsConfig {
    pub gateway_salt: Option<String>,
    pub gateway_merchant_key: Option<String>,
    pub internal_token: Option<String>,
    pub admin_api_key: Option<String>,
    pub session_jwt_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub retention_days: i64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub lock_timeout_ms: u64,
}

impl LedgerConfig {
    pub fn retention(&self) -> Duration {
        Duration::days(self.retention_days)
    }
}

#[derive(Debug, Clone)]
pub struct RewardConfig {
    pub liability_threshold: i64,
    pub high_value_threshold: BigDecimal,
    pub micro_threshold: BigDecimal,
    pub off_peak_start_hour: u32,
    pub off_peak_end_hour: u32,
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone)]
pub struct CommissionConfig {
    pub default_rate: BigDecimal,
    pub redemption_cap: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct ReferralConfig {
    pub bonus_coins: i64,
    pub minimum_qualifying_amount: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    pub batch_limit: i64,
    pub cron: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            max_retries: 3,
            retry_backoff_ms: 50,
            lock_timeout_ms: 2_000,
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            liability_threshold: 10_000_000,
            high_value_threshold: BigDecimal::from(5_000),
            micro_threshold: BigDecimal::from(100),
            off_peak_start_hour: 10,
            off_peak_end_hour: 16,
            utc_offset_minutes: 330,
        }
    }
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            default_rate: decimal("0.18"),
            redemption_cap: decimal("0.8"),
        }
    }
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            bonus_coins: 50,
            minimum_qualifying_amount: BigDecimal::from(100),
        }
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            batch_limit: 500,
            cron: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let ledger_defaults = LedgerConfig::default();
        let reward_defaults = RewardConfig::default();
        let commission_defaults = CommissionConfig::default();
        let referral_defaults = ReferralConfig::default();
        let expiry_defaults = ExpiryConfig::default();

        let config = Config {
            server_port: parse_or("SERVER_PORT", 3000)?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            cors_allowed_origins: optional("CORS_ALLOWED_ORIGINS"),
            log_format: match optional("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            secrets: SecretsConfig {
                gateway_salt: optional("GATEWAY_SALT"),
                gateway_merchant_key: optional("GATEWAY_MERCHANT_KEY"),
                internal_token: optional("INTERNAL_SERVICE_TOKEN"),
                admin_api_key: optional("ADMIN_API_KEY"),
                session_jwt_secret: optional("SESSION_JWT_SECRET"),
            },
            notification_url: optional("NOTIFICATION_URL"),
            ledger: LedgerConfig {
                retention_days: parse_or("COIN_RETENTION_DAYS", ledger_defaults.retention_days)?,
                max_retries: parse_or("LEDGER_MAX_RETRIES", ledger_defaults.max_retries)?,
                retry_backoff_ms: parse_or("LEDGER_RETRY_BACKOFF_MS", ledger_defaults.retry_backoff_ms)?,
                lock_timeout_ms: parse_or("LEDGER_LOCK_TIMEOUT_MS", ledger_defaults.lock_timeout_ms)?,
            },
            reward: RewardConfig {
                liability_threshold: parse_or("LIABILITY_THRESHOLD", reward_defaults.liability_threshold)?,
                high_value_threshold: parse_or("HIGH_VALUE_THRESHOLD", reward_defaults.high_value_threshold)?,
                micro_threshold: parse_or("MICRO_THRESHOLD", reward_defaults.micro_threshold)?,
                off_peak_start_hour: parse_or("OFF_PEAK_START_HOUR", reward_defaults.off_peak_start_hour)?,
                off_peak_end_hour: parse_or("OFF_PEAK_END_HOUR", reward_defaults.off_peak_end_hour)?,
                utc_offset_minutes: parse_or("REWARD_UTC_OFFSET_MINUTES", reward_defaults.utc_offset_minutes)?,
            },
            commission: CommissionConfig {
                default_rate: parse_or("DEFAULT_COMMISSION_RATE", commission_defaults.default_rate)?,
                redemption_cap: parse_or("REDEMPTION_CAP", commission_defaults.redemption_cap)?,
            },
            referral: ReferralConfig {
                bonus_coins: parse_or("REFERRAL_BONUS_COINS", referral_defaults.bonus_coins)?,
                minimum_qualifying_amount: parse_or(
                    "REFERRAL_MIN_AMOUNT",
                    referral_defaults.minimum_qualifying_amount,
                )?,
            },
            expiry: ExpiryConfig {
                batch_limit: parse_or("EXPIRY_BATCH_LIMIT", expiry_defaults.batch_limit)?,
                cron: optional("EXPIRY_CRON"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Configuration suitable for tests and local runs against the memory store.
    pub fn for_tests() -> Self {
        Config {
            server_port: 0,
            database_url: String::new(),
            database_max_connections: 1,
            cors_allowed_origins: None,
            log_format: LogFormat::Text,
            secrets: SecretsConfig::default(),
            notification_url: None,
            ledger: LedgerConfig::default(),
            reward: RewardConfig::default(),
            commission: CommissionConfig::default(),
            referral: ReferralConfig::default(),
            expiry: ExpiryConfig::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ledger.retention_days <= 0 {
            anyhow::bail!("COIN_RETENTION_DAYS must be positive");
        }
        if self.reward.off_peak_start_hour > 24 || self.reward.off_peak_end_hour > 24 {
            anyhow::bail!("off-peak hours must be within 0..=24");
        }
        if self.commission.default_rate < BigDecimal::from(0)
            || self.commission.default_rate > BigDecimal::from(1)
        {
            anyhow::bail!("DEFAULT_COMMISSION_RATE must be within [0, 1]");
        }
        if self.commission.redemption_cap < BigDecimal::from(0)
            || self.commission.redemption_cap > BigDecimal::from(1)
        {
            anyhow::bail!("REDEMPTION_CAP must be within [0, 1]");
        }
        if self.referral.bonus_coins <= 0 {
            anyhow::bail!("REFERRAL_BONUS_COINS must be positive");
        }
        if self.expiry.batch_limit <= 0 {
            anyhow::bail!("EXPIRY_BATCH_LIMIT must be positive");
        }
        if let Some(expr) = &self.expiry.cron {
            cron::Schedule::from_str(expr)
                .map_err(|e| anyhow::anyhow!("EXPIRY_CRON is not a valid schedule: {}", e))?;
        }
        if let Some(raw) = &self.notification_url {
            url::Url::parse(raw).context("NOTIFICATION_URL is not a valid URL")?;
        }
        Ok(())
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", key, e)),
        None => Ok(default),
    }
}

pub(crate) fn decimal(raw: &str) -> BigDecimal {
    BigDecimal::from_str(raw).unwrap_or_default()
}
