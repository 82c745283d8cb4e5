use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::adapters::PostgresStore;
use crate::config::Config;
use crate::services::{CoinLedger, ExpiryJob};

#[derive(Parser)]
#[command(name = "coinpay-core")]
#[command(about = "CoinPay Core - payment settlement and loyalty coin ledger", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Expire coin batches whose retention window has passed
    Expire {
        /// Maximum number of batches to expire in this run
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Coin ledger maintenance
    #[command(subcommand)]
    Ledger(LedgerCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Recompute a user's cached balance from their batches and repair drift
    Reconcile {
        #[arg(long, value_name = "USER_ID")]
        user: String,
    },
}

async fn postgres_store(config: &Config) -> anyhow::Result<Arc<PostgresStore>> {
    let pool = crate::db::create_pool(config).await?;
    Ok(Arc::new(PostgresStore::new(pool, config.ledger.clone())))
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool, Path::new("./migrations")).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_expire(config: &Config, limit: Option<i64>) -> anyhow::Result<()> {
    let store = postgres_store(config).await?;
    let job = ExpiryJob::new(CoinLedger::new(store.clone()), store);

    let limit = limit.unwrap_or(config.expiry.batch_limit);
    let expired = job.sweep(limit).await?;

    println!("✓ Expired {} coin batch(es)", expired);
    Ok(())
}

pub async fn handle_ledger_reconcile(config: &Config, user_id: &str) -> anyhow::Result<()> {
    let store = postgres_store(config).await?;
    let report = CoinLedger::new(store).reconcile(user_id).await?;

    if report.is_consistent() {
        println!("✓ Balance for {} is consistent ({} coins)", report.user_id, report.recomputed);
    } else {
        println!(
            "✓ Balance for {} repaired: cached {} → recomputed {} (drift {})",
            report.user_id,
            report.cached,
            report.recomputed,
            report.drift()
        );
    }
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    config.validate()?;

    let set = |value: &Option<String>| if value.is_some() { "set" } else { "not set" };

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Gateway Salt: {}", set(&config.secrets.gateway_salt));
    println!("  Internal Token: {}", set(&config.secrets.internal_token));
    println!("  Admin API Key: {}", set(&config.secrets.admin_api_key));
    println!("  Session JWT Secret: {}", set(&config.secrets.session_jwt_secret));
    println!("  Notification URL: {}", config.notification_url.as_deref().unwrap_or("disabled"));
    println!("  Coin Retention: {} days", config.ledger.retention_days);
    println!("  Expiry Schedule: {}", config.expiry.cron.as_deref().unwrap_or("disabled"));

    println!("✓ Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://coinpay:hunter2@db:5432/coinpay"),
            "postgres://coinpay:****@db:5432/coinpay"
        );
        assert_eq!(mask_password("postgres://db/coinpay"), "postgres://db/coinpay");
    }

    #[test]
    fn test_parses_expire_limit() {
        let cli = Cli::try_parse_from(["coinpay-core", "expire", "--limit", "25"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Expire { limit: Some(25) })));
    }

    #[test]
    fn test_parses_reconcile() {
        let cli = Cli::try_parse_from(["coinpay-core", "ledger", "reconcile", "--user", "u1"]).unwrap();
        match cli.command {
            Some(Commands::Ledger(LedgerCommands::Reconcile { user })) => assert_eq!(user, "u1"),
            _ => panic!("expected ledger reconcile"),
        }
    }
}
