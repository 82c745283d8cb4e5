use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coinpay_core::adapters::PostgresStore;
use coinpay_core::cli::{self, Cli, Commands, DbCommands, LedgerCommands};
use coinpay_core::config::{Config, LogFormat};
use coinpay_core::secrets::SecretsManager;
use coinpay_core::services::expiry::run_scheduled;
use coinpay_core::{create_app, db, AppState, Stores};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    init_tracing(config.log_format);

    if let Some(vault) = SecretsManager::from_env().await? {
        vault.apply(&mut config.secrets).await?;
    }

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Expire { limit } => cli::handle_expire(&config, limit).await,
        Commands::Ledger(LedgerCommands::Reconcile { user }) => {
            cli::handle_ledger_reconcile(&config, &user).await
        }
        Commands::Config => cli::handle_config_validate(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool, Path::new("./migrations")).await?;

    let store = Arc::new(PostgresStore::new(pool, config.ledger.clone()));
    let config = Arc::new(config);
    let state = AppState::new(config.clone(), Stores::shared(store));

    if let Some(expression) = config.expiry.cron.clone() {
        let job = state.expiry.clone();
        let limit = config.expiry.batch_limit;
        tokio::spawn(async move {
            if let Err(e) = run_scheduled(job, expression, limit).await {
                tracing::error!(error = %e, "coin expiry schedule stopped");
            }
        });
    }

    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
