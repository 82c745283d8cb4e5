pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod secrets;
pub mod services;
pub mod utils;
pub mod validation;

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::ports::{LedgerRepository, ReferralRepository, TransactionRepository};
use crate::services::{
    CoinLedger, ExpiryJob, HttpNotifier, NoopNotifier, Notifier, ReferralEngine, RewardPolicy,
    SettlementOrchestrator, SignatureVerifier, StoreRewardInputs,
};

/// Storage behind the services. Both adapters implement all three ports, so
/// usually the same store is handed in three times.
#[derive(Clone)]
pub struct Stores {
    pub transactions: Arc<dyn TransactionRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
    pub referrals: Arc<dyn ReferralRepository>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: TransactionRepository + LedgerRepository + ReferralRepository + 'static,
    {
        Self {
            transactions: store.clone(),
            ledger: store.clone(),
            referrals: store,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: SignatureVerifier,
    pub transactions: Arc<dyn TransactionRepository>,
    pub ledger: CoinLedger,
    pub orchestrator: SettlementOrchestrator,
    pub referrals: ReferralEngine,
    pub expiry: ExpiryJob,
}

impl AppState {
    pub fn new(config: Arc<Config>, stores: Stores) -> Self {
        let notifier: Arc<dyn Notifier> = match &config.notification_url {
            Some(url) => Arc::new(HttpNotifier::new(url.clone(), config.secrets.internal_token.clone())),
            None => Arc::new(NoopNotifier),
        };
        Self::with_notifier(config, stores, notifier)
    }

    pub fn with_notifier(config: Arc<Config>, stores: Stores, notifier: Arc<dyn Notifier>) -> Self {
        let verifier = SignatureVerifier::new(&config.secrets);
        let ledger = CoinLedger::new(stores.ledger.clone());
        let policy = RewardPolicy::new(
            config.reward.clone(),
            Arc::new(StoreRewardInputs::new(stores.transactions.clone(), stores.ledger.clone())),
        );
        let referrals = ReferralEngine::new(
            stores.transactions.clone(),
            stores.referrals.clone(),
            notifier.clone(),
            config.referral.clone(),
        );
        let orchestrator = SettlementOrchestrator::new(
            verifier.clone(),
            stores.transactions.clone(),
            policy,
            referrals.clone(),
            notifier,
            config.commission.clone(),
        );
        let expiry = ExpiryJob::new(ledger.clone(), stores.ledger.clone());

        Self {
            config,
            verifier,
            transactions: stores.transactions,
            ledger,
            orchestrator,
            referrals,
            expiry,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let internal = Router::new()
        .route("/internal/expire-coins", post(handlers::internal::expire_coins))
        .route("/internal/referrals/process", post(handlers::internal::process_referral))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::internal_auth,
        ));

    let admin = Router::new()
        .route("/admin/coins/mint", post(handlers::admin::mint_coins))
        .route("/admin/coins/burn", post(handlers::admin::burn_coins))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth,
        ));

    let cors = cors_layer(state.config.cors_allowed_origins.as_deref());

    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments/callback", post(handlers::webhook::payment_callback))
        .route("/transactions", post(handlers::transactions::initiate_transaction))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route("/coins", get(handlers::coins::get_coins))
        .merge(internal)
        .merge(admin)
        .layer(axum_middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    match allowed_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
                .collect();
            layer.allow_origin(origins)
        }
        None => layer.allow_origin(Any),
    }
}
