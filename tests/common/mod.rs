#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};

use coinpay_core::adapters::InMemoryStore;
use coinpay_core::config::{Config, SecretsConfig};
use coinpay_core::domain::{NewTransaction, Transaction};
use coinpay_core::middleware::auth::Claims;
use coinpay_core::ports::TransactionRepository;
use coinpay_core::services::signature::{sign, GatewayCallback};
use coinpay_core::{create_app, AppState, Stores};

pub const SALT: &str = "test-salt";
pub const MERCHANT_KEY: &str = "test-merchant-key";
pub const INTERNAL_TOKEN: &str = "internal-token";
pub const ADMIN_KEY: &str = "admin-key";
pub const JWT_SECRET: &str = "session-secret";

pub fn test_config() -> Config {
    let mut config = Config::for_tests();
    config.secrets = SecretsConfig {
        gateway_salt: Some(SALT.to_string()),
        gateway_merchant_key: Some(MERCHANT_KEY.to_string()),
        internal_token: Some(INTERNAL_TOKEN.to_string()),
        admin_api_key: Some(ADMIN_KEY.to_string()),
        session_jwt_secret: Some(JWT_SECRET.to_string()),
    };
    config
}

pub fn memory_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new(Duration::days(90)))
}

pub fn app_state(store: Arc<InMemoryStore>) -> AppState {
    app_state_with(store, test_config())
}

pub fn app_state_with(store: Arc<InMemoryStore>, config: Config) -> AppState {
    AppState::new(Arc::new(config), Stores::shared(store))
}

pub fn amount(raw: &str) -> BigDecimal {
    raw.parse().unwrap()
}

pub async fn seed_transaction(
    store: &InMemoryStore,
    id: &str,
    payer_id: &str,
    gross: &str,
    fiat: &str,
    coins_applied: i64,
) -> Transaction {
    store
        .insert(
            &NewTransaction {
                id: id.to_string(),
                payer_id: payer_id.to_string(),
                merchant_id: "merchant-1".to_string(),
                gross_amount: amount(gross),
                fiat_amount: amount(fiat),
                coins_applied,
            },
            Utc::now(),
        )
        .await
        .unwrap()
}

/// Gateway callback fields signed with the test salt.
pub fn callback_fields(txnid: &str, amount: &str, status: &str) -> HashMap<String, String> {
    let mut callback = GatewayCallback {
        key: MERCHANT_KEY.to_string(),
        txnid: txnid.to_string(),
        amount: amount.to_string(),
        productinfo: "order".to_string(),
        firstname: "Asha".to_string(),
        email: "asha@example.com".to_string(),
        status: status.to_string(),
        hash: String::new(),
        mihpayid: Some(format!("gw-{}", txnid)),
        error_message: None,
    };
    callback.hash = sign(SALT, &callback).unwrap();

    let mut fields = HashMap::new();
    fields.insert("key".to_string(), callback.key);
    fields.insert("txnid".to_string(), callback.txnid);
    fields.insert("amount".to_string(), callback.amount);
    fields.insert("productinfo".to_string(), callback.productinfo);
    fields.insert("firstname".to_string(), callback.firstname);
    fields.insert("email".to_string(), callback.email);
    fields.insert("status".to_string(), callback.status);
    fields.insert("hash".to_string(), callback.hash);
    fields.insert("mihpayid".to_string(), format!("gw-{}", txnid));
    fields
}

pub fn session_token(user_id: &str) -> String {
    session_token_signed_with(user_id, JWT_SECRET)
}

pub fn session_token_signed_with(user_id: &str, secret: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

/// Serve the app on an ephemeral port and return its base URL.
pub async fn spawn_app(state: AppState) -> String {
    let app = create_app(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let actual_addr = server.local_addr();

    tokio::spawn(async move {
        server.await.unwrap();
    });

    format!("http://{}", actual_addr)
}
