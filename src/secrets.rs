use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use vaultrs::auth::approle;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;

use crate::config::SecretsConfig;

/// Reads service secrets from a Vault KV v2 mount using AppRole.
pub struct SecretsManager {
    client: VaultClient,
    kv_mount: String,
    kv_path: String,
}

impl SecretsManager {
    /// `None` when `VAULT_ADDR` is not set; secrets then come from the environment only.
    pub async fn from_env() -> Result<Option<Self>> {
        let Ok(vault_addr) = env::var("VAULT_ADDR") else {
            return Ok(None);
        };
        let role_id = env::var("VAULT_ROLE_ID").context("VAULT_ROLE_ID is required")?;
        let secret_id = env::var("VAULT_SECRET_ID").context("VAULT_SECRET_ID is required")?;
        let auth_mount = env::var("VAULT_AUTH_MOUNT").unwrap_or_else(|_| "auth/approle".to_string());
        let kv_mount = env::var("VAULT_KV_MOUNT").unwrap_or_else(|_| "secret".to_string());
        let kv_path = env::var("VAULT_KV_PATH").unwrap_or_else(|_| "coinpay".to_string());

        let mut client = VaultClient::new(
            VaultClientSettingsBuilder::default()
                .address(&vault_addr)
                .build()
                .context("failed to build Vault client settings")?,
        )
        .context("failed to create Vault client")?;

        let auth = approle::login(&mut client, &auth_mount, &role_id, &secret_id)
            .await
            .context("failed to authenticate to Vault with AppRole")?;
        client.set_token(&auth.client_token);

        Ok(Some(Self {
            client,
            kv_mount,
            kv_path,
        }))
    }

    /// Overlay whatever the Vault secret holds onto `secrets`. Keys missing
    /// from Vault keep their environment value.
    pub async fn apply(&self, secrets: &mut SecretsConfig) -> Result<()> {
        let stored: HashMap<String, String> = kv2::read(&self.client, &self.kv_mount, &self.kv_path)
            .await
            .with_context(|| format!("failed to read {}/{} from Vault", self.kv_mount, self.kv_path))?;

        overlay(secrets, &stored);
        tracing::info!(path = %self.kv_path, keys = stored.len(), "secrets loaded from Vault");
        Ok(())
    }
}

fn overlay(secrets: &mut SecretsConfig, stored: &HashMap<String, String>) {
    let pick = |name: &str| stored.get(name).filter(|v| !v.is_empty()).cloned();

    if let Some(v) = pick("gateway_salt") {
        secrets.gateway_salt = Some(v);
    }
    if let Some(v) = pick("gateway_merchant_key") {
        secrets.gateway_merchant_key = Some(v);
    }
    if let Some(v) = pick("internal_token") {
        secrets.internal_token = Some(v);
    }
    if let Some(v) = pick("admin_api_key") {
        secrets.admin_api_key = Some(v);
    }
    if let Some(v) = pick("session_jwt_secret") {
        secrets.session_jwt_secret = Some(v);
    }
}
