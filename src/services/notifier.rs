//! Outbound notification trigger. Delivery (push, mail) lives in another
//! service; this only tells it that something happened.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Referral, Transaction};
use crate::services::signature::INTERNAL_TOKEN_HEADER;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Notification endpoint answered {0}")]
    Rejected(u16),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    PaymentSettled {
        transaction_id: String,
        user_id: String,
        coins_earned: i64,
        coins_redeemed: i64,
    },
    #[serde(rename_all = "camelCase")]
    ReferralRewarded {
        referral_id: Uuid,
        referrer_id: String,
        referee_id: String,
        bonus: i64,
    },
}

impl Notification {
    pub fn payment_settled(tx: &Transaction) -> Self {
        Notification::PaymentSettled {
            transaction_id: tx.id.clone(),
            user_id: tx.payer_id.clone(),
            coins_earned: tx.coins_earned.unwrap_or(0),
            coins_redeemed: tx.coins_applied,
        }
    }

    pub fn referral_rewarded(referral: &Referral, bonus: i64) -> Self {
        Notification::ReferralRewarded {
            referral_id: referral.id,
            referrer_id: referral.referrer_id.clone(),
            referee_id: referral.referee_id.clone(),
            bonus,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Used when no `NOTIFICATION_URL` is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::debug!(?notification, "notification endpoint not configured, skipping");
        Ok(())
    }
}

/// POSTs notifications as JSON, authenticated with the internal token.
#[derive(Clone)]
pub struct HttpNotifier {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpNotifier {
    pub fn new(url: String, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self { client, url, token }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.url).json(notification);
        if let Some(token) = &self.token {
            request = request.header(INTERNAL_TOKEN_HEADER, token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settled() -> Notification {
        Notification::PaymentSettled {
            transaction_id: "tx-1".to_string(),
            user_id: "u1".to_string(),
            coins_earned: 100,
            coins_redeemed: 0,
        }
    }

    #[test]
    fn test_payload_shape() {
        let body = serde_json::to_value(settled()).unwrap();
        assert_eq!(body["event"], "payment_settled");
        assert_eq!(body["transactionId"], "tx-1");
        assert_eq!(body["coinsEarned"], 100);
    }

    #[tokio::test]
    async fn test_posts_with_internal_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/notify")
            .match_header(INTERNAL_TOKEN_HEADER, "s3cret")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "event": "payment_settled",
                "userId": "u1"
            })))
            .with_status(202)
            .create_async()
            .await;

        let notifier = HttpNotifier::new(format!("{}/notify", server.url()), Some("s3cret".to_string()));
        notifier.notify(&settled()).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/notify")
            .with_status(503)
            .create_async()
            .await;

        let notifier = HttpNotifier::new(format!("{}/notify", server.url()), None);
        let result = notifier.notify(&settled()).await;

        assert!(matches!(result, Err(NotifyError::Rejected(503))));
    }
}
