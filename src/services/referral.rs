use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Serialize;

use crate::config::ReferralConfig;
use crate::domain::{Referral, ReferralStatus, TransactionStatus};
use crate::error::AppError;
use crate::ports::{ReferralRepository, RewardReferralOutcome, TransactionRepository};
use crate::services::notifier::{Notification, Notifier};

/// What `process` did. Every variant except `Rewarded` is a normal no-op.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReferralOutcome {
    BelowMinimum,
    NotReferred,
    SelfReferral,
    AlreadyRewarded,
    Rewarded { referral: Referral, bonus: i64 },
}

#[derive(Clone)]
pub struct ReferralEngine {
    transactions: Arc<dyn TransactionRepository>,
    store: Arc<dyn ReferralRepository>,
    notifier: Arc<dyn Notifier>,
    config: ReferralConfig,
}

impl ReferralEngine {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        store: Arc<dyn ReferralRepository>,
        notifier: Arc<dyn Notifier>,
        config: ReferralConfig,
    ) -> Self {
        Self {
            transactions,
            store,
            notifier,
            config,
        }
    }

    /// Entry point for callers outside the settlement path. The transaction
    /// must exist, be settled and have been paid by the referee; the stored
    /// fiat amount is what qualifies, never a caller-supplied one.
    pub async fn process_for_transaction(
        &self,
        referee_id: &str,
        transaction_id: &str,
        claimed_amount: Option<&BigDecimal>,
    ) -> Result<ReferralOutcome, AppError> {
        let tx = self
            .transactions
            .get(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))?;

        if tx.payer_id != referee_id {
            tracing::warn!(
                transaction_id = %transaction_id,
                referee_id = %referee_id,
                "referral requested for another user's transaction"
            );
            return Err(AppError::Conflict(format!(
                "transaction {} was not paid by {}",
                transaction_id, referee_id
            )));
        }
        if tx.status != TransactionStatus::Success {
            return Err(AppError::Conflict(format!(
                "transaction {} is {}, not settled",
                transaction_id, tx.status
            )));
        }
        if let Some(claimed) = claimed_amount {
            if claimed != &tx.fiat_amount {
                return Err(AppError::Conflict(format!(
                    "fiatAmount {} does not match transaction amount {}",
                    claimed, tx.fiat_amount
                )));
            }
        }

        self.process(referee_id, &tx.id, &tx.fiat_amount).await
    }

    /// Pay the referral bonus to both sides the first time the referee makes
    /// a qualifying payment. Callers must already hold the referee's settled
    /// transaction.
    pub async fn process(
        &self,
        referee_id: &str,
        transaction_id: &str,
        fiat_amount: &BigDecimal,
    ) -> Result<ReferralOutcome, AppError> {
        if fiat_amount < &self.config.minimum_qualifying_amount {
            tracing::debug!(
                referee_id = %referee_id,
                transaction_id = %transaction_id,
                amount = %fiat_amount,
                "payment below referral minimum"
            );
            return Ok(ReferralOutcome::BelowMinimum);
        }

        let Some(referral) = self.store.find_by_referee(referee_id).await? else {
            return Ok(ReferralOutcome::NotReferred);
        };

        if referral.referrer_id == referral.referee_id {
            tracing::warn!(referral_id = %referral.id, user_id = %referee_id, "ignoring self-referral");
            return Ok(ReferralOutcome::SelfReferral);
        }

        if referral.status == ReferralStatus::Rewarded {
            return Ok(ReferralOutcome::AlreadyRewarded);
        }

        let bonus = self.config.bonus_coins;
        match self
            .store
            .reward(referral.id, bonus, transaction_id, Utc::now())
            .await?
        {
            RewardReferralOutcome::AlreadyRewarded(_) => Ok(ReferralOutcome::AlreadyRewarded),
            RewardReferralOutcome::Rewarded(referral) => {
                tracing::info!(
                    referral_id = %referral.id,
                    referrer_id = %referral.referrer_id,
                    referee_id = %referral.referee_id,
                    transaction_id = %transaction_id,
                    bonus,
                    "referral bonus paid"
                );

                if let Err(e) = self
                    .notifier
                    .notify(&Notification::referral_rewarded(&referral, bonus))
                    .await
                {
                    tracing::warn!(referral_id = %referral.id, error = %e, "referral notification failed");
                }

                Ok(ReferralOutcome::Rewarded { referral, bonus })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;
    use crate::config::Config;
    use crate::domain::{NewTransaction, SettlementCommit};
    use crate::ports::LedgerRepository;
    use crate::services::notifier::NoopNotifier;
    use chrono::Duration;

    async fn payment(store: &InMemoryStore, id: &str, payer_id: &str, fiat: i64, settle: bool) {
        let now = Utc::now();
        store
            .insert(
                &NewTransaction {
                    id: id.to_string(),
                    payer_id: payer_id.to_string(),
                    merchant_id: "merchant-1".to_string(),
                    gross_amount: BigDecimal::from(fiat),
                    fiat_amount: BigDecimal::from(fiat),
                    coins_applied: 0,
                },
                now,
            )
            .await
            .unwrap();
        if settle {
            store
                .settle(&SettlementCommit {
                    transaction_id: id.to_string(),
                    gateway_reference: None,
                    coins_earned: 0,
                    reward_bps: 1000,
                    reward_degraded: false,
                    commission_total: BigDecimal::from(0),
                    reward_cost: 0,
                    net_revenue: BigDecimal::from(0),
                    settled_at: now,
                })
                .await
                .unwrap();
        }
    }

    fn engine(store: Arc<InMemoryStore>) -> ReferralEngine {
        ReferralEngine::new(store.clone(), store, Arc::new(NoopNotifier), Config::for_tests().referral)
    }

    #[tokio::test]
    async fn test_rewards_both_parties_once() {
        let store = Arc::new(InMemoryStore::new(Duration::days(90)));
        store.seed_referral("alice", "bob").await;
        let engine = engine(store.clone());

        let first = engine.process("bob", "tx-1", &BigDecimal::from(500)).await.unwrap();
        assert!(matches!(first, ReferralOutcome::Rewarded { bonus: 50, .. }));

        let second = engine.process("bob", "tx-2", &BigDecimal::from(500)).await.unwrap();
        assert_eq!(second, ReferralOutcome::AlreadyRewarded);

        assert_eq!(store.balance("alice").await.unwrap(), 50);
        assert_eq!(store.balance("bob").await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_below_minimum_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new(Duration::days(90)));
        store.seed_referral("alice", "bob").await;
        let engine = engine(store.clone());

        let outcome = engine.process("bob", "tx-1", &BigDecimal::from(99)).await.unwrap();
        assert_eq!(outcome, ReferralOutcome::BelowMinimum);
        assert_eq!(store.balance("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreferred_and_self_referred_users() {
        let store = Arc::new(InMemoryStore::new(Duration::days(90)));
        store.seed_referral("carol", "carol").await;
        let engine = engine(store.clone());

        let outcome = engine.process("dave", "tx-1", &BigDecimal::from(500)).await.unwrap();
        assert_eq!(outcome, ReferralOutcome::NotReferred);

        let outcome = engine.process("carol", "tx-2", &BigDecimal::from(500)).await.unwrap();
        assert_eq!(outcome, ReferralOutcome::SelfReferral);
        assert_eq!(store.balance("carol").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transaction_checks_before_reward() {
        let store = Arc::new(InMemoryStore::new(Duration::days(90)));
        store.seed_referral("alice", "bob").await;
        payment(&store, "tx-open", "bob", 500, false).await;
        payment(&store, "tx-carol", "carol", 500, true).await;
        let engine = engine(store.clone());

        let missing = engine.process_for_transaction("bob", "tx-missing", None).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        let unsettled = engine.process_for_transaction("bob", "tx-open", None).await;
        assert!(matches!(unsettled, Err(AppError::Conflict(_))));

        let foreign = engine.process_for_transaction("bob", "tx-carol", None).await;
        assert!(matches!(foreign, Err(AppError::Conflict(_))));

        assert_eq!(store.balance("alice").await.unwrap(), 0);
        assert_eq!(store.balance("bob").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stored_amount_decides_qualification() {
        let store = Arc::new(InMemoryStore::new(Duration::days(90)));
        store.seed_referral("alice", "bob").await;
        payment(&store, "tx-small", "bob", 20, true).await;
        payment(&store, "tx-big", "bob", 500, true).await;
        let engine = engine(store.clone());

        let inflated = engine
            .process_for_transaction("bob", "tx-small", Some(&BigDecimal::from(1000)))
            .await;
        assert!(matches!(inflated, Err(AppError::Conflict(_))));

        let outcome = engine.process_for_transaction("bob", "tx-small", None).await.unwrap();
        assert_eq!(outcome, ReferralOutcome::BelowMinimum);

        let outcome = engine
            .process_for_transaction("bob", "tx-big", Some(&BigDecimal::from(500)))
            .await
            .unwrap();
        assert!(matches!(outcome, ReferralOutcome::Rewarded { bonus: 50, .. }));
        assert_eq!(store.balance("alice").await.unwrap(), 50);
    }
}
