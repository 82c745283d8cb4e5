//! Gateway-callback state machine: `initiated → success | failed`.

use std::collections::HashMap;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::CommissionConfig;
use crate::domain::{FailOutcome, SettleOutcome, SettlementCommit, Transaction};
use crate::error::AppError;
use crate::ports::TransactionRepository;
use crate::services::notifier::{Notification, Notifier};
use crate::services::referral::ReferralEngine;
use crate::services::reward_policy::RewardPolicy;
use crate::services::signature::{GatewayCallback, SignatureVerifier};

pub const REASON_DECLINED: &str = "gateway_declined";
pub const REASON_AMOUNT_MISMATCH: &str = "amount_mismatch";
pub const REASON_SETTLEMENT_ERROR: &str = "settlement_error";
pub const REASON_REWARD_OVERFLOW: &str = "reward_overflow";

/// A handled callback. All variants answer 200 to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "transaction", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Settled(Transaction),
    AlreadyProcessed(Transaction),
    Declined(Transaction),
    /// Signed success that could not be honoured (insufficient coins, amount
    /// mismatch). The transaction is now `failed`.
    Failed(Transaction),
}

impl CallbackOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            CallbackOutcome::Settled(tx)
            | CallbackOutcome::AlreadyProcessed(tx)
            | CallbackOutcome::Declined(tx)
            | CallbackOutcome::Failed(tx) => tx,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CallbackOutcome::Settled(_) => "settled",
            CallbackOutcome::AlreadyProcessed(_) => "already processed",
            CallbackOutcome::Declined(_) => "declined",
            CallbackOutcome::Failed(_) => "failed",
        }
    }
}

/// Commission, reward cost and net revenue for one payment.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementFigures {
    pub commission_total: BigDecimal,
    pub reward_cost: i64,
    pub net_revenue: BigDecimal,
}

impl SettlementFigures {
    /// One coin costs one currency unit.
    pub fn compute(gross_amount: &BigDecimal, commission_rate: &BigDecimal, coins_earned: i64) -> Self {
        let commission_total = (gross_amount * commission_rate).round(2);
        let net_revenue = &commission_total - BigDecimal::from(coins_earned);
        Self {
            commission_total,
            reward_cost: coins_earned,
            net_revenue,
        }
    }
}

#[derive(Clone)]
pub struct SettlementOrchestrator {
    verifier: SignatureVerifier,
    transactions: Arc<dyn TransactionRepository>,
    policy: RewardPolicy,
    referrals: ReferralEngine,
    notifier: Arc<dyn Notifier>,
    commission: CommissionConfig,
}

impl SettlementOrchestrator {
    pub fn new(
        verifier: SignatureVerifier,
        transactions: Arc<dyn TransactionRepository>,
        policy: RewardPolicy,
        referrals: ReferralEngine,
        notifier: Arc<dyn Notifier>,
        commission: CommissionConfig,
    ) -> Self {
        Self {
            verifier,
            transactions,
            policy,
            referrals,
            notifier,
            commission,
        }
    }

    /// Settle a callback and, on success, kick off the referral and
    /// notification follow-ups without waiting for them.
    pub async fn handle_callback(&self, fields: &HashMap<String, String>) -> Result<CallbackOutcome, AppError> {
        let outcome = self.settle(fields).await?;
        if let CallbackOutcome::Settled(tx) = &outcome {
            self.spawn_follow_ups(tx.clone());
        }
        Ok(outcome)
    }

    pub async fn settle(&self, fields: &HashMap<String, String>) -> Result<CallbackOutcome, AppError> {
        self.settle_at(fields, Utc::now()).await
    }

    pub async fn settle_at(
        &self,
        fields: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, AppError> {
        let callback = self.verifier.verify_callback(fields)?;
        let id = callback.txnid.as_str();

        if !callback.is_success() {
            let reason = callback.error_message.as_deref().unwrap_or(REASON_DECLINED);
            tracing::info!(transaction_id = %id, status = %callback.status, "gateway declined payment");
            return Ok(match self.transactions.mark_failed(id, reason, now).await? {
                FailOutcome::Failed(tx) => CallbackOutcome::Declined(tx),
                FailOutcome::AlreadyTerminal(tx) => CallbackOutcome::AlreadyProcessed(tx),
            });
        }

        let tx = self.transactions.get(id).await?.ok_or_else(|| {
            tracing::error!(transaction_id = %id, "signed callback for unknown transaction");
            AppError::NotFound(format!("transaction {}", id))
        })?;

        if tx.status.is_terminal() {
            tracing::info!(transaction_id = %id, status = %tx.status, "duplicate callback, already processed");
            return Ok(CallbackOutcome::AlreadyProcessed(tx));
        }

        if !amount_matches(&callback, &tx) {
            tracing::warn!(
                transaction_id = %id,
                expected = %tx.fiat_amount,
                received = %callback.amount,
                "callback amount does not match transaction"
            );
            return self.fail(id, REASON_AMOUNT_MISMATCH, now).await;
        }

        let Some(commit) = self.prepare_commit(&callback, &tx, now).await? else {
            return self.fail(id, REASON_REWARD_OVERFLOW, now).await;
        };

        match self.transactions.settle(&commit).await {
            Ok(SettleOutcome::Settled(tx)) => {
                tracing::info!(
                    transaction_id = %tx.id,
                    user_id = %tx.payer_id,
                    coins_earned = commit.coins_earned,
                    coins_redeemed = tx.coins_applied,
                    reward_bps = commit.reward_bps,
                    degraded = commit.reward_degraded,
                    "payment settled"
                );
                Ok(CallbackOutcome::Settled(tx))
            }
            Ok(SettleOutcome::AlreadyProcessed(tx)) => Ok(CallbackOutcome::AlreadyProcessed(tx)),
            Ok(SettleOutcome::InsufficientBalance(tx)) => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    user_id = %tx.payer_id,
                    coins_applied = tx.coins_applied,
                    "redemption no longer covered, transaction failed"
                );
                Ok(CallbackOutcome::Failed(tx))
            }
            Err(e) => {
                tracing::error!(transaction_id = %id, error = %e, "settlement failed");
                if let Err(mark_err) = self.transactions.mark_failed(id, REASON_SETTLEMENT_ERROR, Utc::now()).await {
                    tracing::error!(transaction_id = %id, error = %mark_err, "could not mark transaction failed");
                }
                Err(e.into())
            }
        }
    }

    /// Run the referral engine and the notifier for a settled transaction.
    /// Neither can undo the settlement.
    pub fn spawn_follow_ups(&self, tx: Transaction) -> JoinHandle<()> {
        let referrals = self.referrals.clone();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&Notification::payment_settled(&tx)).await {
                tracing::warn!(transaction_id = %tx.id, error = %e, "settlement notification failed");
            }

            match referrals.process(&tx.payer_id, &tx.id, &tx.fiat_amount).await {
                Ok(outcome) => tracing::debug!(transaction_id = %tx.id, ?outcome, "referral processed"),
                Err(e) => tracing::error!(transaction_id = %tx.id, error = %e, "referral processing failed"),
            }
        })
    }

    async fn prepare_commit(
        &self,
        callback: &GatewayCallback,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<Option<SettlementCommit>, AppError> {
        let quote = self
            .policy
            .compute_reward_percentage(&tx.payer_id, &tx.fiat_amount, now)
            .await;
        let Some(coins_earned) = quote.percentage.coins_for(&tx.fiat_amount) else {
            tracing::error!(
                transaction_id = %tx.id,
                amount = %tx.fiat_amount,
                reward_bps = quote.percentage.basis_points(),
                "reward does not fit in a coin amount"
            );
            return Ok(None);
        };

        let rate = self
            .transactions
            .merchant_commission_rate(&tx.merchant_id)
            .await?
            .unwrap_or_else(|| self.commission.default_rate.clone());
        let figures = SettlementFigures::compute(&tx.gross_amount, &rate, coins_earned);

        Ok(Some(SettlementCommit {
            transaction_id: tx.id.clone(),
            gateway_reference: callback.mihpayid.clone(),
            coins_earned,
            reward_bps: quote.percentage.basis_points() as i32,
            reward_degraded: quote.degraded,
            commission_total: figures.commission_total,
            reward_cost: figures.reward_cost,
            net_revenue: figures.net_revenue,
            settled_at: now,
        }))
    }

    async fn fail(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<CallbackOutcome, AppError> {
        Ok(match self.transactions.mark_failed(id, reason, now).await? {
            FailOutcome::Failed(tx) => CallbackOutcome::Failed(tx),
            FailOutcome::AlreadyTerminal(tx) => CallbackOutcome::AlreadyProcessed(tx),
        })
    }
}

fn amount_matches(callback: &GatewayCallback, tx: &Transaction) -> bool {
    callback
        .amount
        .parse::<BigDecimal>()
        .map(|amount| amount == tx.fiat_amount)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::decimal;

    #[test]
    fn test_figures_for_reference_payment() {
        let figures = SettlementFigures::compute(&BigDecimal::from(1000), &decimal("0.18"), 100);
        assert_eq!(figures.commission_total, BigDecimal::from(180));
        assert_eq!(figures.reward_cost, 100);
        assert_eq!(figures.net_revenue, BigDecimal::from(80));
    }

    #[test]
    fn test_net_revenue_can_go_negative() {
        let figures = SettlementFigures::compute(&BigDecimal::from(100), &decimal("0.05"), 10);
        assert_eq!(figures.net_revenue, BigDecimal::from(-5));
    }

    #[test]
    fn test_commission_rounds_to_minor_units() {
        let figures = SettlementFigures::compute(&decimal("99.99"), &decimal("0.18"), 0);
        assert_eq!(figures.commission_total, decimal("18.00"));
    }
}
