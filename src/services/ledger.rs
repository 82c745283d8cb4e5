//! Coin ledger service: validation and logging in front of the
//! `LedgerRepository`, which owns atomicity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{BatchDraw, CoinBatch, EntryKind, LedgerEntry, Reconciliation};
use crate::error::AppError;
use crate::ports::LedgerRepository;
use crate::validation::{validate_identifier, validate_positive_coins, validate_reason};

const USER_ID_MAX_LEN: usize = 128;

/// Result of a privileged mint or burn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdminAdjustment {
    pub amount: i64,
    pub balance_after: i64,
}

/// Balance plus the batches that still back it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinSummary {
    pub user_id: String,
    pub balance: i64,
    pub redeemable: i64,
    pub batches: Vec<CoinBatch>,
}

#[derive(Clone)]
pub struct CoinLedger {
    store: Arc<dyn LedgerRepository>,
}

impl CoinLedger {
    pub fn new(store: Arc<dyn LedgerRepository>) -> Self {
        Self { store }
    }

    pub async fn earn(&self, user_id: &str, amount: i64, reason: &str) -> Result<Uuid, AppError> {
        self.credit(user_id, amount, EntryKind::Earn, reason).await
    }

    /// FIFO redemption; all or nothing.
    pub async fn redeem(&self, user_id: &str, amount: i64, reason: &str) -> Result<Vec<BatchDraw>, AppError> {
        let user_id = validate_identifier("user_id", user_id, USER_ID_MAX_LEN)?;
        validate_positive_coins("amount", amount)?;
        let reason = validate_reason(reason)?;

        let draws = self.store.redeem(&user_id, amount, &reason, Utc::now()).await?;
        tracing::info!(user_id = %user_id, amount, batches = draws.len(), "coins redeemed");
        Ok(draws)
    }

    pub async fn expire_batch(&self, batch_id: Uuid, now: DateTime<Utc>) -> Result<i64, AppError> {
        let expired = self.store.expire_batch(batch_id, now).await?;
        if expired > 0 {
            tracing::info!(batch_id = %batch_id, amount = expired, "coin batch expired");
        }
        Ok(expired)
    }

    pub async fn admin_mint(&self, user_id: &str, amount: i64, reason: &str) -> Result<AdminAdjustment, AppError> {
        let user_id = validate_identifier("target_user_id", user_id, USER_ID_MAX_LEN)?;
        self.credit(&user_id, amount, EntryKind::AdminMint, reason).await?;

        Ok(AdminAdjustment {
            amount,
            balance_after: self.store.balance(&user_id).await?,
        })
    }

    /// Burns up to `amount` from unexpired batches, oldest first. Coins past
    /// their retention window are left for the expiry sweep. The balance never
    /// goes negative; the adjustment reports what was actually burned.
    pub async fn admin_burn(&self, user_id: &str, amount: i64, reason: &str) -> Result<AdminAdjustment, AppError> {
        let user_id = validate_identifier("target_user_id", user_id, USER_ID_MAX_LEN)?;
        validate_positive_coins("coin_amount", amount)?;
        let reason = validate_reason(reason)?;

        let burned = self.store.burn(&user_id, amount, &reason, Utc::now()).await?;
        if burned < amount {
            tracing::warn!(user_id = %user_id, requested = amount, burned, "burn capped at available balance");
        } else {
            tracing::info!(user_id = %user_id, amount = burned, reason = %reason, "coins burned");
        }

        Ok(AdminAdjustment {
            amount: burned,
            balance_after: self.store.balance(&user_id).await?,
        })
    }

    pub async fn balance(&self, user_id: &str) -> Result<i64, AppError> {
        Ok(self.store.balance(user_id).await?)
    }

    pub async fn batches(&self, user_id: &str) -> Result<Vec<CoinBatch>, AppError> {
        Ok(self.store.batches(user_id).await?)
    }

    pub async fn entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>, AppError> {
        Ok(self.store.entries(user_id).await?)
    }

    /// Coins the user could redeem at `now`: unexpired batches only.
    pub async fn redeemable(&self, user_id: &str, now: DateTime<Utc>) -> Result<i64, AppError> {
        let batches = self.store.batches(user_id).await?;
        Ok(batches
            .iter()
            .filter(|b| b.is_redeemable_at(now))
            .map(|b| b.remaining_amount)
            .sum())
    }

    pub async fn summary(&self, user_id: &str, now: DateTime<Utc>) -> Result<CoinSummary, AppError> {
        let balance = self.store.balance(user_id).await?;
        let batches: Vec<CoinBatch> = self
            .store
            .batches(user_id)
            .await?
            .into_iter()
            .filter(|b| b.is_redeemable_at(now))
            .collect();
        let redeemable = batches.iter().map(|b| b.remaining_amount).sum();

        Ok(CoinSummary {
            user_id: user_id.to_string(),
            balance,
            redeemable,
            batches,
        })
    }

    pub async fn reconcile(&self, user_id: &str) -> Result<Reconciliation, AppError> {
        let report = self.store.reconcile(user_id).await?;
        if !report.is_consistent() {
            tracing::warn!(
                user_id = %user_id,
                cached = report.cached,
                recomputed = report.recomputed,
                "cached coin balance drifted, repaired"
            );
        }
        Ok(report)
    }

    async fn credit(&self, user_id: &str, amount: i64, kind: EntryKind, reason: &str) -> Result<Uuid, AppError> {
        let user_id = validate_identifier("user_id", user_id, USER_ID_MAX_LEN)?;
        validate_positive_coins("amount", amount)?;
        let reason = validate_reason(reason)?;

        let batch_id = self.store.credit(&user_id, amount, kind, &reason, Utc::now()).await?;
        tracing::info!(user_id = %user_id, amount, kind = %kind, batch_id = %batch_id, "coins credited");
        Ok(batch_id)
    }
}
