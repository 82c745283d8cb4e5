//! Storage seams. Services depend on these traits; `adapters` provides the
//! Postgres implementation and an in-memory one.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    BatchDraw, CoinBatch, EntryKind, FailOutcome, LedgerEntry, NewTransaction, Reconciliation,
    Referral, SettleOutcome, SettlementCommit, Transaction,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    /// Lock timeout, serialization failure or deadlock. Retried by the adapter.
    #[error("store busy: {0}")]
    Busy(String),

    #[error("gave up after {attempts} contended attempts")]
    Timeout { attempts: u32 },

    #[error("database error: {0}")]
    Database(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Outcome of an atomic referral reward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardReferralOutcome {
    Rewarded(Referral),
    AlreadyRewarded(Referral),
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Insert a new `initiated` transaction. Duplicate ids are a `Conflict`.
    async fn insert(&self, tx: &NewTransaction, now: DateTime<Utc>) -> RepositoryResult<Transaction>;

    async fn get(&self, id: &str) -> RepositoryResult<Option<Transaction>>;

    async fn count_successful(&self, payer_id: &str) -> RepositoryResult<i64>;

    async fn merchant_commission_rate(&self, merchant_id: &str) -> RepositoryResult<Option<BigDecimal>>;

    /// Conditional `initiated → failed`.
    async fn mark_failed(&self, id: &str, reason: &str, now: DateTime<Utc>) -> RepositoryResult<FailOutcome>;

    /// Conditional `initiated → success` together with redemption of
    /// `coins_applied` and the earn of `coins_earned`, as one atomic unit.
    async fn settle(&self, commit: &SettlementCommit) -> RepositoryResult<SettleOutcome>;

    async fn ping(&self) -> RepositoryResult<()>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Create a batch and its credit entry; returns the batch id.
    async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        kind: EntryKind,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Uuid>;

    /// All-or-nothing FIFO redemption from unexpired batches.
    async fn redeem(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<BatchDraw>>;

    /// Zero a due batch; returns the amount expired (0 when not due or empty).
    async fn expire_batch(&self, batch_id: Uuid, now: DateTime<Utc>) -> RepositoryResult<i64>;

    /// Burn up to `amount`, oldest first; returns the amount actually burned.
    async fn burn(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<i64>;

    async fn balance(&self, user_id: &str) -> RepositoryResult<i64>;

    /// Batches in FIFO order.
    async fn batches(&self, user_id: &str) -> RepositoryResult<Vec<CoinBatch>>;

    /// Entries in append order.
    async fn entries(&self, user_id: &str) -> RepositoryResult<Vec<LedgerEntry>>;

    /// Ids of batches with `expires_at <= now` and something left, oldest first.
    async fn due_batches(&self, now: DateTime<Utc>, limit: i64) -> RepositoryResult<Vec<Uuid>>;

    /// Total remaining across unexpired batches, platform wide.
    async fn outstanding_liability(&self, now: DateTime<Utc>) -> RepositoryResult<i64>;

    /// Recompute the cached balance from batches and repair it if it drifted.
    async fn reconcile(&self, user_id: &str) -> RepositoryResult<Reconciliation>;
}

#[async_trait]
pub trait ReferralRepository: Send + Sync {
    async fn find_by_referee(&self, referee_id: &str) -> RepositoryResult<Option<Referral>>;

    /// Credit `bonus` to both parties and mark the referral rewarded, as one
    /// atomic unit. A referral that is already rewarded is left untouched.
    async fn reward(
        &self,
        referral_id: Uuid,
        bonus: i64,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<RewardReferralOutcome>;
}
