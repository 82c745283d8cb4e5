//! Postgres implementation of the repository ports.
//!
//! Every balance-changing operation runs in one database transaction that
//! first locks the affected users' `coin_balances` rows (`FOR UPDATE`), so
//! operations on one user serialize while different users proceed in
//! parallel. Multi-user units lock in user-id order. Lock waits are bounded
//! by `lock_timeout`; contended attempts are retried with exponential backoff.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool, Postgres, Transaction as SqlxTransaction};
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::coins::{plan_draws, plan_redemption};
use crate::domain::{
    BatchDraw, CoinBatch, EntryKind, FailOutcome, LedgerEntry, NewTransaction,
    Reconciliation, Referral, ReferralStatus, SettleOutcome, SettlementCommit, Transaction,
};
use crate::ports::{
    LedgerRepository, ReferralRepository, RepositoryError, RepositoryResult, RewardReferralOutcome,
    TransactionRepository,
};

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // serialization_failure, deadlock_detected, lock_not_available
                Some("40001") | Some("40P01") | Some("55P03") => {
                    RepositoryError::Busy(db.message().to_string())
                }
                Some("23505") => RepositoryError::Conflict(db.message().to_string()),
                _ => RepositoryError::Database(err.to_string()),
            },
            sqlx::Error::PoolTimedOut => RepositoryError::Busy("connection pool exhausted".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

/// Postgres-backed store for transactions, the coin ledger and referrals.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    ledger: LedgerConfig,
}

impl PostgresStore {
    pub fn new(pool: PgPool, ledger: LedgerConfig) -> Self {
        Self { pool, ledger }
    }

    async fn begin(&self) -> RepositoryResult<SqlxTransaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        // SET cannot take bind parameters; the value is a plain integer.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.ledger.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn retrying<'f, T, F>(&self, op: &'static str, mut attempt_once: F) -> RepositoryResult<T>
    where
        F: FnMut() -> BoxFuture<'f, RepositoryResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match attempt_once().await {
                Err(RepositoryError::Busy(reason)) if attempt <= self.ledger.max_retries => {
                    let backoff = StdDuration::from_millis(
                        self.ledger.retry_backoff_ms.saturating_mul(1u64 << (attempt - 1).min(10)),
                    );
                    tracing::warn!(
                        op,
                        attempt,
                        reason = %reason,
                        backoff_ms = backoff.as_millis() as u64,
                        "store contended, retrying"
                    );
                    sleep(backoff).await;
                }
                Err(RepositoryError::Busy(reason)) => {
                    tracing::error!(op, attempt, reason = %reason, "store contended, giving up");
                    return Err(RepositoryError::Timeout { attempts: attempt });
                }
                other => return other,
            }
        }
    }

    async fn try_mark_failed(&self, id: &str, reason: &str, now: DateTime<Utc>) -> RepositoryResult<FailOutcome> {
        let failed = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions
            SET status = 'failed', failure_reason = $2, updated_at = $3
            WHERE id = $1 AND status = 'initiated'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = failed {
            return Ok(FailOutcome::Failed(row.into_domain()?));
        }

        match self.get(id).await? {
            Some(tx) => Ok(FailOutcome::AlreadyTerminal(tx)),
            None => Err(RepositoryError::NotFound(format!("transaction {}", id))),
        }
    }

    async fn try_settle(&self, commit: &SettlementCommit) -> RepositoryResult<SettleOutcome> {
        let mut db = self.begin().await?;

        let tx = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1 FOR UPDATE")
            .bind(&commit.transaction_id)
            .fetch_optional(&mut *db)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("transaction {}", commit.transaction_id)))?
            .into_domain()?;

        if tx.status.is_terminal() {
            db.rollback().await?;
            return Ok(SettleOutcome::AlreadyProcessed(tx));
        }

        let now = commit.settled_at;
        lock_balances(&mut db, &[tx.payer_id.as_str()]).await?;

        if tx.coins_applied > 0 {
            let reason = format!("redeemed against transaction {}", tx.id);
            match redeem_in(&mut db, &tx.payer_id, tx.coins_applied, &reason, Some(&tx.id), now).await {
                Ok(_) => {}
                Err(RepositoryError::InsufficientBalance { requested, available }) => {
                    db.rollback().await?;
                    tracing::warn!(
                        transaction_id = %tx.id,
                        requested,
                        available,
                        "redemption no longer backed by ledger"
                    );
                    return match self.try_mark_failed(&tx.id, "insufficient_balance", now).await? {
                        FailOutcome::Failed(failed) => Ok(SettleOutcome::InsufficientBalance(failed)),
                        FailOutcome::AlreadyTerminal(done) => Ok(SettleOutcome::AlreadyProcessed(done)),
                    };
                }
                Err(e) => return Err(e),
            }
        }

        if commit.coins_earned > 0 {
            let reason = format!("earned on transaction {}", tx.id);
            credit_in(
                &mut db,
                &tx.payer_id,
                commit.coins_earned,
                EntryKind::Earn,
                &reason,
                Some(&tx.id),
                now,
                self.ledger.retention(),
            )
            .await?;
        }

        let settled = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions
            SET status = 'success', gateway_reference = $2, commission_total = $3,
                reward_cost = $4, net_revenue = $5, coins_earned = $6, reward_bps = $7,
                reward_degraded = $8, updated_at = $9
            WHERE id = $1 AND status = 'initiated'
            RETURNING *
            "#,
        )
        .bind(&commit.transaction_id)
        .bind(&commit.gateway_reference)
        .bind(&commit.commission_total)
        .bind(commit.reward_cost)
        .bind(&commit.net_revenue)
        .bind(commit.coins_earned)
        .bind(commit.reward_bps)
        .bind(commit.reward_degraded)
        .bind(now)
        .fetch_optional(&mut *db)
        .await?;

        // The row lock makes a lost race impossible here; a miss means the
        // row changed underneath us, so discard everything.
        let Some(settled) = settled else {
            db.rollback().await?;
            return Err(RepositoryError::Conflict(format!(
                "transaction {} left 'initiated' during settlement",
                commit.transaction_id
            )));
        };

        db.commit().await?;
        Ok(SettleOutcome::Settled(settled.into_domain()?))
    }

    async fn try_credit(
        &self,
        user_id: &str,
        amount: i64,
        kind: EntryKind,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Uuid> {
        let mut db = self.begin().await?;
        lock_balances(&mut db, &[user_id]).await?;
        let batch_id = credit_in(&mut db, user_id, amount, kind, reason, None, now, self.ledger.retention()).await?;
        db.commit().await?;
        Ok(batch_id)
    }

    async fn try_redeem(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<BatchDraw>> {
        let mut db = self.begin().await?;
        lock_balances(&mut db, &[user_id]).await?;
        let draws = redeem_in(&mut db, user_id, amount, reason, None, now).await?;
        db.commit().await?;
        Ok(draws)
    }

    async fn try_expire_batch(&self, batch_id: Uuid, now: DateTime<Utc>) -> RepositoryResult<i64> {
        let mut db = self.begin().await?;

        let user_id: String = sqlx::query_scalar("SELECT user_id FROM coin_batches WHERE id = $1")
            .bind(batch_id)
            .fetch_optional(&mut *db)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("coin batch {}", batch_id)))?;

        lock_balances(&mut db, &[user_id.as_str()]).await?;

        let batch = sqlx::query_as::<_, BatchRow>(
            "SELECT id, user_id, original_amount, remaining_amount, earned_at, expires_at
             FROM coin_batches WHERE id = $1 FOR UPDATE",
        )
        .bind(batch_id)
        .fetch_one(&mut *db)
        .await?
        .into_domain();

        if batch.remaining_amount == 0 || !batch.is_expired_at(now) {
            db.rollback().await?;
            return Ok(0);
        }

        let draw = BatchDraw {
            batch_id,
            amount: batch.remaining_amount,
        };
        apply_draws_in(&mut db, &user_id, &[draw], EntryKind::Expire, "retention window elapsed", None, now).await?;
        db.commit().await?;
        Ok(draw.amount)
    }

    async fn try_burn(&self, user_id: &str, amount: i64, reason: &str, now: DateTime<Utc>) -> RepositoryResult<i64> {
        let mut db = self.begin().await?;
        lock_balances(&mut db, &[user_id]).await?;
        let batches = load_batches(&mut db, user_id).await?;
        let (draws, burned) = plan_draws(&batches, amount, now);
        apply_draws_in(&mut db, user_id, &draws, EntryKind::AdminBurn, reason, None, now).await?;
        db.commit().await?;
        Ok(burned)
    }

    async fn try_reconcile(&self, user_id: &str) -> RepositoryResult<Reconciliation> {
        let mut db = self.begin().await?;
        let cached = lock_balances(&mut db, &[user_id]).await?.remove(0);
        let recomputed: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(remaining_amount), 0)::BIGINT FROM coin_batches WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *db)
        .await?;

        if cached != recomputed {
            sqlx::query("UPDATE coin_balances SET balance = $2, updated_at = NOW() WHERE user_id = $1")
                .bind(user_id)
                .bind(recomputed)
                .execute(&mut *db)
                .await?;
        }
        db.commit().await?;

        Ok(Reconciliation {
            user_id: user_id.to_string(),
            cached,
            recomputed,
        })
    }

    async fn try_reward(
        &self,
        referral_id: Uuid,
        bonus: i64,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<RewardReferralOutcome> {
        let mut db = self.begin().await?;

        let referral = sqlx::query_as::<_, ReferralRow>("SELECT * FROM referrals WHERE id = $1 FOR UPDATE")
            .bind(referral_id)
            .fetch_optional(&mut *db)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("referral {}", referral_id)))?
            .into_domain()?;

        if referral.status == ReferralStatus::Rewarded {
            db.rollback().await?;
            return Ok(RewardReferralOutcome::AlreadyRewarded(referral));
        }

        lock_balances(&mut db, &[referral.referrer_id.as_str(), referral.referee_id.as_str()]).await?;

        let reason = format!("referral bonus for transaction {}", transaction_id);
        for user_id in [&referral.referrer_id, &referral.referee_id] {
            credit_in(
                &mut db,
                user_id,
                bonus,
                EntryKind::ReferralBonus,
                &reason,
                Some(transaction_id),
                now,
                self.ledger.retention(),
            )
            .await?;
        }

        let rewarded = sqlx::query_as::<_, ReferralRow>(
            r#"
            UPDATE referrals
            SET status = 'rewarded', rewarded_transaction_id = $2, rewarded_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(referral_id)
        .bind(transaction_id)
        .bind(now)
        .fetch_one(&mut *db)
        .await?
        .into_domain()?;

        db.commit().await?;
        Ok(RewardReferralOutcome::Rewarded(rewarded))
    }
}

/// Lock (creating if needed) the balance rows of `user_ids`, in sorted order.
/// Returns the balances in the order given.
async fn lock_balances(conn: &mut PgConnection, user_ids: &[&str]) -> RepositoryResult<Vec<i64>> {
    let mut ordered: Vec<&str> = user_ids.to_vec();
    ordered.sort_unstable();
    ordered.dedup();

    for user_id in &ordered {
        sqlx::query("INSERT INTO coin_balances (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("SELECT balance FROM coin_balances WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
    }

    let mut balances = Vec::with_capacity(user_ids.len());
    for user_id in user_ids {
        let balance: i64 = sqlx::query_scalar("SELECT balance FROM coin_balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;
        balances.push(balance);
    }
    Ok(balances)
}

async fn load_batches(conn: &mut PgConnection, user_id: &str) -> RepositoryResult<Vec<CoinBatch>> {
    let rows = sqlx::query_as::<_, BatchRow>(
        r#"
        SELECT id, user_id, original_amount, remaining_amount, earned_at, expires_at
        FROM coin_batches
        WHERE user_id = $1 AND remaining_amount > 0
        ORDER BY earned_at ASC, seq ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(BatchRow::into_domain).collect())
}

#[allow(clippy::too_many_arguments)]
async fn credit_in(
    conn: &mut PgConnection,
    user_id: &str,
    amount: i64,
    kind: EntryKind,
    reason: &str,
    transaction_id: Option<&str>,
    now: DateTime<Utc>,
    retention: Duration,
) -> RepositoryResult<Uuid> {
    let batch = CoinBatch::new(user_id, amount, now, retention);

    sqlx::query(
        r#"
        INSERT INTO coin_batches (id, user_id, original_amount, remaining_amount, earned_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(batch.id)
    .bind(&batch.user_id)
    .bind(batch.original_amount)
    .bind(batch.remaining_amount)
    .bind(batch.earned_at)
    .bind(batch.expires_at)
    .execute(&mut *conn)
    .await?;

    let entry = LedgerEntry::new(user_id, kind, amount, reason, Some(batch.id), transaction_id, now);
    insert_entry(conn, &entry).await?;

    sqlx::query("UPDATE coin_balances SET balance = balance + $2, updated_at = $3 WHERE user_id = $1")
        .bind(user_id)
        .bind(amount)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    Ok(batch.id)
}

async fn redeem_in(
    conn: &mut PgConnection,
    user_id: &str,
    amount: i64,
    reason: &str,
    transaction_id: Option<&str>,
    now: DateTime<Utc>,
) -> RepositoryResult<Vec<BatchDraw>> {
    let batches = load_batches(conn, user_id).await?;
    let draws = plan_redemption(&batches, amount, now).map_err(|available| {
        RepositoryError::InsufficientBalance {
            requested: amount,
            available,
        }
    })?;
    apply_draws_in(conn, user_id, &draws, EntryKind::Redeem, reason, transaction_id, now).await?;
    Ok(draws)
}

async fn apply_draws_in(
    conn: &mut PgConnection,
    user_id: &str,
    draws: &[BatchDraw],
    kind: EntryKind,
    reason: &str,
    transaction_id: Option<&str>,
    now: DateTime<Utc>,
) -> RepositoryResult<()> {
    for draw in draws {
        let updated = sqlx::query(
            "UPDATE coin_batches SET remaining_amount = remaining_amount - $2
             WHERE id = $1 AND remaining_amount >= $2",
        )
        .bind(draw.batch_id)
        .bind(draw.amount)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() != 1 {
            return Err(RepositoryError::Conflict(format!(
                "coin batch {} changed while locked",
                draw.batch_id
            )));
        }

        let entry = LedgerEntry::new(user_id, kind, draw.amount, reason, Some(draw.batch_id), transaction_id, now);
        insert_entry(conn, &entry).await?;
    }

    let total: i64 = draws.iter().map(|draw| draw.amount).sum();
    if total > 0 {
        sqlx::query("UPDATE coin_balances SET balance = balance - $2, updated_at = $3 WHERE user_id = $1")
            .bind(user_id)
            .bind(total)
            .bind(now)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn insert_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> RepositoryResult<()> {
    sqlx::query(
        r#"
        INSERT INTO coin_ledger_entries (id, user_id, kind, amount, reason, batch_id, transaction_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(&entry.user_id)
    .bind(entry.kind.as_str())
    .bind(entry.amount)
    .bind(&entry.reason)
    .bind(entry.batch_id)
    .bind(&entry.transaction_id)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl TransactionRepository for PostgresStore {
    async fn insert(&self, new: &NewTransaction, now: DateTime<Utc>) -> RepositoryResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            INSERT INTO transactions (
                id, payer_id, merchant_id, gross_amount, fiat_amount, coins_applied,
                status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 'initiated', $7, $7)
            RETURNING *
            "#,
        )
        .bind(&new.id)
        .bind(&new.payer_id)
        .bind(&new.merchant_id)
        .bind(&new.gross_amount)
        .bind(&new.fiat_amount)
        .bind(new.coins_applied)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    async fn get(&self, id: &str) -> RepositoryResult<Option<Transaction>> {
        sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(TransactionRow::into_domain)
            .transpose()
    }

    async fn count_successful(&self, payer_id: &str) -> RepositoryResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions WHERE payer_id = $1 AND status = 'success'",
        )
        .bind(payer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn merchant_commission_rate(&self, merchant_id: &str) -> RepositoryResult<Option<BigDecimal>> {
        let rate = sqlx::query_scalar("SELECT commission_rate FROM merchants WHERE merchant_id = $1")
            .bind(merchant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rate)
    }

    async fn mark_failed(&self, id: &str, reason: &str, now: DateTime<Utc>) -> RepositoryResult<FailOutcome> {
        self.retrying("mark_failed", || Box::pin(self.try_mark_failed(id, reason, now)))
            .await
    }

    async fn settle(&self, commit: &SettlementCommit) -> RepositoryResult<SettleOutcome> {
        self.retrying("settle", || Box::pin(self.try_settle(commit))).await
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for PostgresStore {
    async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        kind: EntryKind,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Uuid> {
        self.retrying("credit", || Box::pin(self.try_credit(user_id, amount, kind, reason, now)))
            .await
    }

    async fn redeem(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<BatchDraw>> {
        self.retrying("redeem", || Box::pin(self.try_redeem(user_id, amount, reason, now)))
            .await
    }

    async fn expire_batch(&self, batch_id: Uuid, now: DateTime<Utc>) -> RepositoryResult<i64> {
        self.retrying("expire_batch", || Box::pin(self.try_expire_batch(batch_id, now)))
            .await
    }

    async fn burn(&self, user_id: &str, amount: i64, reason: &str, now: DateTime<Utc>) -> RepositoryResult<i64> {
        self.retrying("burn", || Box::pin(self.try_burn(user_id, amount, reason, now)))
            .await
    }

    async fn balance(&self, user_id: &str) -> RepositoryResult<i64> {
        let balance: Option<i64> = sqlx::query_scalar("SELECT balance FROM coin_balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(balance.unwrap_or(0))
    }

    async fn batches(&self, user_id: &str) -> RepositoryResult<Vec<CoinBatch>> {
        let rows = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT id, user_id, original_amount, remaining_amount, earned_at, expires_at
            FROM coin_batches
            WHERE user_id = $1
            ORDER BY earned_at ASC, seq ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BatchRow::into_domain).collect())
    }

    async fn entries(&self, user_id: &str) -> RepositoryResult<Vec<LedgerEntry>> {
        sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, user_id, kind, amount, reason, batch_id, transaction_id, created_at
            FROM coin_ledger_entries
            WHERE user_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(EntryRow::into_domain)
        .collect()
    }

    async fn due_batches(&self, now: DateTime<Utc>, limit: i64) -> RepositoryResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM coin_batches
            WHERE remaining_amount > 0 AND expires_at <= $1
            ORDER BY expires_at ASC, seq ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn outstanding_liability(&self, now: DateTime<Utc>) -> RepositoryResult<i64> {
        let total = sqlx::query_scalar(
            "SELECT COALESCE(SUM(remaining_amount), 0)::BIGINT FROM coin_batches
             WHERE remaining_amount > 0 AND expires_at > $1",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn reconcile(&self, user_id: &str) -> RepositoryResult<Reconciliation> {
        self.retrying("reconcile", || Box::pin(self.try_reconcile(user_id)))
            .await
    }
}

#[async_trait]
impl ReferralRepository for PostgresStore {
    async fn find_by_referee(&self, referee_id: &str) -> RepositoryResult<Option<Referral>> {
        sqlx::query_as::<_, ReferralRow>("SELECT * FROM referrals WHERE referee_id = $1")
            .bind(referee_id)
            .fetch_optional(&self.pool)
            .await?
            .map(ReferralRow::into_domain)
            .transpose()
    }

    async fn reward(
        &self,
        referral_id: Uuid,
        bonus: i64,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<RewardReferralOutcome> {
        self.retrying("reward_referral", || {
            Box::pin(self.try_reward(referral_id, bonus, transaction_id, now))
        })
        .await
    }
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: String,
    payer_id: String,
    merchant_id: String,
    gross_amount: BigDecimal,
    fiat_amount: BigDecimal,
    coins_applied: i64,
    status: String,
    gateway_reference: Option<String>,
    commission_total: Option<BigDecimal>,
    reward_cost: Option<i64>,
    net_revenue: Option<BigDecimal>,
    coins_earned: Option<i64>,
    reward_bps: Option<i32>,
    reward_degraded: bool,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        Ok(Transaction {
            status: self.status.parse().map_err(RepositoryError::Database)?,
            id: self.id,
            payer_id: self.payer_id,
            merchant_id: self.merchant_id,
            gross_amount: self.gross_amount,
            fiat_amount: self.fiat_amount,
            coins_applied: self.coins_applied,
            gateway_reference: self.gateway_reference,
            commission_total: self.commission_total,
            reward_cost: self.reward_cost,
            net_revenue: self.net_revenue,
            coins_earned: self.coins_earned,
            reward_bps: self.reward_bps,
            reward_degraded: self.reward_degraded,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BatchRow {
    id: Uuid,
    user_id: String,
    original_amount: i64,
    remaining_amount: i64,
    earned_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl BatchRow {
    fn into_domain(self) -> CoinBatch {
        CoinBatch {
            id: self.id,
            user_id: self.user_id,
            original_amount: self.original_amount,
            remaining_amount: self.remaining_amount,
            earned_at: self.earned_at,
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    user_id: String,
    kind: String,
    amount: i64,
    reason: String,
    batch_id: Option<Uuid>,
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl EntryRow {
    fn into_domain(self) -> RepositoryResult<LedgerEntry> {
        Ok(LedgerEntry {
            kind: self.kind.parse().map_err(RepositoryError::Database)?,
            id: self.id,
            user_id: self.user_id,
            amount: self.amount,
            reason: self.reason,
            batch_id: self.batch_id,
            transaction_id: self.transaction_id,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReferralRow {
    id: Uuid,
    referrer_id: String,
    referee_id: String,
    status: String,
    rewarded_transaction_id: Option<String>,
    rewarded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl ReferralRow {
    fn into_domain(self) -> RepositoryResult<Referral> {
        Ok(Referral {
            status: self.status.parse().map_err(RepositoryError::Database)?,
            id: self.id,
            referrer_id: self.referrer_id,
            referee_id: self.referee_id,
            rewarded_transaction_id: self.rewarded_transaction_id,
            rewarded_at: self.rewarded_at,
            created_at: self.created_at,
        })
    }
}
