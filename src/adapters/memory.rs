//! In-memory implementation of every repository port.
//!
//! One async mutex guards the whole state, so each operation is a single
//! critical section. Used by the test suites and for running the service
//! without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::coins::{drawable, fifo_order, plan_draws, plan_redemption};
use crate::domain::{
    BatchDraw, CoinBatch, EntryKind, FailOutcome, LedgerEntry, NewTransaction,
    Reconciliation, Referral, ReferralStatus, SettleOutcome, SettlementCommit, Transaction,
    TransactionStatus,
};
use crate::ports::{
    LedgerRepository, ReferralRepository, RepositoryError, RepositoryResult, RewardReferralOutcome,
    TransactionRepository,
};

pub struct InMemoryStore {
    retention: Duration,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    transactions: HashMap<String, Transaction>,
    merchants: HashMap<String, BigDecimal>,
    balances: HashMap<String, i64>,
    // Insertion order doubles as the FIFO tie-breaker.
    batches: Vec<CoinBatch>,
    entries: Vec<LedgerEntry>,
    referrals: HashMap<Uuid, Referral>,
}

impl InMemoryStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub async fn set_merchant_rate(&self, merchant_id: &str, rate: BigDecimal) {
        self.state
            .lock()
            .await
            .merchants
            .insert(merchant_id.to_string(), rate);
    }

    /// Referrals are created at signup, outside this service.
    pub async fn seed_referral(&self, referrer_id: &str, referee_id: &str) -> Referral {
        let referral = Referral::pending(referrer_id, referee_id, Utc::now());
        self.state
            .lock()
            .await
            .referrals
            .insert(referral.id, referral.clone());
        referral
    }

    pub async fn referral(&self, id: Uuid) -> Option<Referral> {
        self.state.lock().await.referrals.get(&id).cloned()
    }
}

impl MemoryState {
    fn user_batches(&self, user_id: &str) -> Vec<CoinBatch> {
        let mut batches: Vec<CoinBatch> = self
            .batches
            .iter()
            .filter(|batch| batch.user_id == user_id)
            .cloned()
            .collect();
        fifo_order(&mut batches);
        batches
    }

    fn balance(&self, user_id: &str) -> i64 {
        self.balances.get(user_id).copied().unwrap_or(0)
    }

    #[allow(clippy::too_many_arguments)]
    fn credit(
        &mut self,
        user_id: &str,
        amount: i64,
        kind: EntryKind,
        reason: &str,
        transaction_id: Option<&str>,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Uuid {
        let batch = CoinBatch::new(user_id, amount, now, retention);
        let batch_id = batch.id;
        self.batches.push(batch);
        self.entries.push(LedgerEntry::new(
            user_id,
            kind,
            amount,
            reason,
            Some(batch_id),
            transaction_id,
            now,
        ));
        *self.balances.entry(user_id.to_string()).or_insert(0) += amount;
        batch_id
    }

    fn apply_draws(
        &mut self,
        user_id: &str,
        draws: &[BatchDraw],
        kind: EntryKind,
        reason: &str,
        transaction_id: Option<&str>,
        now: DateTime<Utc>,
    ) {
        for draw in draws {
            if let Some(batch) = self.batches.iter_mut().find(|b| b.id == draw.batch_id) {
                batch.remaining_amount -= draw.amount;
            }
            self.entries.push(LedgerEntry::new(
                user_id,
                kind,
                draw.amount,
                reason,
                Some(draw.batch_id),
                transaction_id,
                now,
            ));
        }
        let total: i64 = draws.iter().map(|draw| draw.amount).sum();
        *self.balances.entry(user_id.to_string()).or_insert(0) -= total;
    }

    fn redeem(
        &mut self,
        user_id: &str,
        amount: i64,
        reason: &str,
        transaction_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<BatchDraw>> {
        let batches = self.user_batches(user_id);
        let draws = plan_redemption(&batches, amount, now).map_err(|available| {
            RepositoryError::InsufficientBalance {
                requested: amount,
                available,
            }
        })?;
        self.apply_draws(user_id, &draws, EntryKind::Redeem, reason, transaction_id, now);
        Ok(draws)
    }

    fn fail(&mut self, id: &str, reason: &str, now: DateTime<Utc>) -> RepositoryResult<FailOutcome> {
        let tx = self
            .transactions
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("transaction {}", id)))?;
        if tx.status.is_terminal() {
            return Ok(FailOutcome::AlreadyTerminal(tx.clone()));
        }
        tx.status = TransactionStatus::Failed;
        tx.failure_reason = Some(reason.to_string());
        tx.updated_at = now;
        Ok(FailOutcome::Failed(tx.clone()))
    }
}

#[async_trait]
impl TransactionRepository for InMemoryStore {
    async fn insert(&self, new: &NewTransaction, now: DateTime<Utc>) -> RepositoryResult<Transaction> {
        let mut state = self.state.lock().await;
        if state.transactions.contains_key(&new.id) {
            return Err(RepositoryError::Conflict(format!("transaction {} already exists", new.id)));
        }
        let tx = Transaction::initiated(new.clone(), now);
        state.transactions.insert(tx.id.clone(), tx.clone());
        Ok(tx)
    }

    async fn get(&self, id: &str) -> RepositoryResult<Option<Transaction>> {
        Ok(self.state.lock().await.transactions.get(id).cloned())
    }

    async fn count_successful(&self, payer_id: &str) -> RepositoryResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|tx| tx.payer_id == payer_id && tx.status == TransactionStatus::Success)
            .count() as i64)
    }

    async fn merchant_commission_rate(&self, merchant_id: &str) -> RepositoryResult<Option<BigDecimal>> {
        Ok(self.state.lock().await.merchants.get(merchant_id).cloned())
    }

    async fn mark_failed(&self, id: &str, reason: &str, now: DateTime<Utc>) -> RepositoryResult<FailOutcome> {
        self.state.lock().await.fail(id, reason, now)
    }

    async fn settle(&self, commit: &SettlementCommit) -> RepositoryResult<SettleOutcome> {
        let mut state = self.state.lock().await;
        let tx = state
            .transactions
            .get(&commit.transaction_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("transaction {}", commit.transaction_id)))?;

        if tx.status.is_terminal() {
            return Ok(SettleOutcome::AlreadyProcessed(tx));
        }

        let now = commit.settled_at;
        if tx.coins_applied > 0 {
            // Check before touching anything so a shortfall leaves no trace.
            let available = drawable(&state.user_batches(&tx.payer_id), now);
            if available < tx.coins_applied {
                return match state.fail(&tx.id, "insufficient_balance", now)? {
                    FailOutcome::Failed(failed) => Ok(SettleOutcome::InsufficientBalance(failed)),
                    FailOutcome::AlreadyTerminal(done) => Ok(SettleOutcome::AlreadyProcessed(done)),
                };
            }
            let reason = format!("redeemed against transaction {}", tx.id);
            state.redeem(&tx.payer_id, tx.coins_applied, &reason, Some(&tx.id), now)?;
        }

        if commit.coins_earned > 0 {
            let reason = format!("earned on transaction {}", tx.id);
            state.credit(
                &tx.payer_id,
                commit.coins_earned,
                EntryKind::Earn,
                &reason,
                Some(&tx.id),
                now,
                self.retention,
            );
        }

        let settled = state
            .transactions
            .get_mut(&commit.transaction_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("transaction {}", commit.transaction_id)))?;
        settled.status = TransactionStatus::Success;
        settled.gateway_reference = commit.gateway_reference.clone();
        settled.commission_total = Some(commit.commission_total.clone());
        settled.reward_cost = Some(commit.reward_cost);
        settled.net_revenue = Some(commit.net_revenue.clone());
        settled.coins_earned = Some(commit.coins_earned);
        settled.reward_bps = Some(commit.reward_bps);
        settled.reward_degraded = commit.reward_degraded;
        settled.updated_at = now;

        Ok(SettleOutcome::Settled(settled.clone()))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for InMemoryStore {
    async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        kind: EntryKind,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Uuid> {
        let mut state = self.state.lock().await;
        Ok(state.credit(user_id, amount, kind, reason, None, now, self.retention))
    }

    async fn redeem(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<BatchDraw>> {
        self.state.lock().await.redeem(user_id, amount, reason, None, now)
    }

    async fn expire_batch(&self, batch_id: Uuid, now: DateTime<Utc>) -> RepositoryResult<i64> {
        let mut state = self.state.lock().await;
        let batch = state
            .batches
            .iter_mut()
            .find(|batch| batch.id == batch_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("coin batch {}", batch_id)))?;

        if batch.remaining_amount == 0 || !batch.is_expired_at(now) {
            return Ok(0);
        }

        let expired = batch.remaining_amount;
        batch.remaining_amount = 0;
        let user_id = batch.user_id.clone();
        state.entries.push(LedgerEntry::new(
            &user_id,
            EntryKind::Expire,
            expired,
            "retention window elapsed",
            Some(batch_id),
            None,
            now,
        ));
        *state.balances.entry(user_id).or_insert(0) -= expired;
        Ok(expired)
    }

    async fn burn(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let mut state = self.state.lock().await;
        let batches = state.user_batches(user_id);
        let (draws, burned) = plan_draws(&batches, amount, now);
        state.apply_draws(user_id, &draws, EntryKind::AdminBurn, reason, None, now);
        Ok(burned)
    }

    async fn balance(&self, user_id: &str) -> RepositoryResult<i64> {
        Ok(self.state.lock().await.balance(user_id))
    }

    async fn batches(&self, user_id: &str) -> RepositoryResult<Vec<CoinBatch>> {
        Ok(self.state.lock().await.user_batches(user_id))
    }

    async fn entries(&self, user_id: &str) -> RepositoryResult<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn due_batches(&self, now: DateTime<Utc>, limit: i64) -> RepositoryResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut due: Vec<&CoinBatch> = state
            .batches
            .iter()
            .filter(|batch| batch.remaining_amount > 0 && batch.is_expired_at(now))
            .collect();
        due.sort_by_key(|batch| batch.expires_at);
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|batch| batch.id)
            .collect())
    }

    async fn outstanding_liability(&self, now: DateTime<Utc>) -> RepositoryResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .batches
            .iter()
            .filter(|batch| batch.is_redeemable_at(now))
            .map(|batch| batch.remaining_amount)
            .sum())
    }

    async fn reconcile(&self, user_id: &str) -> RepositoryResult<Reconciliation> {
        let mut state = self.state.lock().await;
        let cached = state.balance(user_id);
        let recomputed: i64 = state
            .batches
            .iter()
            .filter(|batch| batch.user_id == user_id)
            .map(|batch| batch.remaining_amount)
            .sum();
        state.balances.insert(user_id.to_string(), recomputed);
        Ok(Reconciliation {
            user_id: user_id.to_string(),
            cached,
            recomputed,
        })
    }
}

#[async_trait]
impl ReferralRepository for InMemoryStore {
    async fn find_by_referee(&self, referee_id: &str) -> RepositoryResult<Option<Referral>> {
        let state = self.state.lock().await;
        Ok(state
            .referrals
            .values()
            .find(|referral| referral.referee_id == referee_id)
            .cloned())
    }

    async fn reward(
        &self,
        referral_id: Uuid,
        bonus: i64,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<RewardReferralOutcome> {
        let mut state = self.state.lock().await;
        let referral = state
            .referrals
            .get(&referral_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("referral {}", referral_id)))?;

        if referral.status == ReferralStatus::Rewarded {
            return Ok(RewardReferralOutcome::AlreadyRewarded(referral));
        }

        let reason = format!("referral bonus for transaction {}", transaction_id);
        for user_id in [&referral.referrer_id, &referral.referee_id] {
            state.credit(
                user_id,
                bonus,
                EntryKind::ReferralBonus,
                &reason,
                Some(transaction_id),
                now,
                self.retention,
            );
        }

        let rewarded = Referral {
            status: ReferralStatus::Rewarded,
            rewarded_transaction_id: Some(transaction_id.to_string()),
            rewarded_at: Some(now),
            ..referral
        };
        state.referrals.insert(referral_id, rewarded.clone());
        Ok(RewardReferralOutcome::Rewarded(rewarded))
    }
}
