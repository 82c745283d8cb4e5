//! Coin batches, ledger entries and the FIFO draw planner.
//!
//! Both storage adapters decide *which* batches an operation touches through
//! [`plan_draws`], so redemption, burn and expiry order is identical no matter
//! where the batches live.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a balance-affecting ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Earn,
    Redeem,
    Expire,
    ReferralBonus,
    AdminMint,
    AdminBurn,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Earn => "earn",
            EntryKind::Redeem => "redeem",
            EntryKind::Expire => "expire",
            EntryKind::ReferralBonus => "referral_bonus",
            EntryKind::AdminMint => "admin_mint",
            EntryKind::AdminBurn => "admin_burn",
        }
    }

    /// Credits create a batch; debits draw down existing ones.
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            EntryKind::Earn | EntryKind::ReferralBonus | EntryKind::AdminMint
        )
    }

    pub fn signed(&self, amount: i64) -> i64 {
        if self.is_credit() {
            amount
        } else {
            -amount
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earn" => Ok(EntryKind::Earn),
            "redeem" => Ok(EntryKind::Redeem),
            "expire" => Ok(EntryKind::Expire),
            "referral_bonus" => Ok(EntryKind::ReferralBonus),
            "admin_mint" => Ok(EntryKind::AdminMint),
            "admin_burn" => Ok(EntryKind::AdminBurn),
            other => Err(format!("unknown ledger entry kind '{}'", other)),
        }
    }
}

/// The still-unconsumed remainder of a single earn event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinBatch {
    pub id: Uuid,
    pub user_id: String,
    pub original_amount: i64,
    pub remaining_amount: i64,
    pub earned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CoinBatch {
    pub fn new(user_id: &str, amount: i64, earned_at: DateTime<Utc>, retention: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            original_amount: amount,
            remaining_amount: amount,
            earned_at,
            expires_at: earned_at + retention,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.remaining_amount > 0 && !self.is_expired_at(now)
    }
}

/// Append-only audit record. `amount` is always a positive magnitude; the
/// direction comes from `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub kind: EntryKind,
    pub amount: i64,
    pub reason: String,
    pub batch_id: Option<Uuid>,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        user_id: &str,
        kind: EntryKind,
        amount: i64,
        reason: &str,
        batch_id: Option<Uuid>,
        transaction_id: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            amount,
            reason: reason.to_string(),
            batch_id,
            transaction_id: transaction_id.map(str::to_string),
            created_at,
        }
    }

    pub fn signed_amount(&self) -> i64 {
        self.kind.signed(self.amount)
    }
}

/// A portion taken out of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchDraw {
    pub batch_id: Uuid,
    pub amount: i64,
}

/// Sort batches into consumption order: oldest `earned_at` first. The sort is
/// stable so equal timestamps keep their insertion order.
pub fn fifo_order(batches: &mut [CoinBatch]) {
    batches.sort_by_key(|batch| batch.earned_at);
}

/// Coins still spendable at `now`: remaining amounts of unexpired batches.
/// Expired coins are never drawn, even before the sweep reaches them.
pub fn drawable(batches: &[CoinBatch], now: DateTime<Utc>) -> i64 {
    batches
        .iter()
        .filter(|batch| batch.is_redeemable_at(now))
        .map(|batch| batch.remaining_amount)
        .sum()
}

/// Walk `batches` (already in FIFO order) and take up to `amount`, partially
/// draining a batch before moving on. Returns the draws and the total taken,
/// which is less than `amount` only when the unexpired batches run out.
pub fn plan_draws(batches: &[CoinBatch], amount: i64, now: DateTime<Utc>) -> (Vec<BatchDraw>, i64) {
    let mut draws = Vec::new();
    let mut outstanding = amount.max(0);

    for batch in batches.iter().filter(|batch| batch.is_redeemable_at(now)) {
        if outstanding == 0 {
            break;
        }
        let take = batch.remaining_amount.min(outstanding);
        draws.push(BatchDraw {
            batch_id: batch.id,
            amount: take,
        });
        outstanding -= take;
    }

    (draws, amount.max(0) - outstanding)
}

/// All-or-nothing variant used by redemption: `Err(available)` when the
/// unexpired batches cannot cover `amount`.
pub fn plan_redemption(
    batches: &[CoinBatch],
    amount: i64,
    now: DateTime<Utc>,
) -> Result<Vec<BatchDraw>, i64> {
    let available = drawable(batches, now);
    if available < amount {
        return Err(available);
    }
    let (draws, _) = plan_draws(batches, amount, now);
    Ok(draws)
}

/// Cached balance versus the balance recomputed from batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub user_id: String,
    pub cached: i64,
    pub recomputed: i64,
}

impl Reconciliation {
    pub fn drift(&self) -> i64 {
        self.cached - self.recomputed
    }

    pub fn is_consistent(&self) -> bool {
        self.drift() == 0
    }
}
