//! Dynamic earn percentage for a qualifying payment.
//!
//! All arithmetic is in basis points so the result is exact and the clamp
//! bounds are plain integers.

use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};
use serde::Serialize;

use crate::config::RewardConfig;
use crate::ports::{LedgerRepository, RepositoryResult, TransactionRepository};

const BPS_PER_UNIT: i64 = 10_000;

/// A reward rate in basis points, always within `[MIN, MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RewardPercentage(u32);

impl RewardPercentage {
    pub const MIN: RewardPercentage = RewardPercentage(200);
    pub const MAX: RewardPercentage = RewardPercentage(1_000);

    pub fn clamped(bps: i64) -> Self {
        let bps = bps.clamp(Self::MIN.0 as i64, Self::MAX.0 as i64);
        RewardPercentage(bps as u32)
    }

    pub fn basis_points(&self) -> u32 {
        self.0
    }

    /// The rate as a fraction, e.g. `0.1` for 1000 bps.
    pub fn as_decimal(&self) -> BigDecimal {
        BigDecimal::from(self.0) / BigDecimal::from(BPS_PER_UNIT)
    }

    /// `floor(fiat × rate)`. For non-negative `x`,
    /// `floor(floor(x) / n) == floor(x / n)`, so truncating the scaled amount
    /// first keeps the result exact. `None` when the scaled amount does not
    /// fit in an `i64`.
    pub fn coins_for(&self, fiat_amount: &BigDecimal) -> Option<i64> {
        let scaled = (fiat_amount * &BigDecimal::from(self.0)).with_scale(0);
        scaled.to_i64().map(|units| units.max(0) / BPS_PER_UNIT)
    }
}

/// Rate plus whether it came from the safe fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RewardQuote {
    pub percentage: RewardPercentage,
    pub degraded: bool,
}

/// Live inputs the policy reads.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardFactors {
    pub prior_successes: i64,
    pub outstanding_liability: i64,
    pub fiat_amount: BigDecimal,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait RewardInputs: Send + Sync {
    async fn prior_successes(&self, user_id: &str) -> RepositoryResult<i64>;
    async fn outstanding_liability(&self, now: DateTime<Utc>) -> RepositoryResult<i64>;
}

/// Reads reward inputs straight from the stores, every time (no snapshot).
pub struct StoreRewardInputs {
    transactions: Arc<dyn TransactionRepository>,
    ledger: Arc<dyn LedgerRepository>,
}

impl StoreRewardInputs {
    pub fn new(transactions: Arc<dyn TransactionRepository>, ledger: Arc<dyn LedgerRepository>) -> Self {
        Self { transactions, ledger }
    }
}

#[async_trait]
impl RewardInputs for StoreRewardInputs {
    async fn prior_successes(&self, user_id: &str) -> RepositoryResult<i64> {
        self.transactions.count_successful(user_id).await
    }

    async fn outstanding_liability(&self, now: DateTime<Utc>) -> RepositoryResult<i64> {
        self.ledger.outstanding_liability(now).await
    }
}

#[derive(Clone)]
pub struct RewardPolicy {
    config: RewardConfig,
    inputs: Arc<dyn RewardInputs>,
}

impl RewardPolicy {
    pub fn new(config: RewardConfig, inputs: Arc<dyn RewardInputs>) -> Self {
        Self { config, inputs }
    }

    pub async fn compute_reward_percentage(
        &self,
        user_id: &str,
        fiat_amount: &BigDecimal,
        now: DateTime<Utc>,
    ) -> RewardQuote {
        let prior = self.inputs.prior_successes(user_id).await;
        let liability = self.inputs.outstanding_liability(now).await;

        match (prior, liability) {
            (Ok(prior_successes), Ok(outstanding_liability)) => RewardQuote {
                percentage: self.evaluate(&RewardFactors {
                    prior_successes,
                    outstanding_liability,
                    fiat_amount: fiat_amount.clone(),
                    at: now,
                }),
                degraded: false,
            },
            (prior, liability) => {
                let error = prior
                    .err()
                    .or(liability.err())
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                tracing::warn!(
                    user_id = %user_id,
                    error = %error,
                    "reward inputs unavailable, falling back to maximum rate"
                );
                RewardQuote {
                    percentage: RewardPercentage::MAX,
                    degraded: true,
                }
            }
        }
    }

    pub fn evaluate(&self, factors: &RewardFactors) -> RewardPercentage {
        let mut bps = base_bps(factors.prior_successes);

        if factors.outstanding_liability > self.config.liability_threshold {
            bps -= 200;
        }

        if factors.fiat_amount >= self.config.high_value_threshold {
            bps += 100;
        } else if factors.fiat_amount < self.config.micro_threshold {
            bps -= 200;
        }

        let local = self.local_time(factors.at);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            bps += 50;
        }
        if self.is_off_peak(local.hour()) {
            bps += 50;
        }

        RewardPercentage::clamped(bps)
    }

    fn local_time(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(self.config.utc_offset_minutes * 60).unwrap_or(Utc.fix());
        at.with_timezone(&offset)
    }

    /// `[start, end)`; a window with `start > end` wraps past midnight.
    fn is_off_peak(&self, hour: u32) -> bool {
        let (start, end) = (self.config.off_peak_start_hour, self.config.off_peak_end_hour);
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

fn base_bps(prior_successes: i64) -> i64 {
    match prior_successes {
        i64::MIN..=1 => 1_000,
        2..=5 => 900,
        6..=20 => 800,
        _ => 700,
    }
}
