//! Transaction domain entity.
//! Framework-agnostic representation of one payment attempt.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `initiated → success | failed`; both outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Initiated,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "initiated",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Initiated)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(TransactionStatus::Initiated),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

/// Domain entity representing a payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub payer_id: String,
    pub merchant_id: String,
    pub gross_amount: BigDecimal,
    pub fiat_amount: BigDecimal,
    pub coins_applied: i64,
    pub status: TransactionStatus,
    pub gateway_reference: Option<String>,
    pub commission_total: Option<BigDecimal>,
    pub reward_cost: Option<i64>,
    pub net_revenue: Option<BigDecimal>,
    pub coins_earned: Option<i64>,
    pub reward_bps: Option<i32>,
    pub reward_degraded: bool,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for a new `initiated` transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub id: String,
    pub payer_id: String,
    pub merchant_id: String,
    pub gross_amount: BigDecimal,
    pub fiat_amount: BigDecimal,
    pub coins_applied: i64,
}

impl Transaction {
    pub fn initiated(new: NewTransaction, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            payer_id: new.payer_id,
            merchant_id: new.merchant_id,
            gross_amount: new.gross_amount,
            fiat_amount: new.fiat_amount,
            coins_applied: new.coins_applied,
            status: TransactionStatus::Initiated,
            gateway_reference: None,
            commission_total: None,
            reward_cost: None,
            net_revenue: None,
            coins_earned: None,
            reward_bps: None,
            reward_degraded: false,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Figures computed for a successful settlement, written together with the
/// ledger effects in one atomic unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementCommit {
    pub transaction_id: String,
    pub gateway_reference: Option<String>,
    pub coins_earned: i64,
    pub reward_bps: i32,
    pub reward_degraded: bool,
    pub commission_total: BigDecimal,
    pub reward_cost: i64,
    pub net_revenue: BigDecimal,
    pub settled_at: DateTime<Utc>,
}

/// Result of attempting the `initiated → success` transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    Settled(Transaction),
    /// Another delivery already moved the transaction to a terminal state.
    AlreadyProcessed(Transaction),
    /// Redemption could not be backed; the transaction is now `failed` and no
    /// ledger row was written.
    InsufficientBalance(Transaction),
}

/// Result of the `initiated → failed` transition.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    Failed(Transaction),
    AlreadyTerminal(Transaction),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing() {
        assert_eq!("success".parse::<TransactionStatus>(), Ok(TransactionStatus::Success));
        assert!("completed".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn only_initiated_is_open() {
        assert!(!TransactionStatus::Initiated.is_terminal());
        assert!(TransactionStatus::Success.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
    }

    #[test]
    fn new_transaction_starts_initiated() {
        let tx = Transaction::initiated(
            NewTransaction {
                id: "tx-1".to_string(),
                payer_id: "payer".to_string(),
                merchant_id: "merchant".to_string(),
                gross_amount: BigDecimal::from(100),
                fiat_amount: BigDecimal::from(80),
                coins_applied: 20,
            },
            Utc::now(),
        );
        assert_eq!(tx.status, TransactionStatus::Initiated);
        assert!(tx.commission_total.is_none());
        assert!(!tx.reward_degraded);
    }
}
