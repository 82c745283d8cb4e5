pub mod coins;
pub mod referral;
pub mod transaction;

pub use coins::{BatchDraw, CoinBatch, EntryKind, LedgerEntry, Reconciliation};
pub use referral::{Referral, ReferralStatus};
pub use transaction::{
    FailOutcome, NewTransaction, SettleOutcome, SettlementCommit, Transaction, TransactionStatus,
};
