pub mod expiry;
pub mod ledger;
pub mod notifier;
pub mod referral;
pub mod reward_policy;
pub mod settlement;
pub mod signature;

pub use expiry::ExpiryJob;
pub use ledger::{AdminAdjustment, CoinLedger, CoinSummary};
pub use notifier::{HttpNotifier, NoopNotifier, Notification, Notifier};
pub use referral::{ReferralEngine, ReferralOutcome};
pub use reward_policy::{RewardPercentage, RewardPolicy, RewardQuote, StoreRewardInputs};
pub use settlement::{CallbackOutcome, SettlementOrchestrator};
pub use signature::SignatureVerifier;
