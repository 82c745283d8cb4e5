//! Referral relationship between two users.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Rewarded,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Pending => "pending",
            ReferralStatus::Rewarded => "rewarded",
        }
    }
}

impl FromStr for ReferralStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReferralStatus::Pending),
            "rewarded" => Ok(ReferralStatus::Rewarded),
            other => Err(format!("unknown referral status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referral {
    pub id: Uuid,
    pub referrer_id: String,
    pub referee_id: String,
    pub status: ReferralStatus,
    pub rewarded_transaction_id: Option<String>,
    pub rewarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Referral {
    pub fn pending(referrer_id: &str, referee_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            referrer_id: referrer_id.to_string(),
            referee_id: referee_id.to_string(),
            status: ReferralStatus::Pending,
            rewarded_transaction_id: None,
            rewarded_at: None,
            created_at: now,
        }
    }
}
