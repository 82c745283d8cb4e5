use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::time::sleep;

use crate::error::AppError;
use crate::ports::LedgerRepository;
use crate::services::ledger::CoinLedger;

/// Upper bound on a single sweep, whatever the caller asks for.
pub const MAX_BATCH_LIMIT: i64 = 10_000;

/// Expires coin batches whose retention window has passed. Destructive:
/// only reachable through internal-token routes, the CLI and the schedule.
#[derive(Clone)]
pub struct ExpiryJob {
    ledger: CoinLedger,
    store: Arc<dyn LedgerRepository>,
}

impl ExpiryJob {
    pub fn new(ledger: CoinLedger, store: Arc<dyn LedgerRepository>) -> Self {
        Self { ledger, store }
    }

    pub async fn sweep(&self, batch_limit: i64) -> Result<usize, AppError> {
        self.sweep_at(Utc::now(), batch_limit).await
    }

    /// Expire at most `batch_limit` due batches, oldest first, and return how
    /// many actually transitioned. Safe to re-run: drained batches are skipped.
    pub async fn sweep_at(&self, now: DateTime<Utc>, batch_limit: i64) -> Result<usize, AppError> {
        if batch_limit <= 0 {
            return Err(AppError::Validation("batchLimit: must be greater than zero".to_string()));
        }
        let limit = batch_limit.min(MAX_BATCH_LIMIT);

        let due = self.store.due_batches(now, limit).await?;
        let mut expired = 0usize;
        let mut coins = 0i64;
        for batch_id in due {
            let amount = self.ledger.expire_batch(batch_id, now).await?;
            if amount > 0 {
                expired += 1;
                coins += amount;
            }
        }

        tracing::info!(expired, coins, limit, "expiry sweep finished");
        Ok(expired)
    }
}

/// Run `job` on the given cron schedule until the task is dropped.
pub async fn run_scheduled(job: ExpiryJob, expression: String, batch_limit: i64) -> anyhow::Result<()> {
    let schedule = Schedule::from_str(&expression)?;
    tracing::info!(schedule = %expression, "coin expiry schedule started");

    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            tracing::warn!(schedule = %expression, "cron schedule has no upcoming run, stopping");
            return Ok(());
        };

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        sleep(wait).await;

        if let Err(e) = job.sweep(batch_limit).await {
            tracing::error!(error = %e, "scheduled expiry sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;
    use crate::domain::EntryKind;
    use chrono::Duration;

    async fn job_with_store() -> (ExpiryJob, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new(Duration::days(90)));
        let job = ExpiryJob::new(CoinLedger::new(store.clone()), store.clone());
        (job, store)
    }

    #[tokio::test]
    async fn test_sweep_respects_limit_and_is_rerunnable() {
        let (job, store) = job_with_store().await;
        let long_ago = Utc::now() - Duration::days(120);
        for user in ["u1", "u2", "u3"] {
            store.credit(user, 10, EntryKind::Earn, "old", long_ago).await.unwrap();
        }
        store.credit("u1", 5, EntryKind::Earn, "fresh", Utc::now()).await.unwrap();

        assert_eq!(job.sweep(2).await.unwrap(), 2);
        assert_eq!(job.sweep(10).await.unwrap(), 1);
        assert_eq!(job.sweep(10).await.unwrap(), 0);

        assert_eq!(store.balance("u1").await.unwrap(), 5);
        assert_eq!(store.balance("u2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_is_rejected() {
        let (job, _) = job_with_store().await;
        assert!(matches!(job.sweep(0).await, Err(AppError::Validation(_))));
    }
}
