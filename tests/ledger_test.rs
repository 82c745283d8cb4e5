mod common;

use chrono::{Duration, Utc};

use coinpay_core::adapters::InMemoryStore;
use coinpay_core::domain::EntryKind;
use coinpay_core::ports::LedgerRepository;
use coinpay_core::services::{CoinLedger, ExpiryJob};

use common::{app_state, callback_fields, memory_store, seed_transaction};

/// cached balance == Σ remaining == Σ signed entries
async fn assert_conserved(store: &InMemoryStore, user_id: &str) {
    let balance = store.balance(user_id).await.unwrap();
    let remaining: i64 = store
        .batches(user_id)
        .await
        .unwrap()
        .iter()
        .map(|b| b.remaining_amount)
        .sum();
    let signed: i64 = store
        .entries(user_id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.signed_amount())
        .sum();

    assert!(balance >= 0);
    assert_eq!(balance, remaining, "cached balance vs batches for {}", user_id);
    assert_eq!(balance, signed, "cached balance vs entries for {}", user_id);
}

#[tokio::test]
async fn test_coins_are_conserved_across_every_operation() {
    let store = memory_store();
    let state = app_state(store.clone());
    let long_ago = Utc::now() - Duration::days(120);

    store.credit("u1", 40, EntryKind::Earn, "old purchase", long_ago).await.unwrap();
    state.ledger.earn("u1", 100, "purchase").await.unwrap();
    state.ledger.admin_mint("u1", 25, "goodwill").await.unwrap();
    state.ledger.redeem("u1", 60, "checkout").await.unwrap();
    state.ledger.admin_burn("u1", 10, "correction").await.unwrap();
    state.expiry.sweep(100).await.unwrap();

    seed_transaction(&store, "tx-1", "u1", "200", "180", 20).await;
    state
        .orchestrator
        .settle(&callback_fields("tx-1", "180", "success"))
        .await
        .unwrap();

    assert_conserved(&store, "u1").await;
    assert!(state.ledger.reconcile("u1").await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_redemption_drains_oldest_batches_first() {
    let store = memory_store();
    let ledger = CoinLedger::new(store.clone());
    let now = Utc::now();

    let oldest = store.credit("u1", 30, EntryKind::Earn, "a", now - Duration::days(3)).await.unwrap();
    let middle = store.credit("u1", 30, EntryKind::Earn, "b", now - Duration::days(2)).await.unwrap();
    let newest = store.credit("u1", 30, EntryKind::Earn, "c", now - Duration::days(1)).await.unwrap();

    let draws = ledger.redeem("u1", 45, "checkout").await.unwrap();
    assert_eq!(draws.len(), 2);
    assert_eq!((draws[0].batch_id, draws[0].amount), (oldest, 30));
    assert_eq!((draws[1].batch_id, draws[1].amount), (middle, 15));

    let batches = store.batches("u1").await.unwrap();
    let remaining = |id| batches.iter().find(|b| b.id == id).unwrap().remaining_amount;
    assert_eq!(remaining(oldest), 0);
    assert_eq!(remaining(middle), 15);
    assert_eq!(remaining(newest), 30);

    let redeems = store
        .entries("u1")
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == EntryKind::Redeem)
        .count();
    assert_eq!(redeems, 2);
}

#[tokio::test]
async fn test_expired_coins_cannot_be_redeemed() {
    let store = memory_store();
    let ledger = CoinLedger::new(store.clone());
    store
        .credit("u1", 50, EntryKind::Earn, "stale", Utc::now() - Duration::days(91))
        .await
        .unwrap();
    ledger.earn("u1", 10, "fresh").await.unwrap();

    assert!(ledger.redeem("u1", 20, "checkout").await.is_err());
    assert_eq!(ledger.redeemable("u1", Utc::now()).await.unwrap(), 10);
}

#[tokio::test]
async fn test_admin_burn_leaves_expired_coins_to_the_sweep() {
    let store = memory_store();
    let state = app_state(store.clone());
    store
        .credit("u1", 50, EntryKind::Earn, "stale", Utc::now() - Duration::days(91))
        .await
        .unwrap();
    state.ledger.earn("u1", 10, "fresh").await.unwrap();

    let burn = state.ledger.admin_burn("u1", 40, "clawback").await.unwrap();
    assert_eq!(burn.amount, 10);
    assert_eq!(burn.balance_after, 50);

    assert_eq!(state.expiry.sweep(100).await.unwrap(), 1);
    assert_eq!(store.balance("u1").await.unwrap(), 0);
    assert_conserved(&store, "u1").await;
}

#[tokio::test]
async fn test_expiry_is_idempotent() {
    let store = memory_store();
    let job = ExpiryJob::new(CoinLedger::new(store.clone()), store.clone());
    let long_ago = Utc::now() - Duration::days(100);
    let batch = store.credit("u1", 70, EntryKind::Earn, "old", long_ago).await.unwrap();

    assert_eq!(job.sweep(10).await.unwrap(), 1);
    assert_eq!(job.sweep(10).await.unwrap(), 0);
    assert_eq!(store.expire_batch(batch, Utc::now()).await.unwrap(), 0);

    let expire_entries = store
        .entries("u1")
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == EntryKind::Expire)
        .count();
    assert_eq!(expire_entries, 1);
    assert_eq!(store.balance("u1").await.unwrap(), 0);
    assert_conserved(&store, "u1").await;
}

#[tokio::test]
async fn test_concurrent_redemptions_never_overdraw() {
    let store = memory_store();
    let ledger = CoinLedger::new(store.clone());
    ledger.earn("u1", 100, "seed").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move { ledger.redeem("u1", 15, "checkout").await }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 6);
    assert_eq!(store.balance("u1").await.unwrap(), 10);
    assert_conserved(&store, "u1").await;
}
