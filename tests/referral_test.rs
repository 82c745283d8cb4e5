mod common;

use bigdecimal::BigDecimal;

use coinpay_core::domain::{EntryKind, ReferralStatus};
use coinpay_core::ports::LedgerRepository;
use coinpay_core::services::ReferralOutcome;

use common::{app_state, memory_store};

#[tokio::test]
async fn test_concurrent_triggers_pay_exactly_once() {
    let store = memory_store();
    let state = app_state(store.clone());
    let referral = store.seed_referral("alice", "bob").await;

    let mut handles = Vec::new();
    for i in 0..12 {
        let engine = state.referrals.clone();
        handles.push(tokio::spawn(async move {
            engine
                .process("bob", &format!("tx-{}", i), &BigDecimal::from(250))
                .await
        }));
    }

    let mut rewarded = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ReferralOutcome::Rewarded { .. } => rewarded += 1,
            ReferralOutcome::AlreadyRewarded => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(rewarded, 1);

    for user in ["alice", "bob"] {
        assert_eq!(store.balance(user).await.unwrap(), 50);
        let bonuses = store
            .entries(user)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntryKind::ReferralBonus)
            .count();
        assert_eq!(bonuses, 1);
    }

    let stored = store.referral(referral.id).await.unwrap();
    assert_eq!(stored.status, ReferralStatus::Rewarded);
    assert!(stored.rewarded_transaction_id.is_some());
}

#[tokio::test]
async fn test_minimum_is_inclusive() {
    let store = memory_store();
    let state = app_state(store.clone());
    store.seed_referral("alice", "bob").await;

    let outcome = state
        .referrals
        .process("bob", "tx-1", &BigDecimal::from(100))
        .await
        .unwrap();

    assert!(matches!(outcome, ReferralOutcome::Rewarded { bonus: 50, .. }));
}
