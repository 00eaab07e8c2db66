/// Property-based tests for ledger invariants using proptest
///
/// Random sequences of credits, debits, transfers and gifts are applied to a
/// small set of users. Whatever succeeds or fails, every wallet must stay
/// non-negative, match the sum of its entries, and transfers/gifts must
/// conserve the total supply.
use credits_ledger::ledger::{EntryType, LedgerError, LedgerService};
use credits_ledger::payments::credits_to_deduct;
use credits_ledger::store::{LedgerStore, MemoryLedgerStore};
use proptest::prelude::*;

const USERS: i64 = 4;

#[derive(Debug, Clone)]
enum Op {
    Credit(i64, i64),
    Debit(i64, i64),
    Transfer(i64, i64, i64),
    Gift(i64, i64, &'static str, i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let user = 1..=USERS;
    prop_oneof![
        (user.clone(), 1i64..500).prop_map(|(u, a)| Op::Credit(u, a)),
        (user.clone(), 1i64..500).prop_map(|(u, a)| Op::Debit(u, a)),
        (user.clone(), user.clone(), 1i64..300).prop_map(|(f, t, a)| Op::Transfer(f, t, a)),
        (
            user.clone(),
            user,
            prop::sample::select(vec!["rose", "heart", "coffee", "crown"]),
            1i64..5
        )
            .prop_map(|(f, t, g, q)| Op::Gift(f, t, g, q)),
    ]
}

async fn apply(ledger: &LedgerService<MemoryLedgerStore>, op: &Op) -> Result<i64, LedgerError> {
    // Returns the change in total supply
    match *op {
        Op::Credit(u, a) => ledger
            .credit(u, a, EntryType::Deposit, None, None, None)
            .await
            .map(|_| a),
        Op::Debit(u, a) => ledger
            .debit(u, a, EntryType::Withdrawal, None, None, None)
            .await
            .map(|_| -a),
        Op::Transfer(f, t, a) => ledger.transfer(f, t, a, None).await.map(|_| 0),
        Op::Gift(f, t, g, q) => ledger.send_gift(f, t, g, Some(q), None).await.map(|_| 0),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_balances_match_ledger(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let ledger = LedgerService::with_defaults(MemoryLedgerStore::new());
            let mut expected_supply = 0i64;

            for op in &ops {
                let balances_before = balances(&ledger).await;
                let entries_before = ledger.store().entry_count().await;
                match apply(&ledger, op).await {
                    Ok(delta) => expected_supply += delta,
                    Err(_) => {
                        // Rejected operations leave no trace
                        prop_assert_eq!(balances(&ledger).await, balances_before);
                        prop_assert_eq!(ledger.store().entry_count().await, entries_before);
                    }
                }
            }

            let mut supply = 0;
            for user in 1..=USERS {
                let report = ledger.audit(user).await.unwrap();
                prop_assert!(report.balance >= 0);
                prop_assert!(report.is_consistent(), "audit failed for user {}: {:?}", user, report);
                supply += report.balance;
            }
            prop_assert_eq!(supply, expected_supply);
            Ok(())
        })?;
    }

    #[test]
    fn test_refund_credits_never_exceed_purchase(
        original in 1i64..1_000_000,
        credits in 1i64..1_000_000,
        refund_ratio in 0.0f64..=1.0,
    ) {
        let refund = ((original as f64) * refund_ratio).round() as i64;
        let deducted = credits_to_deduct(refund, original, credits);
        prop_assert!(deducted >= 0);
        prop_assert!(deducted <= credits);
        if refund == original {
            prop_assert_eq!(deducted, credits);
        }
    }

    #[test]
    fn test_refund_credits_monotonic(
        original in 1i64..100_000,
        credits in 1i64..100_000,
        a in 0i64..100_000,
        b in 0i64..100_000,
    ) {
        let (low, high) = (a.min(b).min(original), a.max(b).min(original));
        prop_assert!(
            credits_to_deduct(low, original, credits) <= credits_to_deduct(high, original, credits)
        );
    }
}

async fn balances(ledger: &LedgerService<MemoryLedgerStore>) -> Vec<i64> {
    let mut out = Vec::new();
    for user in 1..=USERS {
        out.push(
            ledger
                .store()
                .find_wallet(user)
                .await
                .unwrap()
                .map_or(0, |w| w.balance),
        );
    }
    out
}
