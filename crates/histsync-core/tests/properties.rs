use histsync_core::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use histsync_core::clean::{Cleaner, DefaultCleaner};
use histsync_core::fetch::{FetchPolicy, Fetcher};
use histsync_core::merge::{DefaultMerger, Merger};
use histsync_core::model::{Change, Roster, Timestamp, Transaction};
use histsync_core::store::{AuthorFilter, Store};
use histsync_core::view::{MaterializedView, ViewContext};
use proptest::prelude::*;
use serde_json::json;

const AUTHORS: [&str; 4] = ["a0", "a1", "a2", "outsider"];

fn arb_change() -> impl Strategy<Value = Change> {
    (0..4u8, prop::bool::weighted(0.8), 0..100i64).prop_map(|(entity, upsert, value)| {
        let id = format!("e{entity}");
        if upsert {
            Change::upsert(id, json!(value))
        } else {
            Change::delete(id)
        }
    })
}

/// Ascending transactions as a fetcher would return them.
fn arb_batch() -> impl Strategy<Value = Vec<Transaction>> {
    prop::collection::vec((1..1_000i64, prop::collection::vec(arb_change(), 1..4)), 0..12)
        .prop_map(|items| {
            let mut ts = 1_000_000i64;
            items
                .into_iter()
                .enumerate()
                .map(|(i, (gap, changes))| {
                    ts += gap;
                    Transaction {
                        seq: i64::try_from(i).unwrap_or(i64::MAX) + 1,
                        author: "peer".to_string(),
                        timestamp: Timestamp::from_micros(ts),
                        changes,
                    }
                })
                .collect()
        })
}

fn apply_all(view: &mut MaterializedView, batch: &[Transaction]) {
    for tx in batch {
        view.apply_transaction(tx).expect("apply");
    }
}

fn seeded_log(commits: &[(usize, i64)]) -> Store {
    let mut store = Store::open_in_memory().expect("open");
    let mut ts = 0i64;
    for (i, (author, gap)) in commits.iter().enumerate() {
        ts += gap;
        store
            .commit(
                AUTHORS[*author],
                &[Change::upsert(format!("e{i}"), json!(i))],
                Timestamp::from_micros(ts),
            )
            .expect("commit");
    }
    store
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn fetch_never_returns_own_transactions(
        commits in prop::collection::vec((0..AUTHORS.len(), 1..50i64), 0..30),
        current in 0..3usize,
        after in -10..500i64,
    ) {
        let log = seeded_log(&commits);
        let roster = Roster::new(AUTHORS[..3].iter().copied()).expect("roster");
        let me = AUTHORS[current];

        for policy in [FetchPolicy::ClosedWorld, FetchPolicy::OpenWorld] {
            let fetched = policy
                .fetcher(me, &roster)
                .fetch(&log, Timestamp::from_micros(after))
                .expect("fetch");
            prop_assert!(fetched.iter().all(|tx| tx.author != me));
            prop_assert!(fetched.iter().all(|tx| tx.timestamp > Timestamp::from_micros(after)));
            prop_assert!(fetched.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }
    }

    #[test]
    fn merge_result_does_not_depend_on_delivery_order(
        (batch, shuffled) in arb_batch().prop_flat_map(|batch| {
            let shuffled = Just(batch.clone()).prop_shuffle();
            (Just(batch), shuffled)
        })
    ) {
        let mut ordered = MaterializedView::new();
        apply_all(&mut ordered, &batch);

        let mut scrambled = MaterializedView::new();
        apply_all(&mut scrambled, &shuffled);

        prop_assert_eq!(ordered, scrambled);
    }

    #[test]
    fn merging_twice_equals_merging_once(batch in arb_batch()) {
        let mut once = MaterializedView::new();
        apply_all(&mut once, &batch);

        let mut twice = once.clone();
        apply_all(&mut twice, &batch);

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn checkpoint_advances_never_decrease(
        steps in prop::collection::vec(-1_000i64..1_000, 1..40),
    ) {
        let store = MemoryCheckpointStore::new();
        let mut previous: Option<Timestamp> = None;
        for step in &steps {
            let now = store.advance("a", Timestamp::from_micros(*step)).expect("advance");
            if let Some(prev) = previous {
                prop_assert!(now >= prev);
            }
            previous = Some(now);
        }
        let max = steps.iter().copied().max().map(Timestamp::from_micros);
        prop_assert_eq!(store.get("a").expect("get"), max);
    }

    #[test]
    fn cleanup_removes_exactly_entries_before_cutoff(
        commits in prop::collection::vec((0..AUTHORS.len(), 1..20i64), 0..30),
        cutoff in 0..400i64,
    ) {
        let log = seeded_log(&commits);
        let before = log
            .query_after(Timestamp::DISTANT_PAST, &AuthorFilter::Any)
            .expect("query");
        let cutoff = Timestamp::from_micros(cutoff);

        let deleted = DefaultCleaner.clean(&log, cutoff, None).expect("clean");
        let after = log
            .query_after(Timestamp::DISTANT_PAST, &AuthorFilter::Any)
            .expect("query");

        prop_assert!(after.iter().all(|tx| tx.timestamp >= cutoff));
        prop_assert_eq!(deleted, before.iter().filter(|tx| tx.timestamp < cutoff).count());
        prop_assert_eq!(
            after.len(),
            before.iter().filter(|tx| tx.timestamp >= cutoff).count()
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn merger_on_context_is_idempotent(batch in arb_batch()) {
        let ctx = ViewContext::spawn("prop", MaterializedView::new()).expect("spawn");
        DefaultMerger.merge(&ctx, &batch).expect("first merge");
        let once = ctx.snapshot().expect("snapshot");
        DefaultMerger.merge(&ctx, &batch).expect("second merge");
        prop_assert_eq!(once, ctx.snapshot().expect("snapshot"));
    }
}
