//! Every key in the union of both sides is visited exactly once, in order,
//! whatever the chunk size and however the sides overlap.

mod support;

use proptest::collection::btree_set;
use proptest::prelude::*;
use std::sync::Arc;

use support::{Dataset, MemoryComparator, TokioWallClock, context, mapping, settings};
use table_validator::domain::run::RunStatus;
use table_validator::engine::ValidationCoordinator;
use table_validator::infrastructure::memory_store::InMemoryValidationStore;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn chunks_partition_the_key_union(
        source in btree_set(0_i64..80, 0..40),
        target in btree_set(0_i64..80, 0..40),
        chunk_size in 1_u32..9,
    ) {
        let data = Dataset::from_keys(source.iter().copied(), target.iter().copied());
        let expected = data.union_keys();
        let only_source = source.difference(&target).count() as u64;
        let only_target = target.difference(&source).count() as u64;

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (report, comparator) = runtime.block_on(async {
            let comparator = Arc::new(MemoryComparator::new().with_table("T", data));
            let store = InMemoryValidationStore::new();
            let coordinator = ValidationCoordinator::new(
                vec![mapping("T", chunk_size)],
                settings(1),
                context(comparator.clone(), &store, Arc::new(TokioWallClock::real())),
            );
            (coordinator.run_all(None, false).await.unwrap(), comparator)
        });

        let table = report.table("T").unwrap();
        prop_assert_eq!(table.status, RunStatus::Completed);
        prop_assert_eq!(comparator.visited("T"), expected.clone());
        prop_assert_eq!(table.tallies.compared, expected.len() as u64);
        prop_assert_eq!(table.tallies.missing_on_target, only_source);
        prop_assert_eq!(table.tallies.missing_on_source, only_target);
        prop_assert_eq!(table.tallies.mismatched, 0);
        prop_assert_eq!(
            table.chunks_completed,
            (expected.len() as u64).div_ceil(u64::from(chunk_size))
        );
        for call in comparator.calls_for("T") {
            prop_assert!(call.visited.len() <= chunk_size as usize);
        }
    }
}
